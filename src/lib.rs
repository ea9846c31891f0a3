//! Physical memory management, Sv39 paging, and flattened device tree parsing for a RISC-V
//! kernel booted by a Limine-compatible loader.

#![no_std]

#[cfg(all(test, not(target_os = "none")))]
#[macro_use]
extern crate std;

pub mod address;
pub mod allocators;
pub mod collections;
pub mod dtb;
pub mod error;
pub mod hhdm;
pub mod paging;
pub mod platform;
pub mod pmm;

pub use address::{PhysicalAddress, VirtualAddress};
pub use error::{Error, ErrorCode};
pub use hhdm::Hhdm;
pub use pmm::Pmm;
