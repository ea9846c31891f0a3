//! Higher-half direct map: a linear offset between physical and kernel-virtual addresses, supplied
//! by the bootloader at boot time.
//!
//! [`Hhdm`] is a plain value so every allocator in this crate takes one as an explicit constructor
//! argument instead of reaching for process-global state; that is what lets tests build many
//! independent allocators side by side. [`global`] holds the one instance the kernel binary
//! actually boots with, set once from the bootloader's response and read by code that does not
//! otherwise have an `Hhdm` in hand.

use spin::Once;

use crate::address::{PhysicalAddress, VirtualAddress};

/// A physical-to-virtual offset for the direct map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hhdm {
    offset: u64,
}

impl Hhdm {
    /// Builds a direct map description from the offset the bootloader reports.
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Hhdm { offset }
    }

    /// Translates a physical address to its kernel-virtual alias in the direct map.
    #[must_use]
    pub fn phys_to_virt(self, pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(pa.as_u64() + self.offset)
    }

    /// Translates a kernel-virtual address in the direct map back to its physical address.
    #[must_use]
    pub fn virt_to_phys(self, va: VirtualAddress) -> PhysicalAddress {
        PhysicalAddress::new(va.as_u64() - self.offset)
    }
}

static GLOBAL: Once<Hhdm> = Once::new();

/// Records the direct map this kernel booted with. Must be called exactly once, before
/// [`global`] is used.
pub fn init(offset: u64) {
    GLOBAL.call_once(|| Hhdm::new(offset));
}

/// The direct map recorded by [`init`].
///
/// # Panics
/// Panics if [`init`] has not run yet.
#[must_use]
pub fn global() -> Hhdm {
    *GLOBAL
        .get()
        .expect("hhdm::init must run before hhdm::global is used")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_the_direct_map() {
        let map = Hhdm::new(0xffff_8000_0000_0000);
        let pa = PhysicalAddress::new(0x8020_0000);
        let va = map.phys_to_virt(pa);
        assert_eq!(va.as_u64(), 0xffff_8000_8020_0000);
        assert_eq!(map.virt_to_phys(va), pa);
    }
}
