//! Allocators used to bootstrap and back the rest of the crate: a typed [`slab`] pool for the
//! PMM's own bookkeeping, and a page-backed [`bump`] arena for the device tree parser's typed
//! property payloads.

pub mod bump;
pub mod slab;
