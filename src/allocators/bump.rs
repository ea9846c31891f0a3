//! Page-backed bump (arena) allocator.
//!
//! Individual allocations are never freed; the whole chain of regions is handed back to the PMM
//! at once when the allocator is dropped. Used by the device tree parser to materialize typed
//! property payloads (decoded `reg`/`ranges` pairs, split `compatible` string lists) that need to
//! outlive the parse but are never freed piecemeal.

use core::ptr::NonNull;

use crate::address::{align_up, VirtualAddress, PAGE_SIZE};
use crate::error::{Error, ErrorCode};
use crate::hhdm::Hhdm;
use crate::pmm::Pmm;

#[repr(C)]
struct Region {
    end: *mut u8,
    cursor: *mut u8,
    next: Option<NonNull<Region>>,
}

/// An arena that grows by drawing whole pages from a [`Pmm`].
pub struct BumpAllocator<'pmm> {
    pmm: &'pmm Pmm,
    hhdm: Hhdm,
    head: Option<NonNull<Region>>,
}

impl<'pmm> BumpAllocator<'pmm> {
    /// Creates an empty arena backed by `pmm`; the first allocation triggers the first page draw.
    #[must_use]
    pub fn new(pmm: &'pmm Pmm, hhdm: Hhdm) -> Self {
        BumpAllocator { pmm, hhdm, head: None }
    }

    fn grow(&mut self, min_bytes: usize) -> Result<(), Error> {
        let region_bytes = align_up(min_bytes, PAGE_SIZE) + PAGE_SIZE;
        let pa = self
            .pmm
            .alloc(region_bytes)
            .map_err(|e| e.push(ErrorCode::BumpAllocFailed))?;
        let va = self.hhdm.phys_to_virt(pa);
        let region_ptr = va.as_usize() as *mut Region;
        unsafe {
            region_ptr.write(Region {
                end: (va.as_usize() + region_bytes) as *mut u8,
                cursor: (va.as_usize() + core::mem::size_of::<Region>()) as *mut u8,
                next: self.head,
            });
        }
        self.head = NonNull::new(region_ptr);
        Ok(())
    }

    /// Allocates `size` bytes aligned to `alignment` (which must be a power of two).
    pub fn alloc_aligned(&mut self, size: usize, alignment: usize) -> Result<NonNull<u8>, Error> {
        if size == 0 || alignment == 0 || !alignment.is_power_of_two() {
            return Err(ErrorCode::NullArgument.into());
        }
        if self.head.is_none() {
            self.grow(size + alignment)?;
        }
        loop {
            let region = self.head.expect("just grew, region list cannot be empty").as_ptr();
            let cursor = unsafe { (*region).cursor };
            let end = unsafe { (*region).end };
            let aligned = align_up(cursor as usize, alignment) as *mut u8;
            if (aligned as usize) + size <= end as usize {
                unsafe { (*region).cursor = aligned.add(size) };
                return Ok(NonNull::new(aligned).expect("aligned cursor is never null"));
            }
            self.grow(size + alignment)?;
        }
    }

    /// Allocates `size` bytes with no particular alignment requirement.
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, Error> {
        self.alloc_aligned(size, 1)
    }
}

impl Drop for BumpAllocator<'_> {
    fn drop(&mut self) {
        let mut cur = self.head;
        while let Some(region) = cur {
            let next = unsafe { region.as_ref().next };
            let pa = self.hhdm.virt_to_phys(VirtualAddress::new(region.as_ptr() as u64));
            let _ = self.pmm.free(pa);
            cur = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmm::Policy;

    fn setup_pmm() -> (Pmm, Hhdm) {
        let hhdm = Hhdm::new(0);
        let bootstrap = std::boxed::Box::leak(
            std::vec![0u8; crate::pmm::BOOTSTRAP_BUF_SIZE].into_boxed_slice(),
        );
        let pmm = Pmm::new(Policy::FirstFit, hhdm, bootstrap);
        let region: &'static mut [u8] =
            std::boxed::Box::leak(std::vec![0u8; 8 * PAGE_SIZE].into_boxed_slice());
        let base = region.as_ptr() as u64;
        pmm.add_region(crate::address::PhysicalAddress::new(base), 8 * PAGE_SIZE).unwrap();
        (pmm, hhdm)
    }

    #[test]
    fn allocates_within_a_single_region() {
        let (pmm, hhdm) = setup_pmm();
        let mut bump = BumpAllocator::new(&pmm, hhdm);
        let a = bump.alloc(16).unwrap();
        let b = bump.alloc(16).unwrap();
        assert_ne!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn grows_when_a_region_runs_out() {
        let (pmm, hhdm) = setup_pmm();
        let mut bump = BumpAllocator::new(&pmm, hhdm);
        for _ in 0..10 {
            bump.alloc(PAGE_SIZE / 2).unwrap();
        }
    }

    #[test]
    fn alignment_is_honored() {
        let (pmm, hhdm) = setup_pmm();
        let mut bump = BumpAllocator::new(&pmm, hhdm);
        let ptr = bump.alloc_aligned(8, 64).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 64, 0);
    }
}
