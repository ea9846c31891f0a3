//! Physical memory manager: a region list plus a free-block list per region, handing out
//! page-granular, zero-filled allocations under one of four fit policies.
//!
//! The manager bootstraps its own block-node storage from a small static buffer fed into a
//! [`SlabAllocator`], so that servicing an allocation never requires the PMM to allocate from
//! itself through the public API (which would deadlock on its own lock). When that bootstrap
//! buffer runs low, [`PmmState::ensure_block_capacity`] draws one more page through the same
//! locked state instead of recursing through [`Pmm::alloc`].

use core::ptr::NonNull;

use spin::Mutex;

use crate::address::{align_up, checked_align_up, is_aligned, PhysicalAddress, PAGE_SIZE};
use crate::allocators::slab::SlabAllocator;
use crate::error::{Error, ErrorCode};
use crate::hhdm::Hhdm;

const REGION_COUNT: usize = 16;
const INITIAL_BLOCK_COUNT: usize = 64;
const REFILL_THRESHOLD: usize = 16;

/// The strategy used to pick a free block when servicing an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Uses the first free block encountered that is large enough.
    FirstFit,
    /// Uses the smallest free block that is large enough.
    BestFit,
    /// Uses the largest free block available.
    WorstFit,
    /// Resumes the search from where the last allocation left off, wrapping around.
    NextFit,
}

struct Block {
    base: PhysicalAddress,
    length: usize,
    next: Option<NonNull<Block>>,
}

struct Region {
    base: PhysicalAddress,
    length: usize,
    free_bytes: usize,
    free_blocks: Option<NonNull<Block>>,
    allocated_blocks: Option<NonNull<Block>>,
}

impl Region {
    const fn empty() -> Self {
        Region {
            base: PhysicalAddress::NULL,
            length: 0,
            free_bytes: 0,
            free_blocks: None,
            allocated_blocks: None,
        }
    }
}

/// Bytes a [`Pmm`]'s bootstrap buffer must provide; see [`Pmm::new`].
pub const BOOTSTRAP_BUF_SIZE: usize = SlabAllocator::<Block>::region_size(INITIAL_BLOCK_COUNT);

struct PmmState {
    policy: Policy,
    hhdm: Hhdm,
    regions: [Region; REGION_COUNT],
    region_count: usize,
    total_bytes: usize,
    free_bytes: usize,
    block_allocator: SlabAllocator<Block, false>,
    next_fit_cursor: usize,
    refilling: bool,
}

impl PmmState {
    fn new(policy: Policy, hhdm: Hhdm, bootstrap: &'static mut [u8]) -> Self {
        let mut block_allocator = SlabAllocator::new();
        unsafe {
            block_allocator
                .grow(bootstrap.as_mut_ptr(), bootstrap.len())
                .expect("caller-supplied bootstrap buffer must be large enough for one region");
        }
        PmmState {
            policy,
            hhdm,
            regions: core::array::from_fn(|_| Region::empty()),
            region_count: 0,
            total_bytes: 0,
            free_bytes: 0,
            block_allocator,
            next_fit_cursor: 0,
            refilling: false,
        }
    }

    fn ensure_block_capacity(&mut self) -> Result<(), Error> {
        if self.refilling || self.block_allocator.free_count() >= REFILL_THRESHOLD {
            return Ok(());
        }
        self.refilling = true;
        let result = (|| {
            let pa = self.alloc_aligned_locked(PAGE_SIZE, PAGE_SIZE)?;
            let va = self.hhdm.phys_to_virt(pa);
            unsafe {
                self.block_allocator
                    .grow(va.as_usize() as *mut u8, PAGE_SIZE)
                    .map_err(|e| e.push(ErrorCode::PmmOutOfMemory))
            }
        })();
        self.refilling = false;
        result
    }

    fn region_overlaps(&self, base: PhysicalAddress, length: usize) -> bool {
        let end = base.as_usize() + length;
        self.regions[..self.region_count].iter().any(|r| {
            let r_end = r.base.as_usize() + r.length;
            base.as_usize() < r_end && r.base.as_usize() < end
        })
    }

    fn add_region(&mut self, base: PhysicalAddress, size: usize) -> Result<(), Error> {
        let aligned_base = base.align_up(PAGE_SIZE);
        let shrink = aligned_base.as_usize() - base.as_usize();
        if size <= shrink {
            return Err(ErrorCode::PmmRegionTooSmall.into());
        }
        let aligned_size = (size - shrink) & !(PAGE_SIZE - 1);
        if aligned_size == 0 {
            return Err(ErrorCode::PmmRegionTooSmall.into());
        }
        if self.region_overlaps(aligned_base, aligned_size) {
            return Err(ErrorCode::PmmRegionManaged.into());
        }
        if self.region_count >= REGION_COUNT {
            return Err(ErrorCode::PmmRegionListFull.into());
        }

        self.ensure_block_capacity()?;
        let mut node = self
            .block_allocator
            .alloc()
            .ok_or(Error::from(ErrorCode::PmmOutOfMemory))?;
        unsafe {
            node.as_mut().base = aligned_base;
            node.as_mut().length = aligned_size;
            node.as_mut().next = None;
        }

        let index = self.region_count;
        self.regions[index] = Region {
            base: aligned_base,
            length: aligned_size,
            free_bytes: aligned_size,
            free_blocks: Some(node),
            allocated_blocks: None,
        };
        self.region_count += 1;
        self.total_bytes += aligned_size;
        self.free_bytes += aligned_size;
        Ok(())
    }

    fn remove_region(&mut self, _base: PhysicalAddress, _size: usize) -> Result<(), Error> {
        Err(ErrorCode::NotImplemented.into())
    }

    fn candidate_fits(block: &Block, size: usize, alignment: usize) -> Option<usize> {
        let aligned_base = align_up(block.base.as_usize(), alignment);
        let end = block.base.as_usize() + block.length;
        if aligned_base + size <= end {
            Some(aligned_base)
        } else {
            None
        }
    }

    fn select_block(&mut self, size: usize, alignment: usize) -> Option<(usize, NonNull<Block>, usize)> {
        match self.policy {
            Policy::FirstFit => {
                for (ri, region) in self.regions[..self.region_count].iter().enumerate() {
                    let mut cur = region.free_blocks;
                    while let Some(block) = cur {
                        let b = unsafe { block.as_ref() };
                        if let Some(aligned) = Self::candidate_fits(b, size, alignment) {
                            return Some((ri, block, aligned));
                        }
                        cur = b.next;
                    }
                }
                None
            }
            Policy::BestFit | Policy::WorstFit => {
                let want_smallest = self.policy == Policy::BestFit;
                let mut best: Option<(usize, NonNull<Block>, usize, usize)> = None;
                for (ri, region) in self.regions[..self.region_count].iter().enumerate() {
                    let mut cur = region.free_blocks;
                    while let Some(block) = cur {
                        let b = unsafe { block.as_ref() };
                        if let Some(aligned) = Self::candidate_fits(b, size, alignment) {
                            let better = match &best {
                                None => true,
                                Some((_, _, _, len)) => {
                                    if want_smallest {
                                        b.length < *len
                                    } else {
                                        b.length > *len
                                    }
                                }
                            };
                            if better {
                                best = Some((ri, block, aligned, b.length));
                            }
                        }
                        cur = b.next;
                    }
                }
                best.map(|(ri, block, aligned, _)| (ri, block, aligned))
            }
            Policy::NextFit => {
                let cursor = self.next_fit_cursor;
                let mut first_fit: Option<(usize, NonNull<Block>, usize)> = None;
                for (ri, region) in self.regions[..self.region_count].iter().enumerate() {
                    let mut cur = region.free_blocks;
                    while let Some(block) = cur {
                        let b = unsafe { block.as_ref() };
                        if let Some(aligned) = Self::candidate_fits(b, size, alignment) {
                            if first_fit.is_none() {
                                first_fit = Some((ri, block, aligned));
                            }
                            if b.base.as_usize() >= cursor {
                                return Some((ri, block, aligned));
                            }
                        }
                        cur = b.next;
                    }
                }
                // The stored cursor no longer refers to a present block (it was freed, merged
                // away, or this is the first allocation): re-anchor to the first fitting block.
                first_fit
            }
        }
    }

    fn alloc_aligned_locked(&mut self, size: usize, alignment: usize) -> Result<PhysicalAddress, Error> {
        if alignment == 0 || !alignment.is_power_of_two() || alignment < PAGE_SIZE {
            return Err(ErrorCode::PmmBadAlign.into());
        }
        let size = checked_align_up(size, PAGE_SIZE).ok_or(Error::from(ErrorCode::PmmBadAlign))?;
        if size == 0 {
            return Err(ErrorCode::NullArgument.into());
        }
        if self.free_bytes < size {
            return Err(ErrorCode::PmmOutOfMemory.into());
        }

        self.ensure_block_capacity()?;

        let (region_index, block, aligned_base) = self
            .select_block(size, alignment)
            .ok_or(Error::from(ErrorCode::PmmOutOfMemory))?;

        let (block_base, block_length, block_next) = unsafe {
            let b = block.as_ref();
            (b.base.as_usize(), b.length, b.next)
        };
        let preceding = aligned_base - block_base;
        let postceding = (block_base + block_length) - (aligned_base + size);

        // Reuse the existing node for the preceding remainder, if any, rather than allocating a
        // fresh one; allocate a new node only for a postceding remainder.
        match (preceding > 0, postceding > 0) {
            (false, false) => {
                self.unlink_free_block(region_index, block, block_next);
                unsafe { self.block_allocator.free(block) };
            }
            (true, false) => unsafe {
                (*block.as_ptr()).length = preceding;
            },
            (false, true) => unsafe {
                let b = &mut *block.as_ptr();
                b.base = PhysicalAddress::new((aligned_base + size) as u64);
                b.length = postceding;
            },
            (true, true) => {
                unsafe {
                    let b = &mut *block.as_ptr();
                    b.length = preceding;
                }
                let mut new_node = self
                    .block_allocator
                    .alloc()
                    .ok_or(Error::from(ErrorCode::PmmOutOfMemory))?;
                unsafe {
                    new_node.as_mut().base = PhysicalAddress::new((aligned_base + size) as u64);
                    new_node.as_mut().length = postceding;
                    new_node.as_mut().next = block_next;
                    (*block.as_ptr()).next = Some(new_node);
                }
            }
        }

        let mut allocated_node = self
            .block_allocator
            .alloc()
            .ok_or(Error::from(ErrorCode::PmmOutOfMemory))?;
        let region = &mut self.regions[region_index];
        unsafe {
            allocated_node.as_mut().base = PhysicalAddress::new(aligned_base as u64);
            allocated_node.as_mut().length = size;
            allocated_node.as_mut().next = region.allocated_blocks;
        }
        region.allocated_blocks = Some(allocated_node);
        region.free_bytes -= size;
        self.free_bytes -= size;

        if self.policy == Policy::NextFit {
            self.next_fit_cursor = aligned_base + size;
        }

        let pa = PhysicalAddress::new(aligned_base as u64);
        let va = self.hhdm.phys_to_virt(pa);
        unsafe {
            core::ptr::write_bytes(va.as_usize() as *mut u8, 0, size);
        }
        Ok(pa)
    }

    fn unlink_free_block(&mut self, region_index: usize, block: NonNull<Block>, next: Option<NonNull<Block>>) {
        let region = &mut self.regions[region_index];
        let mut cur = region.free_blocks;
        let mut prev: Option<NonNull<Block>> = None;
        while let Some(node) = cur {
            if node == block {
                match prev {
                    Some(mut p) => unsafe { p.as_mut().next = next },
                    None => region.free_blocks = next,
                }
                return;
            }
            prev = Some(node);
            cur = unsafe { node.as_ref().next };
        }
    }

    fn insert_free_block(&mut self, region_index: usize, base: PhysicalAddress, length: usize) -> Result<(), Error> {
        let region_ptr: *mut Region = &mut self.regions[region_index];
        let mut prev: Option<NonNull<Block>> = None;
        let mut cur = unsafe { (*region_ptr).free_blocks };
        while let Some(block) = cur {
            let b = unsafe { block.as_ref() };
            if b.base.as_usize() > base.as_usize() {
                break;
            }
            prev = Some(block);
            cur = b.next;
        }

        let merges_with_prev = prev.is_some_and(|p| {
            let pb = unsafe { p.as_ref() };
            pb.base.as_usize() + pb.length == base.as_usize()
        });
        let merges_with_next = cur.is_some_and(|c| {
            let cb = unsafe { c.as_ref() };
            base.as_usize() + length == cb.base.as_usize()
        });

        match (merges_with_prev, merges_with_next) {
            (true, true) => unsafe {
                let mut p = prev.unwrap();
                let c = cur.unwrap();
                let (extra_len, next) = {
                    let cb = c.as_ref();
                    (cb.length, cb.next)
                };
                p.as_mut().length += length + extra_len;
                p.as_mut().next = next;
                self.block_allocator.free(c);
            },
            (true, false) => unsafe {
                let mut p = prev.unwrap();
                p.as_mut().length += length;
            },
            (false, true) => unsafe {
                let mut c = cur.unwrap();
                c.as_mut().base = base;
                c.as_mut().length += length;
            },
            (false, false) => {
                self.ensure_block_capacity()?;
                let mut node = self
                    .block_allocator
                    .alloc()
                    .ok_or(Error::from(ErrorCode::PmmOutOfMemory))?;
                unsafe {
                    node.as_mut().base = base;
                    node.as_mut().length = length;
                    node.as_mut().next = cur;
                }
                match prev {
                    Some(mut p) => unsafe { p.as_mut().next = Some(node) },
                    None => unsafe { (*region_ptr).free_blocks = Some(node) },
                }
            }
        }
        Ok(())
    }

    fn free_locked(&mut self, addr: PhysicalAddress) -> Result<(), Error> {
        self.ensure_block_capacity()?;
        for ri in 0..self.region_count {
            let mut prev: Option<NonNull<Block>> = None;
            let mut cur = self.regions[ri].allocated_blocks;
            while let Some(block) = cur {
                let (base, length, next) = unsafe {
                    let b = block.as_ref();
                    (b.base, b.length, b.next)
                };
                if base == addr {
                    match prev {
                        Some(mut p) => unsafe { p.as_mut().next = next },
                        None => self.regions[ri].allocated_blocks = next,
                    }
                    unsafe { self.block_allocator.free(block) };
                    self.insert_free_block(ri, base, length)?;
                    self.regions[ri].free_bytes += length;
                    self.free_bytes += length;
                    return Ok(());
                }
                prev = Some(block);
                cur = next;
            }
        }
        Err(ErrorCode::PmmRegionNotManaged.into())
    }
}

unsafe impl Send for PmmState {}

/// A physical memory manager.
///
/// Every public method takes `&self`: the state lives behind a [`spin::Mutex`], matching the
/// single-hart, no-preemption execution model this kernel runs under.
pub struct Pmm {
    state: Mutex<PmmState>,
}

impl Pmm {
    /// Creates a manager with no regions yet added.
    ///
    /// `bootstrap` seeds the slab allocator this manager uses for its own block-list bookkeeping
    /// and must be at least [`BOOTSTRAP_BUF_SIZE`] bytes, 8-byte aligned, and `'static` (a
    /// kernel binary supplies one static buffer; tests typically use a function-local `static`).
    #[must_use]
    pub fn new(policy: Policy, hhdm: Hhdm, bootstrap: &'static mut [u8]) -> Self {
        Pmm { state: Mutex::new(PmmState::new(policy, hhdm, bootstrap)) }
    }

    /// Adds a region of physical memory to be managed. `base`/`size` are rounded to page
    /// boundaries (shrinking inward); a region that overlaps one already managed is rejected.
    pub fn add_region(&self, base: PhysicalAddress, size: usize) -> Result<(), Error> {
        self.state.lock().add_region(base, size)
    }

    /// Stops managing a region. Not implemented: nothing in this kernel ever surrenders memory
    /// back to the bootloader's reclaim pool at runtime.
    pub fn remove_region(&self, base: PhysicalAddress, size: usize) -> Result<(), Error> {
        self.state.lock().remove_region(base, size)
    }

    /// Allocates `size` bytes aligned to `alignment` (a power of two, at least the page size).
    pub fn alloc_aligned(&self, size: usize, alignment: usize) -> Result<PhysicalAddress, Error> {
        self.state.lock().alloc_aligned_locked(size, alignment)
    }

    /// Allocates `size` bytes, page-aligned.
    pub fn alloc(&self, size: usize) -> Result<PhysicalAddress, Error> {
        self.alloc_aligned(size, PAGE_SIZE)
    }

    /// Returns a previously allocated block to the free list, coalescing with its neighbors.
    pub fn free(&self, addr: PhysicalAddress) -> Result<(), Error> {
        self.state.lock().free_locked(addr)
    }

    /// Total bytes across every managed region.
    #[must_use]
    pub fn total_memory(&self) -> usize {
        self.state.lock().total_bytes
    }

    /// Bytes currently free across every managed region.
    #[must_use]
    pub fn free_memory(&self) -> usize {
        self.state.lock().free_bytes
    }
}
