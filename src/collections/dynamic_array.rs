//! A growable array backed directly by page allocations drawn from a [`Pmm`].
//!
//! Storage grows by 3/2 (rounded up to a whole number of pages) rather than doubling, trading a
//! few more reallocations for less wasted tail space once the array settles into steady state
//! (device tree parsing builds one of these per structure block and never shrinks it back).

use core::marker::PhantomData;
use core::mem::size_of;

use crate::address::{align_up, PhysicalAddress, PAGE_SIZE};
use crate::error::{Error, ErrorCode};
use crate::hhdm::Hhdm;
use crate::pmm::Pmm;

/// A growable array of `T`, allocated page-at-a-time from a [`Pmm`].
///
/// Elements are moved (via `ptr::write`/`ptr::read`) rather than cloned when the array grows, so
/// `T` need not implement [`Clone`]. Indices handed out by [`DynamicArray::push`] remain stable
/// across growth, since growth relocates the backing buffer but never reorders live elements.
pub struct DynamicArray<'pmm, T> {
    pmm: &'pmm Pmm,
    hhdm: Hhdm,
    base: Option<PhysicalAddress>,
    capacity: usize,
    len: usize,
    _marker: PhantomData<T>,
}

impl<'pmm, T> DynamicArray<'pmm, T> {
    /// Creates an empty array; the first [`DynamicArray::push`] triggers the initial allocation.
    #[must_use]
    pub fn new(pmm: &'pmm Pmm, hhdm: Hhdm) -> Self {
        DynamicArray { pmm, hhdm, base: None, capacity: 0, len: 0, _marker: PhantomData }
    }

    /// Number of elements currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if no elements have been pushed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Elements the current backing allocation can hold before a regrow is needed.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn ptr(&self) -> *mut T {
        match self.base {
            Some(base) => self.hhdm.phys_to_virt(base).as_usize() as *mut T,
            None => core::ptr::null_mut(),
        }
    }

    fn grow(&mut self, min_capacity: usize) -> Result<(), Error> {
        let new_capacity = core::cmp::max(min_capacity, 1 + (self.capacity * 3) / 2);
        let new_bytes = align_up(new_capacity * size_of::<T>(), PAGE_SIZE);
        let new_base = self
            .pmm
            .alloc(new_bytes)
            .map_err(|e| e.push(ErrorCode::DynArrReallocFailure))?;
        let new_ptr = self.hhdm.phys_to_virt(new_base).as_usize() as *mut T;

        if let Some(old_base) = self.base {
            let old_ptr = self.hhdm.phys_to_virt(old_base).as_usize() as *mut T;
            unsafe {
                core::ptr::copy_nonoverlapping(old_ptr, new_ptr, self.len);
            }
            let _ = self.pmm.free(old_base);
        }

        self.base = Some(new_base);
        self.capacity = new_bytes / size_of::<T>();
        Ok(())
    }

    /// Appends `value`, growing the backing allocation first if it is full. Returns the index the
    /// element was stored at.
    pub fn push(&mut self, value: T) -> Result<usize, Error> {
        if self.len == self.capacity {
            self.grow(self.len + 1).map_err(|e| e.push(ErrorCode::DynArrAllocFailure))?;
        }
        let index = self.len;
        unsafe {
            self.ptr().add(index).write(value);
        }
        self.len += 1;
        Ok(index)
    }

    /// A shared reference to the element at `index`, or `None` if out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index < self.len {
            Some(unsafe { &*self.ptr().add(index) })
        } else {
            None
        }
    }

    /// A mutable reference to the element at `index`, or `None` if out of bounds.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index < self.len {
            Some(unsafe { &mut *self.ptr().add(index) })
        } else {
            None
        }
    }

    /// Iterates over shared references to every element, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        (0..self.len).map(move |i| unsafe { &*self.ptr().add(i) })
    }
}

impl<T> core::ops::Index<usize> for DynamicArray<'_, T> {
    type Output = T;
    fn index(&self, index: usize) -> &T {
        self.get(index).expect("index out of bounds")
    }
}

impl<T> core::ops::IndexMut<usize> for DynamicArray<'_, T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        self.get_mut(index).expect("index out of bounds")
    }
}

impl<T> Drop for DynamicArray<'_, T> {
    fn drop(&mut self) {
        if core::mem::needs_drop::<T>() {
            for i in 0..self.len {
                unsafe {
                    core::ptr::drop_in_place(self.ptr().add(i));
                }
            }
        }
        if let Some(base) = self.base {
            let _ = self.pmm.free(base);
        }
    }
}

unsafe impl<T: Send> Send for DynamicArray<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmm::Policy;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> (Pmm, Hhdm) {
        let hhdm = Hhdm::new(0);
        let bootstrap =
            std::boxed::Box::leak(std::vec![0u8; crate::pmm::BOOTSTRAP_BUF_SIZE].into_boxed_slice());
        let pmm = Pmm::new(Policy::FirstFit, hhdm, bootstrap);
        let region: &'static mut [u8] =
            std::boxed::Box::leak(std::vec![0u8; 256 * PAGE_SIZE].into_boxed_slice());
        let base = PhysicalAddress::new(region.as_ptr() as u64);
        pmm.add_region(base, region.len()).unwrap();
        (pmm, hhdm)
    }

    #[test]
    fn push_then_get_round_trips() {
        let (pmm, hhdm) = setup();
        let mut arr: DynamicArray<u32> = DynamicArray::new(&pmm, hhdm);
        let i = arr.push(42).unwrap();
        assert_eq!(i, 0);
        assert_eq!(*arr.get(0).unwrap(), 42);
        assert_eq!(arr[0], 42);
    }

    #[test]
    fn indices_survive_growth() {
        let (pmm, hhdm) = setup();
        let mut arr: DynamicArray<u64> = DynamicArray::new(&pmm, hhdm);
        let mut indices = std::vec::Vec::new();
        for i in 0..2000u64 {
            indices.push(arr.push(i).unwrap());
        }
        for (expected, idx) in indices.into_iter().enumerate() {
            assert_eq!(arr[idx], expected as u64);
        }
    }

    #[test]
    fn out_of_bounds_get_is_none() {
        let (pmm, hhdm) = setup();
        let arr: DynamicArray<u32> = DynamicArray::new(&pmm, hhdm);
        assert!(arr.get(0).is_none());
    }

    #[test]
    fn drop_runs_destructors_and_frees_storage() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        struct Counted;
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (pmm, hhdm) = setup();
        let free_before = pmm.free_memory();
        {
            let mut arr: DynamicArray<Counted> = DynamicArray::new(&pmm, hhdm);
            for _ in 0..5 {
                arr.push(Counted).unwrap();
            }
        }
        assert_eq!(DROPS.load(Ordering::SeqCst), 5);
        assert_eq!(pmm.free_memory(), free_before);
    }

    #[test]
    fn indices_survive_growth_in_random_verification_order() {
        use rand::seq::SliceRandom;

        let (pmm, hhdm) = setup();
        let mut arr: DynamicArray<u64> = DynamicArray::new(&pmm, hhdm);
        let mut indices = std::vec::Vec::new();
        for i in 0..2000u64 {
            indices.push(arr.push(i).unwrap());
        }

        let mut rng = rand::thread_rng();
        indices.shuffle(&mut rng);
        for idx in indices {
            assert_eq!(arr[idx], idx as u64);
        }
    }

    #[test]
    fn growth_follows_three_over_two_policy() {
        let (pmm, hhdm) = setup();
        let mut arr: DynamicArray<u8> = DynamicArray::new(&pmm, hhdm);
        arr.push(1).unwrap();
        let first_capacity = arr.capacity();
        assert!(first_capacity >= 1);
        for i in 0..first_capacity {
            arr.push(i as u8).unwrap();
        }
        assert!(arr.capacity() > first_capacity);
    }
}
