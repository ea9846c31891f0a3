//! Containers built directly on a [`crate::pmm::Pmm`] rather than a general-purpose heap.

pub mod dynamic_array;
