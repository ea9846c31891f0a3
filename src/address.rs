//! Physical/virtual address newtypes and the page-size constants shared by every module.

use core::fmt;
use core::ops::Add;

/// Size of a standard Sv39 leaf page.
pub const PAGE_SIZE: usize = 0x1000;
/// Size of an Sv39 megapage (a level-1 leaf).
pub const MEGAPAGE_SIZE: usize = 0x20_0000;
/// Size of an Sv39 gigapage (a level-2 leaf).
pub const GIGAPAGE_SIZE: usize = 0x4000_0000;

/// Rounds `value` up to the next multiple of `align`, which must be a power of two.
#[must_use]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Rounds `value` up to the next multiple of `align`, which must be a power of two. Returns
/// `None` instead of overflowing if `value` is too close to `usize::MAX` to round up.
#[must_use]
pub const fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(sum) => Some(sum & !(align - 1)),
        None => None,
    }
}

/// Rounds `value` down to the previous multiple of `align`, which must be a power of two.
#[must_use]
pub const fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

/// True if `value` is a multiple of `align`, which must be a power of two.
#[must_use]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

macro_rules! address_newtype {
    ($name:ident) => {
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, bytemuck::Pod, bytemuck::Zeroable)]
        pub struct $name(pub u64);

        impl $name {
            /// The null address, `0`.
            pub const NULL: $name = $name(0);

            #[must_use]
            pub const fn new(value: u64) -> Self {
                $name(value)
            }

            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            #[must_use]
            pub const fn as_usize(self) -> usize {
                self.0 as usize
            }

            #[must_use]
            pub const fn is_aligned(self, align: usize) -> bool {
                is_aligned(self.0 as usize, align)
            }

            #[must_use]
            pub const fn align_up(self, align: usize) -> Self {
                $name(align_up(self.0 as usize, align) as u64)
            }

            #[must_use]
            pub const fn align_down(self, align: usize) -> Self {
                $name(align_down(self.0 as usize, align) as u64)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                $name(value)
            }
        }

        impl From<usize> for $name {
            fn from(value: usize) -> Self {
                $name(value as u64)
            }
        }

        impl Add<usize> for $name {
            type Output = $name;
            fn add(self, rhs: usize) -> $name {
                $name(self.0 + rhs as u64)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }
    };
}

address_newtype!(PhysicalAddress);
address_newtype!(VirtualAddress);
