//! Shared error taxonomy.
//!
//! Every fallible operation in this crate returns a single-byte [`ErrorCode`] wrapped in an
//! [`Error`], a small pushdown stack of codes packed into one `u64`. A leaf failure constructs an
//! `Error` directly from its `ErrorCode`; a caller that wants to annotate the failure with its own
//! context calls [`Error::push`] (or the [`ResultExt::push_err`] shorthand) rather than replacing
//! the original code, so both the root cause and every calling subsystem survive the return trip.

use core::fmt;

/// A single failure code. Kept to one byte so eight of them pack into the `u64` stack in [`Error`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// No error.
    Success = 0,
    /// The function has not been implemented.
    NotImplemented,
    /// A required pointer or reference argument was null/absent.
    NullArgument,
    /// A Limine bootloader request went unanswered.
    LimineRequestError,

    /// Region passed to a [`crate::allocators::slab::SlabAllocator`] is too small to hold a cell.
    SlabRegionTooSmall,
    /// Region passed to a [`crate::allocators::slab::SlabAllocator`] is not properly aligned.
    SlabBadAlign,

    /// A bump allocation request could not be satisfied because growing the arena failed.
    BumpAllocFailed,

    /// Added region is smaller than the page size once aligned.
    PmmRegionTooSmall,
    /// The region list is full; no more regions can be tracked.
    PmmRegionListFull,
    /// The region being added overlaps a region already under management.
    PmmRegionManaged,
    /// An address passed to [`crate::pmm::free`] is not within any managed, allocated block.
    PmmRegionNotManaged,
    /// Alignment requested is not a power of two, or is smaller than the page size.
    PmmBadAlign,
    /// There is not enough free memory to satisfy the request.
    PmmOutOfMemory,

    /// A virtual or physical address passed to the paging engine was not page-aligned.
    PagingUnalignedAddr,
    /// Allocating a page for an intermediate page table level failed.
    PagingAllocFailed,
    /// A mapping already exists at the requested virtual address.
    PagingMapExists,
    /// No mapping exists for the requested virtual address.
    PagingNotMapped,

    /// Growing a dynamic array failed because the backing allocation failed.
    DynArrAllocFailure,
    /// Growing a dynamic array failed while reallocating a larger backing buffer.
    DynArrReallocFailure,

    /// The device tree blob's magic number did not match the expected value.
    DtMagicNumber,
    /// The device tree blob's reported size does not match the buffer supplied to it.
    DtSizeMismatch,
    /// The tokenized structure block ended, was truncated, or nested incorrectly.
    DtTruncated,
    /// An unexpected or out-of-place structure token was encountered.
    DtUnexpectedToken,
    /// The parsed device tree blob contained no nodes.
    DtNoNodes,
    /// Rewriting a node's properties into typed values failed.
    DtRewriteFailed,
    /// An `#address-cells` property had a value greater than 3.
    DtAddressCellsTooLarge,
    /// A `#size-cells` property had a value greater than 2.
    DtSizeCellsTooLarge,
}

impl ErrorCode {
    /// Human-readable description, in the style of a man-page ERRORS list.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::Success => "no error",
            ErrorCode::NotImplemented => "function is not implemented",
            ErrorCode::NullArgument => "required argument was null",
            ErrorCode::LimineRequestError => "a required Limine bootloader request went unanswered",
            ErrorCode::SlabRegionTooSmall => "region is too small to hold a cell",
            ErrorCode::SlabBadAlign => "region is not properly aligned",
            ErrorCode::BumpAllocFailed => "bump arena failed to grow",
            ErrorCode::PmmRegionTooSmall => "region is smaller than the page size",
            ErrorCode::PmmRegionListFull => "region list is full",
            ErrorCode::PmmRegionManaged => "region overlaps one already managed",
            ErrorCode::PmmRegionNotManaged => "address is not part of any managed allocation",
            ErrorCode::PmmBadAlign => "alignment must be a power of two, at least the page size",
            ErrorCode::PmmOutOfMemory => "not enough free memory to satisfy the request",
            ErrorCode::PagingUnalignedAddr => "address is not page-aligned",
            ErrorCode::PagingAllocFailed => "allocating an intermediate page table failed",
            ErrorCode::PagingMapExists => "a mapping already exists at this address",
            ErrorCode::PagingNotMapped => "no mapping exists at this address",
            ErrorCode::DynArrAllocFailure => "failed to allocate initial dynamic array storage",
            ErrorCode::DynArrReallocFailure => "failed to grow a dynamic array",
            ErrorCode::DtMagicNumber => "device tree blob has an invalid magic number",
            ErrorCode::DtSizeMismatch => "device tree blob size does not match its header",
            ErrorCode::DtTruncated => "device tree blob is truncated or misaligned",
            ErrorCode::DtUnexpectedToken => "device tree blob has an unexpected structure token",
            ErrorCode::DtNoNodes => "device tree blob contained no nodes",
            ErrorCode::DtRewriteFailed => "failed to rewrite a property into a typed value",
            ErrorCode::DtAddressCellsTooLarge => "#address-cells is larger than 3",
            ErrorCode::DtSizeCellsTooLarge => "#size-cells is larger than 2",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ErrorCode::Success,
            1 => ErrorCode::NotImplemented,
            2 => ErrorCode::NullArgument,
            3 => ErrorCode::LimineRequestError,
            4 => ErrorCode::SlabRegionTooSmall,
            5 => ErrorCode::SlabBadAlign,
            6 => ErrorCode::BumpAllocFailed,
            7 => ErrorCode::PmmRegionTooSmall,
            8 => ErrorCode::PmmRegionListFull,
            9 => ErrorCode::PmmRegionManaged,
            10 => ErrorCode::PmmRegionNotManaged,
            11 => ErrorCode::PmmBadAlign,
            12 => ErrorCode::PmmOutOfMemory,
            13 => ErrorCode::PagingUnalignedAddr,
            14 => ErrorCode::PagingAllocFailed,
            15 => ErrorCode::PagingMapExists,
            16 => ErrorCode::PagingNotMapped,
            17 => ErrorCode::DynArrAllocFailure,
            18 => ErrorCode::DynArrReallocFailure,
            19 => ErrorCode::DtMagicNumber,
            20 => ErrorCode::DtSizeMismatch,
            21 => ErrorCode::DtTruncated,
            22 => ErrorCode::DtUnexpectedToken,
            23 => ErrorCode::DtNoNodes,
            24 => ErrorCode::DtRewriteFailed,
            25 => ErrorCode::DtAddressCellsTooLarge,
            _ => ErrorCode::DtSizeCellsTooLarge,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}: {}", self.message())
    }
}

/// A pushdown stack of up to eight [`ErrorCode`]s packed into a `u64`.
///
/// The most recently pushed code lives in the low byte. Pushing past eight codes silently
/// evicts the oldest (highest) byte, matching a fixed-depth call-chain annotation trail rather
/// than an unbounded backtrace.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Error(u64);

impl Error {
    /// The empty, successful stack.
    pub const OK: Error = Error(ErrorCode::Success as u64);

    /// Pushes `code` onto the stack, becoming the new top.
    #[must_use]
    pub fn push(self, code: ErrorCode) -> Error {
        Error((self.0 << 8) | code as u64)
    }

    /// Pops the top code off the stack, revealing the one beneath it.
    #[must_use]
    pub fn pop(self) -> Error {
        Error(self.0 >> 8)
    }

    /// The top code on the stack.
    #[must_use]
    pub fn top(self) -> ErrorCode {
        ErrorCode::from_u8((self.0 & 0xFF) as u8)
    }

    /// True if the top code is [`ErrorCode::Success`].
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self.top(), ErrorCode::Success)
    }

    /// True if the top code is not [`ErrorCode::Success`].
    #[must_use]
    pub fn is_err(self) -> bool {
        !self.is_ok()
    }

    /// The raw packed stack value, for bit-exact comparisons in tests.
    #[must_use]
    pub const fn into_raw(self) -> u64 {
        self.0
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Error(code as u64)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error({:#x}, top={:?})", self.0, self.top())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.top(), f)
    }
}

impl core::error::Error for Error {}

/// Adds [`ResultExt::push_err`] to any `Result<T, Error>`.
pub trait ResultExt<T> {
    /// Annotates an `Err` with an additional code from the calling subsystem, leaving `Ok` alone.
    fn push_err(self, code: ErrorCode) -> Result<T, Error>;
}

impl<T> ResultExt<T> for Result<T, Error> {
    fn push_err(self, code: ErrorCode) -> Result<T, Error> {
        self.map_err(|e| e.push(code))
    }
}
