//! Flattened device tree header and memory reservation block.

use byteorder::{BigEndian, ByteOrder};

use crate::address::PhysicalAddress;
use crate::error::{Error, ErrorCode};

const MAGIC: u32 = 0xD00D_FEED;
const HEADER_LEN: usize = 40;

/// The fixed-layout header every flattened device tree blob begins with.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub total_size: u32,
    pub offset_structs: u32,
    pub offset_strings: u32,
    pub offset_rsvmap: u32,
    pub version: u32,
    pub compatible_version: u32,
    pub boot_cpuid: u32,
    pub size_strings: u32,
    pub size_structs: u32,
}

impl Header {
    /// Parses the header from the start of `blob`, validating the magic number and that the
    /// header's reported total size does not exceed the buffer actually supplied.
    pub fn parse(blob: &[u8]) -> Result<Header, Error> {
        if blob.len() < HEADER_LEN {
            return Err(ErrorCode::DtTruncated.into());
        }
        let magic = BigEndian::read_u32(&blob[0..4]);
        if magic != MAGIC {
            return Err(ErrorCode::DtMagicNumber.into());
        }
        let total_size = BigEndian::read_u32(&blob[4..8]);
        if total_size as usize > blob.len() {
            return Err(ErrorCode::DtSizeMismatch.into());
        }
        Ok(Header {
            total_size,
            offset_structs: BigEndian::read_u32(&blob[8..12]),
            offset_strings: BigEndian::read_u32(&blob[12..16]),
            offset_rsvmap: BigEndian::read_u32(&blob[16..20]),
            version: BigEndian::read_u32(&blob[20..24]),
            compatible_version: BigEndian::read_u32(&blob[24..28]),
            boot_cpuid: BigEndian::read_u32(&blob[28..32]),
            size_strings: BigEndian::read_u32(&blob[32..36]),
            size_structs: BigEndian::read_u32(&blob[36..40]),
        })
    }
}

/// One entry of the memory reservation block: a physical range the bootloader has set aside and
/// the kernel must not hand out through the page allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedRegion {
    pub address: PhysicalAddress,
    pub size: u64,
}

/// Reads one reservation-block entry at `offset`: two big-endian `u64`s (16 bytes). Returns
/// `None` at the first `(0, 0)` terminator. Callers advance by 16 bytes per entry rather than
/// re-reading the same pair, which the parser this is modeled on never did.
pub fn read_reservation(blob: &[u8], offset: usize) -> Result<Option<ReservedRegion>, Error> {
    if offset + 16 > blob.len() {
        return Err(ErrorCode::DtTruncated.into());
    }
    let address = BigEndian::read_u64(&blob[offset..offset + 8]);
    let size = BigEndian::read_u64(&blob[offset + 8..offset + 16]);
    if address == 0 && size == 0 {
        Ok(None)
    } else {
        Ok(Some(ReservedRegion { address: PhysicalAddress::new(address), size }))
    }
}
