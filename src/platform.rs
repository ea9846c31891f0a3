//! Platform record handed down from the bootloader.
//!
//! This crate never speaks the Limine request protocol itself — that lives in the kernel binary,
//! which owns the `.limine_requests` section and turns bootloader responses into a
//! [`PlatformInfo`] before calling into anything here. Keeping the boundary here means every type
//! in this module is plain data, constructible from a test without reaching for `unsafe`.

use crate::address::PhysicalAddress;
use crate::hhdm::Hhdm;

/// Paging mode the bootloader entered the kernel in. Limine's RISC-V target can be asked for any
/// of these; this crate only ever implements [`PagingMode::Sv39`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingMode {
    Sv39,
    Sv48,
    Sv57,
}

/// Kind of a physical memory map entry, matching the Limine memory map protocol's categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemMapEntryKind {
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadMemory,
    BootloaderReclaimable,
    KernelAndModules,
    Framebuffer,
}

impl MemMapEntryKind {
    /// Whether general-purpose allocations may be carved out of a region of this kind.
    #[must_use]
    pub const fn is_usable(self) -> bool {
        matches!(self, MemMapEntryKind::Usable)
    }
}

/// One contiguous span of physical memory, as reported by the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemMapEntry {
    pub base: PhysicalAddress,
    pub length: u64,
    pub kind: MemMapEntryKind,
}

impl MemMapEntry {
    /// The address one past the end of this entry.
    #[must_use]
    pub fn end(self) -> PhysicalAddress {
        self.base + self.length as usize
    }
}

/// One framebuffer reported by the bootloader, as plain data — no drawing support lives here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framebuffer {
    pub address: PhysicalAddress,
    pub width: u64,
    pub height: u64,
    pub pitch: u64,
    pub bits_per_pixel: u16,
}

/// Everything the boot sequence needs out of the bootloader before the PMM, paging engine, and
/// device tree parser can be brought up.
#[derive(Debug, Clone, Copy)]
pub struct PlatformInfo<'a> {
    pub hhdm: Hhdm,
    pub paging_mode: PagingMode,
    pub memory_map: &'a [MemMapEntry],
    pub device_tree_blob: &'a [u8],
    pub framebuffers: &'a [Framebuffer],
}

impl<'a> PlatformInfo<'a> {
    /// Iterates the usable regions of the memory map, the ones the PMM should be seeded with.
    pub fn usable_regions(&self) -> impl Iterator<Item = MemMapEntry> + 'a {
        self.memory_map.iter().copied().filter(|e| e.kind.is_usable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usable_regions_filters_out_reserved_entries() {
        let entries = [
            MemMapEntry { base: PhysicalAddress::new(0), length: 0x1000, kind: MemMapEntryKind::Reserved },
            MemMapEntry { base: PhysicalAddress::new(0x1000), length: 0x2000, kind: MemMapEntryKind::Usable },
        ];
        let info = PlatformInfo {
            hhdm: Hhdm::new(0),
            paging_mode: PagingMode::Sv39,
            memory_map: &entries,
            device_tree_blob: &[],
            framebuffers: &[],
        };
        let usable: std::vec::Vec<MemMapEntry> = info.usable_regions().collect();
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].base, PhysicalAddress::new(0x1000));
    }

    #[test]
    fn platform_info_carries_reported_framebuffers() {
        let framebuffers = [Framebuffer {
            address: PhysicalAddress::new(0x4000_0000),
            width: 1024,
            height: 768,
            pitch: 4096,
            bits_per_pixel: 32,
        }];
        let info = PlatformInfo {
            hhdm: Hhdm::new(0),
            paging_mode: PagingMode::Sv39,
            memory_map: &[],
            device_tree_blob: &[],
            framebuffers: &framebuffers,
        };
        assert_eq!(info.framebuffers.len(), 1);
        assert_eq!(info.framebuffers[0].width, 1024);
    }
}
