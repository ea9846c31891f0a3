//! Flattened device tree parser.
//!
//! Parsing runs in two passes over a structure block tokenized into `BEGIN_NODE`/`END_NODE`/
//! `PROP`/`NOP`/`END` tokens. The first pass builds an arena of nodes and properties (addressed by
//! [`NodeId`]/[`PropertyId`] rather than pointers, since growing the backing [`DynamicArray`]s
//! relocates their storage) and rewrites every property whose type can be determined without
//! outside context. The second pass revisits `reg`/`ranges`/`bus-ranges` properties, which need
//! their parent's (and, for `ranges`, their own) `#address-cells`/`#size-cells` to decode.

mod header;
mod value;

pub use header::ReservedRegion;
pub use value::{DeviceStatus, RangeEntry, RawSlice, RegEntry, Value};

use core::mem::{align_of, size_of};

use byteorder::{BigEndian, ByteOrder};

use crate::allocators::bump::BumpAllocator;
use crate::collections::dynamic_array::DynamicArray;
use crate::error::{Error, ErrorCode};
use crate::hhdm::Hhdm;
use crate::pmm::Pmm;

const STRUCTURE_BEGIN_NODE: u32 = 0x01;
const STRUCTURE_END_NODE: u32 = 0x02;
const STRUCTURE_PROP: u32 = 0x03;
const STRUCTURE_NOP: u32 = 0x04;
const STRUCTURE_END: u32 = 0x09;

/// Index of a node in a [`DeviceTree`]'s node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

/// Index of a property in a [`DeviceTree`]'s property arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyId(usize);

struct Node<'dt> {
    name: &'dt str,
    address_cells: u32,
    size_cells: u32,
    first_property: Option<PropertyId>,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    next_sibling: Option<NodeId>,
}

struct Property<'dt> {
    name: &'dt str,
    next: Option<PropertyId>,
    value: Value<'dt>,
}

/// A parsed flattened device tree: an arena of nodes and properties plus the bump allocator
/// backing the typed arrays (`reg`, `ranges`, split `compatible` lists) rewritten into their
/// properties.
pub struct DeviceTree<'pmm, 'dt> {
    bump: BumpAllocator<'pmm>,
    nodes: DynamicArray<'pmm, Node<'dt>>,
    properties: DynamicArray<'pmm, Property<'dt>>,
    reserved: DynamicArray<'pmm, ReservedRegion>,
    root: NodeId,
}

fn read_cstr(bytes: &[u8]) -> Result<&str, Error> {
    let end = bytes.iter().position(|&b| b == 0).ok_or(Error::from(ErrorCode::DtTruncated))?;
    core::str::from_utf8(&bytes[..end]).map_err(|_| ErrorCode::DtUnexpectedToken.into())
}

fn read_cells(bytes: &[u8], cells: u32) -> u128 {
    let mut value: u128 = 0;
    for &b in &bytes[..4 * cells as usize] {
        value = (value << 8) | u128::from(b);
    }
    value
}

impl<'pmm, 'dt> DeviceTree<'pmm, 'dt> {
    /// Parses `blob`, which must outlive the returned tree (string-valued properties and node
    /// names borrow directly from it). `pmm`/`hhdm` back every arena the tree allocates.
    pub fn parse(blob: &'dt [u8], pmm: &'pmm Pmm, hhdm: Hhdm) -> Result<Self, Error> {
        let hdr = header::Header::parse(blob)?;

        let mut tree = DeviceTree {
            bump: BumpAllocator::new(pmm, hhdm),
            nodes: DynamicArray::new(pmm, hhdm),
            properties: DynamicArray::new(pmm, hhdm),
            reserved: DynamicArray::new(pmm, hhdm),
            root: NodeId(0),
        };

        let mut rsv_offset = hdr.offset_rsvmap as usize;
        while let Some(region) = header::read_reservation(blob, rsv_offset)? {
            tree.reserved.push(region).map_err(|e| e.push(ErrorCode::DtTruncated))?;
            rsv_offset += 16;
        }

        let structures = &blob[hdr.offset_structs as usize..];
        let strings = &blob[hdr.offset_strings as usize..];

        let mut offset = 0usize;
        let mut depth: i64 = 0;
        let mut current: Option<NodeId> = None;

        loop {
            if offset + 4 > structures.len() {
                return Err(ErrorCode::DtTruncated.into());
            }
            let token = BigEndian::read_u32(&structures[offset..offset + 4]);
            offset += 4;

            match token {
                STRUCTURE_BEGIN_NODE => {
                    let name = read_cstr(&structures[offset..])?;
                    let node_id = tree.push_node(name, current)?;
                    if let Some(parent) = current {
                        let prior_first_child = tree.nodes[parent.0].first_child;
                        tree.nodes.get_mut(node_id.0).unwrap().next_sibling = prior_first_child;
                        tree.nodes.get_mut(parent.0).unwrap().first_child = Some(node_id);
                    }
                    current = Some(node_id);
                    offset += crate::address::align_up(name.len() + 1, 4);
                    depth += 1;
                }
                STRUCTURE_END_NODE => {
                    let cur = current.ok_or(Error::from(ErrorCode::DtTruncated))?;
                    current = tree.nodes[cur.0].parent;
                    depth -= 1;
                    if depth < 0 {
                        return Err(ErrorCode::DtTruncated.into());
                    }
                }
                STRUCTURE_PROP => {
                    let cur = current.ok_or(Error::from(ErrorCode::DtUnexpectedToken))?;
                    offset = tree.parse_property(cur, structures, strings, offset)?;
                }
                STRUCTURE_NOP => {}
                STRUCTURE_END => {
                    // Valid only once every BEGIN_NODE has been matched by an END_NODE: check the
                    // depth counter explicitly rather than `current.is_none()`, which is also true
                    // partway through a malformed, unbalanced stream.
                    if depth != 0 || current.is_some() {
                        return Err(ErrorCode::DtTruncated.into());
                    }
                    break;
                }
                _ => return Err(ErrorCode::DtUnexpectedToken.into()),
            }
        }

        if tree.nodes.is_empty() {
            return Err(ErrorCode::DtNoNodes.into());
        }

        tree.nodes.get_mut(0).unwrap().name = "/";
        tree.nodes.get_mut(0).unwrap().address_cells = 2;
        tree.nodes.get_mut(0).unwrap().size_cells = 1;
        tree.rewrite_node(tree.root).map_err(|e| e.push(ErrorCode::DtRewriteFailed))?;

        Ok(tree)
    }

    fn push_node(&mut self, name: &'dt str, parent: Option<NodeId>) -> Result<NodeId, Error> {
        let idx = self
            .nodes
            .push(Node {
                name,
                address_cells: 0,
                size_cells: 0,
                first_property: None,
                parent,
                first_child: None,
                next_sibling: None,
            })
            .map_err(|e| e.push(ErrorCode::DtTruncated))?;
        Ok(NodeId(idx))
    }

    fn parse_property(
        &mut self,
        node: NodeId,
        structures: &'dt [u8],
        strings: &'dt [u8],
        mut offset: usize,
    ) -> Result<usize, Error> {
        if offset + 8 > structures.len() {
            return Err(ErrorCode::DtTruncated.into());
        }
        let length = BigEndian::read_u32(&structures[offset..offset + 4]) as usize;
        offset += 4;
        let name_offset = BigEndian::read_u32(&structures[offset..offset + 4]) as usize;
        offset += 4;

        let name = read_cstr(&strings[name_offset..])?;
        if offset + length > structures.len() {
            return Err(ErrorCode::DtTruncated.into());
        }
        let raw = &structures[offset..offset + length];
        offset += crate::address::align_up(length, 4);

        let prior_head = self.nodes[node.0].first_property;
        let pid = self
            .properties
            .push(Property { name, next: prior_head, value: Value::Raw(raw) })
            .map_err(|e| e.push(ErrorCode::DtTruncated))?;
        self.nodes.get_mut(node.0).unwrap().first_property = Some(PropertyId(pid));

        Ok(offset)
    }

    fn decode_compatible(&mut self, raw: &'dt [u8]) -> Result<RawSlice<&'dt str>, Error> {
        if raw.is_empty() {
            return Ok(RawSlice::empty());
        }
        let count = raw.iter().filter(|&&b| b == 0).count();
        let bytes = self
            .bump
            .alloc_aligned(count * size_of::<&str>(), align_of::<&str>())
            .map_err(|e| e.push(ErrorCode::DtRewriteFailed))?;
        let array = bytes.cast::<&'dt str>();

        let mut cursor = 0;
        for i in 0..count {
            let s = read_cstr(&raw[cursor..])?;
            unsafe { array.as_ptr().add(i).write(s) };
            cursor += s.len() + 1;
        }
        Ok(RawSlice::new(array, count))
    }

    fn decode_pairs(
        &mut self,
        raw: &[u8],
        stride_cells: (u32, u32),
    ) -> Result<RawSlice<RegEntry>, Error> {
        let (a_cells, b_cells) = stride_cells;
        let stride = 4 * (a_cells + b_cells) as usize;
        if stride == 0 || raw.is_empty() {
            return Ok(RawSlice::empty());
        }
        if raw.len() % stride != 0 {
            return Err(ErrorCode::DtUnexpectedToken.into());
        }
        let count = raw.len() / stride;
        let array = self
            .bump
            .alloc_aligned(count * size_of::<RegEntry>(), align_of::<RegEntry>())
            .map_err(|e| e.push(ErrorCode::DtRewriteFailed))?
            .cast::<RegEntry>();

        for i in 0..count {
            let entry = &raw[i * stride..(i + 1) * stride];
            let address = read_cells(entry, a_cells);
            let size = read_cells(&entry[4 * a_cells as usize..], b_cells);
            unsafe { array.as_ptr().add(i).write(RegEntry { address, size }) };
        }
        Ok(RawSlice::new(array, count))
    }

    fn decode_ranges(
        &mut self,
        raw: &[u8],
        child_cells: u32,
        parent_cells: u32,
        size_cells: u32,
    ) -> Result<RawSlice<RangeEntry>, Error> {
        let stride = 4 * (child_cells + parent_cells + size_cells) as usize;
        if stride == 0 || raw.is_empty() {
            return Ok(RawSlice::empty());
        }
        if raw.len() % stride != 0 {
            return Err(ErrorCode::DtUnexpectedToken.into());
        }
        let count = raw.len() / stride;
        let array = self
            .bump
            .alloc_aligned(count * size_of::<RangeEntry>(), align_of::<RangeEntry>())
            .map_err(|e| e.push(ErrorCode::DtRewriteFailed))?
            .cast::<RangeEntry>();

        for i in 0..count {
            let entry = &raw[i * stride..(i + 1) * stride];
            let mut pos = 0;
            let child_address = read_cells(&entry[pos..], child_cells);
            pos += 4 * child_cells as usize;
            let parent_address = read_cells(&entry[pos..], parent_cells);
            pos += 4 * parent_cells as usize;
            let size = read_cells(&entry[pos..], size_cells);
            unsafe {
                array.as_ptr().add(i).write(RangeEntry { child_address, parent_address, size })
            };
        }
        Ok(RawSlice::new(array, count))
    }

    fn rewrite_node(&mut self, id: NodeId) -> Result<(), Error> {
        // Inherit the parent's already-resolved cell counts before this node's own lap 1 runs, so
        // an explicit `#address-cells`/`#size-cells` property below can still override them.
        if let Some(parent) = self.nodes[id.0].parent {
            let (address_cells, size_cells) =
                (self.nodes[parent.0].address_cells, self.nodes[parent.0].size_cells);
            let node = self.nodes.get_mut(id.0).unwrap();
            node.address_cells = address_cells;
            node.size_cells = size_cells;
        }

        let mut cur = self.nodes[id.0].first_property;
        while let Some(pid) = cur {
            let (name, raw, next) = {
                let prop = &self.properties[pid.0];
                let raw = match &prop.value {
                    Value::Raw(r) => *r,
                    _ => &[][..],
                };
                (prop.name, raw, prop.next)
            };

            let new_value = match name {
                "compatible" => Some(Value::Compatible(self.decode_compatible(raw)?)),
                "model" => Some(Value::Model(read_cstr(raw).unwrap_or(""))),
                "phandle" | "linux,phandle" => {
                    Some(Value::Phandle(BigEndian::read_u32(raw)))
                }
                "status" => {
                    let s = core::str::from_utf8(raw)
                        .map(|s| s.trim_end_matches('\0'))
                        .unwrap_or("");
                    let (status, reason) = if s == "okay" {
                        (DeviceStatus::Okay, "")
                    } else if s == "disabled" {
                        (DeviceStatus::Disabled, "")
                    } else if s == "reserved" {
                        (DeviceStatus::Reserved, "")
                    } else if let Some(reason) = s.strip_prefix("fail-") {
                        (DeviceStatus::FailWithReason, reason)
                    } else {
                        (DeviceStatus::Fail, "")
                    };
                    Some(Value::Status(status, reason))
                }
                "#address-cells" => {
                    let cells = BigEndian::read_u32(raw);
                    if cells > 3 {
                        return Err(ErrorCode::DtAddressCellsTooLarge.into());
                    }
                    self.nodes.get_mut(id.0).unwrap().address_cells = cells;
                    Some(Value::AddressCells(cells))
                }
                "#size-cells" => {
                    let cells = BigEndian::read_u32(raw);
                    if cells > 2 {
                        return Err(ErrorCode::DtSizeCellsTooLarge.into());
                    }
                    self.nodes.get_mut(id.0).unwrap().size_cells = cells;
                    Some(Value::SizeCells(cells))
                }
                "dma-coherent" => Some(Value::DmaCoherence(true)),
                "dma-noncoherent" => Some(Value::DmaCoherence(false)),
                "device_type" => Some(Value::DeviceType(read_cstr(raw).unwrap_or(""))),
                "virtual-reg" => Some(Value::VirtualReg(BigEndian::read_u32(raw))),
                "interrupt-parent" => Some(Value::InterruptParent(BigEndian::read_u32(raw))),
                "#interrupt-cells" => Some(Value::InterruptCells(BigEndian::read_u32(raw))),
                "interrupt-controller" => Some(Value::InterruptController),
                // Left raw: recognized as valid but not yet decoded into a typed shape.
                "interrupts" | "interrupt-map" | "interrupt-map-mask" | "regmap" | "value" => None,
                "reg" | "ranges" | "bus-ranges" => None,
                _ => {
                    log::warn!("unhandled device tree property: {name}");
                    None
                }
            };

            if let Some(value) = new_value {
                self.properties.get_mut(pid.0).unwrap().value = value;
            }
            cur = next;
        }

        // Second lap: `reg`/`ranges`/`bus-ranges` need the parent's (and own) cell counts, which
        // may have been set by a `#address-cells`/`#size-cells` property visited above in the
        // first lap but belonging to the parent rather than this node.
        let parent = self.nodes[id.0].parent;
        let (own_addr_cells, own_size_cells) = (self.nodes[id.0].address_cells, self.nodes[id.0].size_cells);
        let (parent_addr_cells, parent_size_cells) = match parent {
            Some(p) => (self.nodes[p.0].address_cells, self.nodes[p.0].size_cells),
            None => (own_addr_cells, own_size_cells),
        };

        let mut cur = self.nodes[id.0].first_property;
        while let Some(pid) = cur {
            let (name, raw, next) = {
                let prop = &self.properties[pid.0];
                let raw = match &prop.value {
                    Value::Raw(r) => *r,
                    _ => &[][..],
                };
                (prop.name, raw, prop.next)
            };
            if parent.is_some() && name == "reg" {
                let reg = self.decode_pairs(raw, (parent_addr_cells, parent_size_cells))?;
                self.properties.get_mut(pid.0).unwrap().value = Value::Reg(reg);
            } else if parent.is_some() && (name == "ranges" || name == "bus-ranges") {
                let ranges =
                    self.decode_ranges(raw, own_addr_cells, parent_addr_cells, own_size_cells)?;
                self.properties.get_mut(pid.0).unwrap().value = Value::Ranges(ranges);
            }
            cur = next;
        }

        let mut child = self.nodes[id.0].first_child;
        while let Some(child_id) = child {
            self.rewrite_node(child_id)?;
            child = self.nodes[child_id.0].next_sibling;
        }
        Ok(())
    }

    /// The tree's root node (always present, named `/` by convention of its callers).
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// A node's name as it appeared in the structure block (empty string for the root).
    #[must_use]
    pub fn node_name(&self, id: NodeId) -> &'dt str {
        self.nodes[id.0].name
    }

    #[must_use]
    pub fn address_cells(&self, id: NodeId) -> u32 {
        self.nodes[id.0].address_cells
    }

    #[must_use]
    pub fn size_cells(&self, id: NodeId) -> u32 {
        self.nodes[id.0].size_cells
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Iterates over `id`'s direct children, in reverse structure-block order (the last child
    /// encountered while parsing becomes the first one returned here).
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        ChildrenIter { tree: self, next: self.nodes[id.0].first_child }
    }

    /// Iterates over `id`'s properties, in reverse structure-block order.
    pub fn properties(&self, id: NodeId) -> PropertiesIter<'_, 'pmm, 'dt> {
        PropertiesIter { tree: self, next: self.nodes[id.0].first_property }
    }

    /// Looks up a single property on `id` by name.
    #[must_use]
    pub fn property(&self, id: NodeId, name: &str) -> Option<&Value<'dt>> {
        self.properties(id).find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// The blob's memory reservation block.
    pub fn reserved_regions(&self) -> impl Iterator<Item = &ReservedRegion> {
        self.reserved.iter()
    }
}

struct ChildrenIter<'a, 'pmm, 'dt> {
    tree: &'a DeviceTree<'pmm, 'dt>,
    next: Option<NodeId>,
}

impl Iterator for ChildrenIter<'_, '_, '_> {
    type Item = NodeId;
    fn next(&mut self) -> Option<NodeId> {
        let cur = self.next?;
        self.next = self.tree.nodes[cur.0].next_sibling;
        Some(cur)
    }
}

/// Iterator over a node's properties, returned by [`DeviceTree::properties`].
pub struct PropertiesIter<'a, 'pmm, 'dt> {
    tree: &'a DeviceTree<'pmm, 'dt>,
    next: Option<PropertyId>,
}

impl<'a, 'dt> Iterator for PropertiesIter<'a, '_, 'dt> {
    type Item = (&'dt str, &'a Value<'dt>);
    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.next?;
        let prop = &self.tree.properties[cur.0];
        self.next = prop.next;
        Some((prop.name, &prop.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::PhysicalAddress;
    use crate::pmm::Policy;

    fn setup_pmm() -> Pmm {
        let _ = env_logger::builder().is_test(true).try_init();
        let hhdm = Hhdm::new(0);
        let bootstrap =
            std::boxed::Box::leak(std::vec![0u8; crate::pmm::BOOTSTRAP_BUF_SIZE].into_boxed_slice());
        let pmm = Pmm::new(Policy::FirstFit, hhdm, bootstrap);
        let region: &'static mut [u8] =
            std::boxed::Box::leak(std::vec![0u8; 512 * crate::address::PAGE_SIZE].into_boxed_slice());
        let base = PhysicalAddress::new(region.as_ptr() as u64);
        pmm.add_region(base, region.len()).unwrap();
        pmm
    }

    fn push_u32(buf: &mut std::vec::Vec<u8>, value: u32) {
        let mut b = [0u8; 4];
        BigEndian::write_u32(&mut b, value);
        buf.extend_from_slice(&b);
    }

    fn push_padded(buf: &mut std::vec::Vec<u8>, bytes: &[u8]) {
        buf.extend_from_slice(bytes);
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
    }

    /// Builds a minimal blob with a root node, one `#address-cells`/`#size-cells` pair, a
    /// `compatible` property, and one child node with a `reg` property.
    fn minimal_blob() -> std::vec::Vec<u8> {
        let mut structs = std::vec::Vec::new();
        let mut strings = std::vec::Vec::new();

        let mut str_off = |strings: &mut std::vec::Vec<u8>, s: &str| -> u32 {
            let off = strings.len() as u32;
            strings.extend_from_slice(s.as_bytes());
            strings.push(0);
            off
        };

        // root node "/"
        push_u32(&mut structs, STRUCTURE_BEGIN_NODE);
        push_padded(&mut structs, b"\0");

        // #address-cells = 2
        push_u32(&mut structs, STRUCTURE_PROP);
        push_u32(&mut structs, 4);
        let off = str_off(&mut strings, "#address-cells");
        push_u32(&mut structs, off);
        push_padded(&mut structs, &2u32.to_be_bytes());

        // compatible = "vendor,board\0"
        push_u32(&mut structs, STRUCTURE_PROP);
        let value = b"vendor,board\0";
        push_u32(&mut structs, value.len() as u32);
        let off = str_off(&mut strings, "compatible");
        push_u32(&mut structs, off);
        push_padded(&mut structs, value);

        // child node "cpu"
        push_u32(&mut structs, STRUCTURE_BEGIN_NODE);
        push_padded(&mut structs, b"cpu\0");

        // reg = <0x8000 0x1000> (parent has 2 address cells, 1 size cell -> stride 12 bytes)
        push_u32(&mut structs, STRUCTURE_PROP);
        push_u32(&mut structs, 12);
        let off = str_off(&mut strings, "reg");
        push_u32(&mut structs, off);
        let mut reg_bytes = std::vec::Vec::new();
        reg_bytes.extend_from_slice(&0u32.to_be_bytes());
        reg_bytes.extend_from_slice(&0x8000u32.to_be_bytes());
        reg_bytes.extend_from_slice(&0x1000u32.to_be_bytes());
        push_padded(&mut structs, &reg_bytes);

        push_u32(&mut structs, STRUCTURE_END_NODE); // end cpu
        push_u32(&mut structs, STRUCTURE_END_NODE); // end root
        push_u32(&mut structs, STRUCTURE_END);

        let header_len = 40;
        let rsvmap_off = header_len;
        let rsvmap = [0u8; 16]; // immediate (0,0) terminator
        let structs_off = rsvmap_off + rsvmap.len();
        let strings_off = structs_off + structs.len();

        let mut blob = std::vec![0u8; strings_off + strings.len()];
        BigEndian::write_u32(&mut blob[0..4], 0xD00D_FEED);
        BigEndian::write_u32(&mut blob[8..12], structs_off as u32);
        BigEndian::write_u32(&mut blob[12..16], strings_off as u32);
        BigEndian::write_u32(&mut blob[16..20], rsvmap_off as u32);
        blob[rsvmap_off..rsvmap_off + 16].copy_from_slice(&rsvmap);
        blob[structs_off..structs_off + structs.len()].copy_from_slice(&structs);
        blob[strings_off..strings_off + strings.len()].copy_from_slice(&strings);
        BigEndian::write_u32(&mut blob[4..8], blob.len() as u32);
        blob
    }

    #[test]
    fn parses_root_and_child() {
        let pmm = setup_pmm();
        let blob = minimal_blob();
        let tree = DeviceTree::parse(&blob, &pmm, Hhdm::new(0)).unwrap();

        let root = tree.root();
        assert_eq!(tree.address_cells(root), 2);

        let child = tree.children(root).next().unwrap();
        assert_eq!(tree.node_name(child), "cpu");
    }

    #[test]
    fn decodes_compatible_list() {
        let pmm = setup_pmm();
        let blob = minimal_blob();
        let tree = DeviceTree::parse(&blob, &pmm, Hhdm::new(0)).unwrap();
        match tree.property(tree.root(), "compatible").unwrap() {
            Value::Compatible(list) => {
                let items = unsafe { list.as_slice() };
                assert_eq!(items, &["vendor,board"]);
            }
            _ => panic!("expected Compatible"),
        }
    }

    #[test]
    fn decodes_reg_using_parent_cells() {
        let pmm = setup_pmm();
        let blob = minimal_blob();
        let tree = DeviceTree::parse(&blob, &pmm, Hhdm::new(0)).unwrap();
        let child = tree.children(tree.root()).next().unwrap();
        match tree.property(child, "reg").unwrap() {
            Value::Reg(entries) => {
                let entries = unsafe { entries.as_slice() };
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].address, 0x8000);
                assert_eq!(entries[0].size, 0x1000);
            }
            _ => panic!("expected Reg"),
        }
    }

    /// Builds a blob with no properties on the root at all: root -> "soc" (no cells property of
    /// its own) -> "uart" with a `reg` property, to exercise cell-count inheritance transitively
    /// through an intermediate node that never declares `#address-cells`/`#size-cells` itself.
    fn blob_with_uncelled_intermediate() -> std::vec::Vec<u8> {
        let mut structs = std::vec::Vec::new();
        let mut strings = std::vec::Vec::new();

        let mut str_off = |strings: &mut std::vec::Vec<u8>, s: &str| -> u32 {
            let off = strings.len() as u32;
            strings.extend_from_slice(s.as_bytes());
            strings.push(0);
            off
        };

        push_u32(&mut structs, STRUCTURE_BEGIN_NODE);
        push_padded(&mut structs, b"\0");

        push_u32(&mut structs, STRUCTURE_BEGIN_NODE);
        push_padded(&mut structs, b"soc\0");

        push_u32(&mut structs, STRUCTURE_BEGIN_NODE);
        push_padded(&mut structs, b"uart\0");

        // reg = <0x1000_0000 0x1000>, decoded against soc's inherited (2, 1) cells.
        push_u32(&mut structs, STRUCTURE_PROP);
        push_u32(&mut structs, 12);
        let off = str_off(&mut strings, "reg");
        push_u32(&mut structs, off);
        let mut reg_bytes = std::vec::Vec::new();
        reg_bytes.extend_from_slice(&0u32.to_be_bytes());
        reg_bytes.extend_from_slice(&0x1000_0000u32.to_be_bytes());
        reg_bytes.extend_from_slice(&0x1000u32.to_be_bytes());
        push_padded(&mut structs, &reg_bytes);

        push_u32(&mut structs, STRUCTURE_END_NODE); // end uart
        push_u32(&mut structs, STRUCTURE_END_NODE); // end soc
        push_u32(&mut structs, STRUCTURE_END_NODE); // end root
        push_u32(&mut structs, STRUCTURE_END);

        let header_len = 40;
        let rsvmap_off = header_len;
        let rsvmap = [0u8; 16];
        let structs_off = rsvmap_off + rsvmap.len();
        let strings_off = structs_off + structs.len();

        let mut blob = std::vec![0u8; strings_off + strings.len()];
        BigEndian::write_u32(&mut blob[0..4], 0xD00D_FEED);
        BigEndian::write_u32(&mut blob[8..12], structs_off as u32);
        BigEndian::write_u32(&mut blob[12..16], strings_off as u32);
        BigEndian::write_u32(&mut blob[16..20], rsvmap_off as u32);
        blob[rsvmap_off..rsvmap_off + 16].copy_from_slice(&rsvmap);
        blob[structs_off..structs_off + structs.len()].copy_from_slice(&structs);
        blob[strings_off..strings_off + strings.len()].copy_from_slice(&strings);
        BigEndian::write_u32(&mut blob[4..8], blob.len() as u32);
        blob
    }

    #[test]
    fn root_name_is_forced_to_slash() {
        let pmm = setup_pmm();
        let blob = minimal_blob();
        let tree = DeviceTree::parse(&blob, &pmm, Hhdm::new(0)).unwrap();
        assert_eq!(tree.node_name(tree.root()), "/");
    }

    #[test]
    fn cell_counts_inherit_through_an_uncelled_intermediate_node() {
        let pmm = setup_pmm();
        let blob = blob_with_uncelled_intermediate();
        let tree = DeviceTree::parse(&blob, &pmm, Hhdm::new(0)).unwrap();

        let soc = tree.children(tree.root()).next().unwrap();
        assert_eq!(tree.address_cells(soc), 2);
        assert_eq!(tree.size_cells(soc), 1);

        let uart = tree.children(soc).next().unwrap();
        match tree.property(uart, "reg").unwrap() {
            Value::Reg(entries) => {
                let entries = unsafe { entries.as_slice() };
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].address, 0x1000_0000);
                assert_eq!(entries[0].size, 0x1000);
            }
            _ => panic!("expected Reg"),
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let pmm = setup_pmm();
        let blob = std::vec![0u8; 64];
        let err = DeviceTree::parse(&blob, &pmm, Hhdm::new(0)).unwrap_err();
        assert_eq!(err.top(), ErrorCode::DtMagicNumber);
    }
}
