// Node data model: the seven implemented variants (key, int32, int64,
// double, string, binary, link) plus the two reserved-but-rejected
// long-string/long-binary tags, and the byte-level encode/decode of a node
// struct packed at some slot offset inside a data page.

use crate::storage::error::HiveError;
use crate::storage::layout::{
    align4, read_offset, write_offset, MAX_BINARY_LEN, MAX_NAME_LEN, MAX_STRING_LEN, NodeType,
    OffsetWidth,
};

/// In-memory view of a node's fixed header, decoded from its packed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    /// Balance factor in {-1, 0, 1}.
    pub balance_factor: i8,
    pub node_type: u8,
    /// Total node size in bytes (always a multiple of 4).
    pub size: usize,
    /// Index of this node's entry in the page's slot array.
    pub slot_idx: u16,
    pub left: u64,
    pub right: u64,
}

/// Decoded node payload, variant per `NodeType`.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    Key {
        children_root: u64,
        values_root: u64,
        depth: u16,
    },
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    Link(u64),
}

impl NodeValue {
    pub fn type_tag(&self) -> NodeType {
        match self {
            NodeValue::Key { .. } => NodeType::Key,
            NodeValue::Int32(_) => NodeType::Int32,
            NodeValue::Int64(_) => NodeType::Int64,
            NodeValue::Double(_) => NodeType::Double,
            NodeValue::String(_) => NodeType::String,
            NodeValue::Binary(_) => NodeType::Binary,
            NodeValue::Link(_) => NodeType::Link,
        }
    }

    pub fn is_key(&self) -> bool {
        matches!(self, NodeValue::Key { .. })
    }
}

/// Byte offset of the refs block (`left`/`right`) within a node.
const REFS_OFFSET: usize = 4;

fn refs_pad(width: OffsetWidth) -> usize {
    match width {
        OffsetWidth::Offset32 => 4,
        OffsetWidth::Offset64 => 0,
    }
}

fn name_len_offset(width: OffsetWidth) -> usize {
    REFS_OFFSET + 2 * width.size() + refs_pad(width)
}

fn pack_composite(balance_factor: i8, node_type: u8, size_words: u16) -> u16 {
    let bf_bits = ((balance_factor + 1) as u16) & 0x3;
    let ty_bits = (node_type as u16 & 0xF) << 2;
    let size_bits = (size_words & 0x3FF) << 6;
    bf_bits | ty_bits | size_bits
}

fn unpack_composite(v: u16) -> (i8, u8, u16) {
    let bf = (v & 0x3) as i8 - 1;
    let ty = ((v >> 2) & 0xF) as u8;
    let size_words = (v >> 6) & 0x3FF;
    (bf, ty, size_words)
}

/// Fixed-data byte length for a given node value, excluding name and header.
fn fixed_data_len(value: &NodeValue, width: OffsetWidth) -> usize {
    match value {
        NodeValue::Key { .. } => 2 * width.size() + 4, // two refs + depth(2) + pad(2)
        NodeValue::Int32(_) => 4,
        NodeValue::Int64(_) => 8,
        NodeValue::Double(_) => 8,
        NodeValue::String(s) => 1 + s.len() + 1, // len byte + payload + NUL
        NodeValue::Binary(b) => 1 + b.len(),
        NodeValue::Link(_) => width.size(),
    }
}

/// Total encoded size (4-byte aligned) of a node with the given name and value.
pub fn encoded_size(name: &str, value: &NodeValue, width: OffsetWidth) -> usize {
    let header_len = name_len_offset(width) + 1; // up to and including the name-length byte
    let with_name = header_len + name.len();
    let aligned = align4(with_name);
    align4(aligned + fixed_data_len(value, width))
}

/// Validate name/payload sizes against the format's fixed limits.
pub fn validate(name: &str, value: &NodeValue) -> Result<(), HiveError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(HiveError::Param(format!(
            "key name length {} out of range 1..={}",
            name.len(),
            MAX_NAME_LEN
        )));
    }
    match value {
        NodeValue::String(s) => {
            if s.len() + 1 > MAX_STRING_LEN {
                return Err(HiveError::Param(format!(
                    "string payload length {} (+NUL) exceeds {}",
                    s.len(),
                    MAX_STRING_LEN
                )));
            }
        }
        NodeValue::Binary(b) => {
            if b.len() > MAX_BINARY_LEN {
                return Err(HiveError::Param(format!(
                    "binary payload length {} exceeds {}",
                    b.len(),
                    MAX_BINARY_LEN
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Write a complete node (header + name + payload) at `buf[at..]`.
/// `buf` is the full 4096-byte page buffer; `at` is the node's byte offset
/// within the page. `size` must equal `encoded_size(name, value, width)`.
pub fn encode_node(
    buf: &mut [u8],
    at: usize,
    width: OffsetWidth,
    header: &NodeHeader,
    name: &str,
    value: &NodeValue,
) {
    let composite = pack_composite(header.balance_factor, header.node_type, (header.size / 4) as u16);
    buf[at..at + 2].copy_from_slice(&composite.to_ne_bytes());
    buf[at + 2..at + 4].copy_from_slice(&header.slot_idx.to_ne_bytes());
    write_offset(buf, at + REFS_OFFSET, width, header.left);
    write_offset(buf, at + REFS_OFFSET + width.size(), width, header.right);

    let nlo = at + name_len_offset(width);
    buf[nlo] = name.len() as u8;
    let name_start = nlo + 1;
    buf[name_start..name_start + name.len()].copy_from_slice(name.as_bytes());

    let fixed_start = at + align4(name_len_offset(width) + 1 + name.len());
    write_value(buf, fixed_start, width, value);
}

fn write_value(buf: &mut [u8], at: usize, width: OffsetWidth, value: &NodeValue) {
    match value {
        NodeValue::Key {
            children_root,
            values_root,
            depth,
        } => {
            write_offset(buf, at, width, *children_root);
            write_offset(buf, at + width.size(), width, *values_root);
            buf[at + 2 * width.size()..at + 2 * width.size() + 2]
                .copy_from_slice(&depth.to_ne_bytes());
        }
        NodeValue::Int32(v) => buf[at..at + 4].copy_from_slice(&v.to_ne_bytes()),
        NodeValue::Int64(v) => {
            let bits = *v as u64;
            buf[at..at + 4].copy_from_slice(&((bits & 0xFFFF_FFFF) as u32).to_ne_bytes());
            buf[at + 4..at + 8].copy_from_slice(&((bits >> 32) as u32).to_ne_bytes());
        }
        NodeValue::Double(v) => {
            let bits = v.to_bits();
            buf[at..at + 4].copy_from_slice(&((bits & 0xFFFF_FFFF) as u32).to_ne_bytes());
            buf[at + 4..at + 8].copy_from_slice(&((bits >> 32) as u32).to_ne_bytes());
        }
        NodeValue::String(s) => {
            let total = s.len() + 1; // including NUL
            buf[at] = total as u8;
            let payload_start = at + 1;
            buf[payload_start..payload_start + s.len()].copy_from_slice(s.as_bytes());
            buf[payload_start + s.len()] = 0;
        }
        NodeValue::Binary(b) => {
            buf[at] = b.len() as u8;
            buf[at + 1..at + 1 + b.len()].copy_from_slice(b);
        }
        NodeValue::Link(target) => write_offset(buf, at, width, *target),
    }
}

/// Rewrite just the balance factor of a node already encoded at `buf[at..]`,
/// leaving type, size, name and payload untouched. Used by the AVL
/// operator's balance-maintenance passes, which never change a node's size.
pub fn set_balance_factor(buf: &mut [u8], at: usize, balance_factor: i8) {
    let composite = u16::from_ne_bytes(buf[at..at + 2].try_into().unwrap());
    let (_, ty, size_words) = unpack_composite(composite);
    let new_composite = pack_composite(balance_factor, ty, size_words);
    buf[at..at + 2].copy_from_slice(&new_composite.to_ne_bytes());
}

/// Rewrite just the `left`/`right` AVL child references of a node already
/// encoded at `buf[at..]`.
pub fn set_refs(buf: &mut [u8], at: usize, width: OffsetWidth, left: u64, right: u64) {
    write_offset(buf, at + REFS_OFFSET, width, left);
    write_offset(buf, at + REFS_OFFSET + width.size(), width, right);
}

/// Rewrite a key node's `children_root`/`values_root` fields in place (its
/// `depth` is immutable after creation). Used when a subtree's root
/// changes under an AVL rotation whose parent is a key node rather than
/// the file header.
pub fn set_key_roots(buf: &mut [u8], at: usize, width: OffsetWidth, children_root: u64, values_root: u64) {
    let nlo = at + name_len_offset(width);
    let name_len = buf[nlo] as usize;
    let fixed_start = at + align4(name_len_offset(width) + 1 + name_len);
    write_offset(buf, fixed_start, width, children_root);
    write_offset(buf, fixed_start + width.size(), width, values_root);
}

/// Read a node header at `buf[at..]`.
pub fn decode_header(buf: &[u8], at: usize, width: OffsetWidth) -> NodeHeader {
    let composite = u16::from_ne_bytes(buf[at..at + 2].try_into().unwrap());
    let (bf, ty, size_words) = unpack_composite(composite);
    let slot_idx = u16::from_ne_bytes(buf[at + 2..at + 4].try_into().unwrap());
    let left = read_offset(buf, at + REFS_OFFSET, width);
    let right = read_offset(buf, at + REFS_OFFSET + width.size(), width);
    NodeHeader {
        balance_factor: bf,
        node_type: ty,
        size: size_words as usize * 4,
        slot_idx,
        left,
        right,
    }
}

/// Read a node's name at `buf[at..]`.
pub fn decode_name(buf: &[u8], at: usize, width: OffsetWidth) -> String {
    let nlo = at + name_len_offset(width);
    let len = buf[nlo] as usize;
    let start = nlo + 1;
    String::from_utf8_lossy(&buf[start..start + len]).into_owned()
}

/// Read a node's full payload, given its header (for `node_type`) and name length.
pub fn decode_value(
    buf: &[u8],
    at: usize,
    width: OffsetWidth,
    header: &NodeHeader,
) -> Result<NodeValue, HiveError> {
    let nlo = at + name_len_offset(width);
    let name_len = buf[nlo] as usize;
    let fixed_start = at + align4(name_len_offset(width) + 1 + name_len);

    let node_type = NodeType::from_tag(header.node_type)
        .ok_or_else(|| HiveError::Corrupt(format!("unknown node type tag {}", header.node_type)))?;

    Ok(match node_type {
        NodeType::Key => {
            let children_root = read_offset(buf, fixed_start, width);
            let values_root = read_offset(buf, fixed_start + width.size(), width);
            let depth = u16::from_ne_bytes(
                buf[fixed_start + 2 * width.size()..fixed_start + 2 * width.size() + 2]
                    .try_into()
                    .unwrap(),
            );
            NodeValue::Key {
                children_root,
                values_root,
                depth,
            }
        }
        NodeType::Int32 => {
            NodeValue::Int32(i32::from_ne_bytes(buf[fixed_start..fixed_start + 4].try_into().unwrap()))
        }
        NodeType::Int64 => {
            let lo = u32::from_ne_bytes(buf[fixed_start..fixed_start + 4].try_into().unwrap()) as u64;
            let hi = u32::from_ne_bytes(buf[fixed_start + 4..fixed_start + 8].try_into().unwrap()) as u64;
            NodeValue::Int64(((hi << 32) | lo) as i64)
        }
        NodeType::Double => {
            let lo = u32::from_ne_bytes(buf[fixed_start..fixed_start + 4].try_into().unwrap()) as u64;
            let hi = u32::from_ne_bytes(buf[fixed_start + 4..fixed_start + 8].try_into().unwrap()) as u64;
            NodeValue::Double(f64::from_bits((hi << 32) | lo))
        }
        NodeType::String => {
            let total = buf[fixed_start] as usize; // includes NUL
            let payload_start = fixed_start + 1;
            let s = &buf[payload_start..payload_start + total.saturating_sub(1)];
            NodeValue::String(String::from_utf8_lossy(s).into_owned())
        }
        NodeType::Binary => {
            let len = buf[fixed_start] as usize;
            let payload_start = fixed_start + 1;
            NodeValue::Binary(buf[payload_start..payload_start + len].to_vec())
        }
        NodeType::Link => NodeValue::Link(read_offset(buf, fixed_start, width)),
        NodeType::LongString | NodeType::LongBinary => {
            return Err(HiveError::Mismatch(
                "long-string/long-binary nodes are not implemented".into(),
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(width: OffsetWidth, value: NodeValue) {
        let name = "example";
        validate(name, &value).unwrap();
        let size = encoded_size(name, &value, width);
        let mut page = vec![0u8; 4096];
        let at = 64usize;
        let header = NodeHeader {
            balance_factor: 0,
            node_type: value.type_tag() as u8,
            size,
            slot_idx: 3,
            left: 0,
            right: 0,
        };
        encode_node(&mut page, at, width, &header, name, &value);

        let decoded_header = decode_header(&page, at, width);
        assert_eq!(decoded_header.size, size);
        assert_eq!(decoded_header.slot_idx, 3);
        assert_eq!(decode_name(&page, at, width), name);
        let decoded_value = decode_value(&page, at, width, &decoded_header).unwrap();
        assert_eq!(decoded_value, value);
    }

    #[test]
    fn test_roundtrip_all_types_both_widths() {
        for width in [OffsetWidth::Offset32, OffsetWidth::Offset64] {
            roundtrip(width, NodeValue::Int32(-42));
            roundtrip(width, NodeValue::Int64(-1234567890123));
            roundtrip(width, NodeValue::Double(3.14159265358979));
            roundtrip(width, NodeValue::String("hello world".into()));
            roundtrip(width, NodeValue::Binary(vec![1, 2, 3, 4, 5]));
            roundtrip(width, NodeValue::Link(8192));
            roundtrip(
                width,
                NodeValue::Key {
                    children_root: 4096,
                    values_root: 8192,
                    depth: 3,
                },
            );
        }
    }

    #[test]
    fn test_set_balance_factor_and_refs_preserve_name_and_payload() {
        for width in [OffsetWidth::Offset32, OffsetWidth::Offset64] {
            let value = NodeValue::Int32(99);
            let size = encoded_size("node", &value, width);
            let mut page = vec![0u8; 4096];
            let at = 64usize;
            let header = NodeHeader {
                balance_factor: 0,
                node_type: value.type_tag() as u8,
                size,
                slot_idx: 1,
                left: 0,
                right: 0,
            };
            encode_node(&mut page, at, width, &header, "node", &value);

            set_balance_factor(&mut page, at, 1);
            set_refs(&mut page, at, width, 100, 200);

            let decoded = decode_header(&page, at, width);
            assert_eq!(decoded.balance_factor, 1);
            assert_eq!(decoded.left, 100);
            assert_eq!(decoded.right, 200);
            assert_eq!(decoded.size, size);
            assert_eq!(decode_name(&page, at, width), "node");
            assert_eq!(
                decode_value(&page, at, width, &decoded).unwrap(),
                NodeValue::Int32(99)
            );
        }
    }

    #[test]
    fn test_set_key_roots_updates_only_roots() {
        for width in [OffsetWidth::Offset32, OffsetWidth::Offset64] {
            let value = NodeValue::Key {
                children_root: 1,
                values_root: 2,
                depth: 0,
            };
            let size = encoded_size("k", &value, width);
            let mut page = vec![0u8; 4096];
            let at = 64usize;
            let header = NodeHeader {
                balance_factor: 0,
                node_type: value.type_tag() as u8,
                size,
                slot_idx: 0,
                left: 0,
                right: 0,
            };
            encode_node(&mut page, at, width, &header, "k", &value);
            set_key_roots(&mut page, at, width, 4096, 8192);
            let decoded_header = decode_header(&page, at, width);
            match decode_value(&page, at, width, &decoded_header).unwrap() {
                NodeValue::Key { children_root, values_root, depth } => {
                    assert_eq!(children_root, 4096);
                    assert_eq!(values_root, 8192);
                    assert_eq!(depth, 0);
                }
                _ => panic!("expected key"),
            }
        }
    }

    #[test]
    fn test_name_too_long_rejected() {
        let name = "a".repeat(241);
        assert!(validate(&name, &NodeValue::Int32(1)).is_err());
    }

    #[test]
    fn test_string_payload_boundary() {
        let ok = "a".repeat(249); // +NUL = 250, allowed
        validate("k", &NodeValue::String(ok)).unwrap();
        let bad = "a".repeat(250); // +NUL = 251, rejected
        assert!(validate("k", &NodeValue::String(bad)).is_err());
    }

    #[test]
    fn test_binary_payload_boundary() {
        validate("k", &NodeValue::Binary(vec![0; 250])).unwrap();
        assert!(validate("k", &NodeValue::Binary(vec![0; 251])).is_err());
    }
}
