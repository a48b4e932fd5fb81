//! Packed node wire format.
//!
//! Every persisted node blob starts with a FourCC magic identifying its
//! kind, followed by a fixed header and the columns written contiguously:
//!
//! ```text
//! magic:4      "SDN1" (data node) | "SIN1" (index node)
//! header       version:u16  flags:u16  datom_count:u32  blob_size:u32
//! columns      entity_ids:    u64 × datom_count
//!              attribute_ids: u16 × datom_count
//!              tx_ids:        u64 × datom_count
//!              flags:         u8  × datom_count
//!              val_offsets:   u32 × datom_count
//!              val_lengths:   u32 × datom_count
//! blob         blob_size bytes
//! — index nodes only (rows above are the child boundary markers) —
//!              child_counts:  u64 × datom_count
//!              child refs:    (tag:u8 'D'|'I' + key:u64) × datom_count
//!              index_type:    u8
//! ```
//!
//! All integers little-endian. Truncated buffers, bad magic, unknown
//! versions, invalid tag nibbles and out-of-range value spans all decode
//! to `CorruptData`; an immutable node either round-trips byte-for-byte or
//! is rejected whole.

use crate::node::{DataNode, IndexNode, Node, NodeKind};
use std::sync::Arc;
use strata_db_core::comparator::IndexType;
use strata_db_core::datom::DatomFlags;
use strata_db_core::error::{Error, Result};
use strata_db_core::ids::StoreKey;

/// Magic bytes identifying a packed data node.
pub const DATA_MAGIC: [u8; 4] = *b"SDN1";

/// Magic bytes identifying a packed index node.
pub const INDEX_MAGIC: [u8; 4] = *b"SIN1";

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

/// Size of the fixed header after the magic.
const HEADER_SIZE: usize = 2 + 2 + 4 + 4;

// Child-reference tags
const CHILD_DATA: u8 = b'D';
const CHILD_INDEX: u8 = b'I';

// ============================================================================
// Encoding
// ============================================================================

fn encode_header(out: &mut Vec<u8>, magic: [u8; 4], count: usize, blob_size: usize) {
    out.extend_from_slice(&magic);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // flags, reserved
    out.extend_from_slice(&(count as u32).to_le_bytes());
    out.extend_from_slice(&(blob_size as u32).to_le_bytes());
}

fn encode_columns(out: &mut Vec<u8>, node: &DataNode) {
    for i in 0..node.len() {
        out.extend_from_slice(&node.entity_id(i).as_u64().to_le_bytes());
    }
    for i in 0..node.len() {
        out.extend_from_slice(&node.attribute_id(i).as_u16().to_le_bytes());
    }
    for i in 0..node.len() {
        out.extend_from_slice(&node.tx_id(i).as_u64().to_le_bytes());
    }
    for i in 0..node.len() {
        out.push(node.flags_at(i).as_u8());
    }
    for i in 0..node.len() {
        out.extend_from_slice(&node.val_offset(i).to_le_bytes());
    }
    for i in 0..node.len() {
        out.extend_from_slice(&node.val_length(i).to_le_bytes());
    }
    out.extend_from_slice(node.blob());
}

/// Encode a packed data node.
pub fn encode_data(node: &DataNode) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + HEADER_SIZE + node.byte_size());
    encode_header(&mut out, DATA_MAGIC, node.len(), node.blob().len());
    encode_columns(&mut out, node);
    out
}

/// Encode a packed index node.
///
/// Every child must already be flushed to a [`Node::Reference`]; an
/// in-memory child here means the caller skipped a flush, which would
/// persist a dangling subtree.
pub fn encode_index(node: &IndexNode) -> Result<Vec<u8>> {
    let markers = node.markers();
    let mut out = Vec::with_capacity(4 + HEADER_SIZE + node.byte_size());
    encode_header(&mut out, INDEX_MAGIC, markers.len(), markers.blob().len());
    encode_columns(&mut out, markers);

    for i in 0..node.child_count() {
        out.extend_from_slice(&node.child_len(i).to_le_bytes());
    }
    for i in 0..node.child_count() {
        let child = node.child_at(i);
        let key = child
            .store_key()
            .ok_or_else(|| Error::corrupt("index node child not flushed before encode"))?;
        out.push(match child.kind() {
            NodeKind::Data => CHILD_DATA,
            NodeKind::Index => CHILD_INDEX,
        });
        out.extend_from_slice(&key.as_u64().to_le_bytes());
    }
    out.push(node.index_type().as_u8());
    Ok(out)
}

// ============================================================================
// Decoding
// ============================================================================

/// Sequential reader returning `CorruptData` on any short read.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| Error::corrupt("packed node truncated"))?;
        let span = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(span)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn done(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

struct Header {
    count: usize,
    blob_size: usize,
}

fn decode_header(r: &mut Reader<'_>, magic: [u8; 4]) -> Result<Header> {
    let found = r.take(4)?;
    if found != magic {
        return Err(Error::corrupt(format!(
            "bad node magic: {:02x?}, expected {:02x?}",
            found, magic
        )));
    }
    let version = r.u16()?;
    if version != FORMAT_VERSION {
        return Err(Error::corrupt(format!("unknown node format version {version}")));
    }
    let _flags = r.u16()?;
    let count = r.u32()? as usize;
    let blob_size = r.u32()? as usize;
    Ok(Header { count, blob_size })
}

fn decode_columns(r: &mut Reader<'_>, header: &Header) -> Result<DataNode> {
    let n = header.count;

    let mut entity_ids = Vec::with_capacity(n);
    for _ in 0..n {
        entity_ids.push(r.u64()?);
    }
    let mut attribute_ids = Vec::with_capacity(n);
    for _ in 0..n {
        attribute_ids.push(r.u16()?);
    }
    let mut tx_ids = Vec::with_capacity(n);
    for _ in 0..n {
        tx_ids.push(r.u64()?);
    }
    let flags = r.take(n)?.to_vec();
    for &f in &flags {
        if DatomFlags::from_u8(f).value_tag().is_none() {
            return Err(Error::corrupt(format!("invalid value tag in flags {f:#04x}")));
        }
    }
    let mut val_offsets = Vec::with_capacity(n);
    for _ in 0..n {
        val_offsets.push(r.u32()?);
    }
    let mut val_lengths = Vec::with_capacity(n);
    for _ in 0..n {
        val_lengths.push(r.u32()?);
    }
    let blob = r.take(header.blob_size)?.to_vec();

    for i in 0..n {
        let end = (val_offsets[i] as usize).checked_add(val_lengths[i] as usize);
        if end.is_none() || end.unwrap() > blob.len() {
            return Err(Error::corrupt(format!(
                "value span {} out of range: {}+{} of {}",
                i,
                val_offsets[i],
                val_lengths[i],
                blob.len()
            )));
        }
    }

    Ok(DataNode::from_columns(
        entity_ids.into_boxed_slice(),
        attribute_ids.into_boxed_slice(),
        tx_ids.into_boxed_slice(),
        flags.into_boxed_slice(),
        val_offsets.into_boxed_slice(),
        val_lengths.into_boxed_slice(),
        blob.into_boxed_slice(),
    ))
}

/// Decode a packed data node.
pub fn decode_data(bytes: &[u8]) -> Result<DataNode> {
    let mut r = Reader::new(bytes);
    let header = decode_header(&mut r, DATA_MAGIC)?;
    let node = decode_columns(&mut r, &header)?;
    if !r.done() {
        return Err(Error::corrupt("trailing bytes after data node"));
    }
    Ok(node)
}

/// Decode a packed index node.
pub fn decode_index(bytes: &[u8]) -> Result<IndexNode> {
    let mut r = Reader::new(bytes);
    let header = decode_header(&mut r, INDEX_MAGIC)?;
    let markers = decode_columns(&mut r, &header)?;

    let n = header.count;
    let mut child_counts = Vec::with_capacity(n);
    for _ in 0..n {
        child_counts.push(r.u64()?);
    }
    let mut children = Vec::with_capacity(n);
    for _ in 0..n {
        let kind = match r.u8()? {
            CHILD_DATA => NodeKind::Data,
            CHILD_INDEX => NodeKind::Index,
            other => {
                return Err(Error::corrupt(format!("unknown child tag {other:#04x}")));
            }
        };
        children.push(Node::reference(StoreKey::from_u64(r.u64()?), kind));
    }
    let index = IndexType::from_u8(r.u8()?)
        .ok_or_else(|| Error::corrupt("unknown index type in index node"))?;
    if !r.done() {
        return Err(Error::corrupt("trailing bytes after index node"));
    }

    Ok(IndexNode::from_parts(
        index,
        markers,
        child_counts.into_boxed_slice(),
        children.into_boxed_slice(),
    ))
}

/// Decode either node kind by dispatching on the magic.
pub fn decode_node(bytes: &[u8]) -> Result<Node> {
    match bytes.get(0..4) {
        Some(m) if m == DATA_MAGIC => Ok(Node::Data(Arc::new(decode_data(bytes)?))),
        Some(m) if m == INDEX_MAGIC => Ok(Node::Index(Arc::new(decode_index(bytes)?))),
        Some(m) => Err(Error::corrupt(format!("unknown node magic: {m:02x?}"))),
        None => Err(Error::corrupt("node blob shorter than magic")),
    }
}
