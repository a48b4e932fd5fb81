//! Datom key-prefix codec.
//!
//! Encodes the sortable portion of a datom into a fixed-size prefix
//! followed by a variable-length value segment:
//!
//! ```text
//! entity:    8 bytes BE
//! attribute: 2 bytes BE
//! tx:        8 bytes BE
//! flags:     1 byte  (added bit, inlined bit, value-tag nibble)
//! value:     inline bytes                      (INLINED set)
//!          | offset:u32 BE + length:u32 BE     (INLINED clear)
//! ```
//!
//! Key fields are big-endian so the encoded prefix sorts the same way the
//! decoded fields do. Values at or below [`INLINE_VALUE_THRESHOLD`] bytes
//! ride directly behind the prefix; larger values live in a caller-supplied
//! blob buffer and the prefix carries an `(offset, length)` pointer into it.
//!
//! Decoding borrows from the caller's buffers and never allocates until a
//! datom is materialized.

use strata_db_core::datom::{Datom, DatomFlags};
use strata_db_core::error::{Error, Result};
use strata_db_core::ids::{AttributeId, EntityId, TxId};
use strata_db_core::value::Value;

/// Fixed size of the sortable prefix: entity + attribute + tx + flags.
pub const KEY_PREFIX_SIZE: usize = 8 + 2 + 8 + 1;

/// Values at or below this size are stored inline behind the prefix.
pub const INLINE_VALUE_THRESHOLD: usize = 64;

/// Size of an `(offset, length)` blob pointer.
const BLOB_POINTER_SIZE: usize = 8;

/// The decoded fixed prefix of one datom.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KeyPrefix {
    pub e: EntityId,
    pub a: AttributeId,
    pub t: TxId,
    pub flags: DatomFlags,
}

/// Where a decoded datom's value bytes live.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueSpan<'a> {
    /// Value bytes inline behind the prefix.
    Inline(&'a [u8]),
    /// Pointer into the companion blob buffer.
    Blob { offset: u32, length: u32 },
}

/// Append one encoded datom to `out`, spilling oversized values to `blobs`.
pub fn encode(datom: &Datom, out: &mut Vec<u8>, blobs: &mut Vec<u8>) {
    out.extend_from_slice(&datom.e.as_u64().to_be_bytes());
    out.extend_from_slice(&datom.a.as_u16().to_be_bytes());
    out.extend_from_slice(&datom.t.as_u64().to_be_bytes());

    let inline = datom.v.bytes.len() <= INLINE_VALUE_THRESHOLD;
    out.push(datom.flags.with_inlined(inline).as_u8());

    if inline {
        out.extend_from_slice(&datom.v.bytes);
    } else {
        out.extend_from_slice(&(blobs.len() as u32).to_be_bytes());
        out.extend_from_slice(&(datom.v.bytes.len() as u32).to_be_bytes());
        blobs.extend_from_slice(&datom.v.bytes);
    }
}

/// Decode the fixed prefix and locate the value span.
///
/// `bytes` must hold exactly one encoded datom. Borrows from the caller's
/// buffer; nothing is allocated.
pub fn decode_prefix(bytes: &[u8]) -> Result<(KeyPrefix, ValueSpan<'_>)> {
    if bytes.len() < KEY_PREFIX_SIZE {
        return Err(Error::corrupt(format!(
            "datom prefix truncated: {} bytes, need {}",
            bytes.len(),
            KEY_PREFIX_SIZE
        )));
    }

    let e = EntityId::from_u64(u64::from_be_bytes(bytes[0..8].try_into().unwrap()));
    let a = AttributeId::from_u16(u16::from_be_bytes(bytes[8..10].try_into().unwrap()));
    let t = TxId::from_u64(u64::from_be_bytes(bytes[10..18].try_into().unwrap()));
    let flags = DatomFlags::from_u8(bytes[18]);

    let tail = &bytes[KEY_PREFIX_SIZE..];
    let span = if flags.is_inlined() {
        ValueSpan::Inline(tail)
    } else {
        if tail.len() != BLOB_POINTER_SIZE {
            return Err(Error::corrupt(format!(
                "blob pointer malformed: {} trailing bytes",
                tail.len()
            )));
        }
        ValueSpan::Blob {
            offset: u32::from_be_bytes(tail[0..4].try_into().unwrap()),
            length: u32::from_be_bytes(tail[4..8].try_into().unwrap()),
        }
    };

    Ok((KeyPrefix { e, a, t, flags }, span))
}

/// Decode one datom, resolving blob pointers against `blobs`.
pub fn decode(bytes: &[u8], blobs: &[u8]) -> Result<Datom> {
    let (prefix, span) = decode_prefix(bytes)?;
    let tag = prefix
        .flags
        .value_tag()
        .ok_or_else(|| Error::corrupt(format!("invalid value tag in flags {:#04x}", prefix.flags.as_u8())))?;

    let value_bytes = match span {
        ValueSpan::Inline(v) => v,
        ValueSpan::Blob { offset, length } => {
            let start = offset as usize;
            let end = start
                .checked_add(length as usize)
                .filter(|&end| end <= blobs.len())
                .ok_or_else(|| {
                    Error::corrupt(format!(
                        "blob pointer out of bounds: {}+{} of {}",
                        offset,
                        length,
                        blobs.len()
                    ))
                })?;
            &blobs[start..end]
        }
    };

    Ok(Datom {
        e: prefix.e,
        a: prefix.a,
        t: prefix.t,
        // The inlined bit is a storage detail; materialized datoms carry
        // logical flags only.
        flags: prefix.flags.with_inlined(false),
        v: Value::from_parts(tag, value_bytes),
    })
}

// ============================================================================
// Batch framing (transaction-log blocks)
// ============================================================================

/// Encode a whole batch as one self-contained block:
///
/// ```text
/// count:u32 BE · blob_len:u32 BE · count × (len:u32 BE + record) · blob
/// ```
pub fn encode_batch(datoms: &[Datom]) -> Vec<u8> {
    let mut records: Vec<u8> = Vec::new();
    let mut blobs: Vec<u8> = Vec::new();
    let mut record = Vec::new();

    for d in datoms {
        record.clear();
        encode(d, &mut record, &mut blobs);
        records.extend_from_slice(&(record.len() as u32).to_be_bytes());
        records.extend_from_slice(&record);
    }

    let mut out = Vec::with_capacity(8 + records.len() + blobs.len());
    out.extend_from_slice(&(datoms.len() as u32).to_be_bytes());
    out.extend_from_slice(&(blobs.len() as u32).to_be_bytes());
    out.extend_from_slice(&records);
    out.extend_from_slice(&blobs);
    out
}

/// Decode a block produced by [`encode_batch`].
pub fn decode_batch(bytes: &[u8]) -> Result<Vec<Datom>> {
    if bytes.len() < 8 {
        return Err(Error::corrupt("batch block truncated"));
    }
    let count = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let blob_len = u32::from_be_bytes(bytes[4..8].try_into().unwrap()) as usize;

    if blob_len > bytes.len() - 8 {
        return Err(Error::corrupt("batch blob length exceeds block"));
    }
    let blob_start = bytes.len() - blob_len;
    let blobs = &bytes[blob_start..];
    let mut records = &bytes[8..blob_start];

    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        if records.len() < 4 {
            return Err(Error::corrupt("batch record header truncated"));
        }
        let len = u32::from_be_bytes(records[0..4].try_into().unwrap()) as usize;
        records = &records[4..];
        if records.len() < len {
            return Err(Error::corrupt("batch record truncated"));
        }
        out.push(decode(&records[..len], blobs)?);
        records = &records[len..];
    }
    if !records.is_empty() {
        return Err(Error::corrupt("trailing bytes after batch records"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db_core::ids::Partition;
    use strata_db_core::value::ValueTag;

    fn make(e: u64, a: u16, t: u64, v: Value) -> Datom {
        Datom::new(
            EntityId::new(Partition::Entity, e),
            AttributeId(a),
            TxId::from_sequence(t),
            true,
            v,
        )
    }

    #[test]
    fn test_inline_round_trip() {
        let d = make(1, 2, 3, Value::str("hello"));
        let mut out = Vec::new();
        let mut blobs = Vec::new();
        encode(&d, &mut out, &mut blobs);

        assert!(blobs.is_empty());
        assert_eq!(out.len(), KEY_PREFIX_SIZE + 5);
        assert_eq!(decode(&out, &blobs).unwrap(), d);
    }

    #[test]
    fn test_large_value_spills_to_blob() {
        let payload = vec![0xAB; INLINE_VALUE_THRESHOLD + 1];
        let d = make(1, 2, 3, Value::blob(payload.clone()));
        let mut out = Vec::new();
        let mut blobs = Vec::new();
        encode(&d, &mut out, &mut blobs);

        assert_eq!(blobs, payload);
        assert_eq!(out.len(), KEY_PREFIX_SIZE + 8);
        let (prefix, span) = decode_prefix(&out).unwrap();
        assert!(!prefix.flags.is_inlined());
        assert_eq!(
            span,
            ValueSpan::Blob {
                offset: 0,
                length: payload.len() as u32
            }
        );
        assert_eq!(decode(&out, &blobs).unwrap(), d);
    }

    #[test]
    fn test_prefix_sorts_like_fields() {
        // Encoded prefixes of equal-length inline values sort bytewise the
        // same way (e, a, t) sorts numerically.
        let lo = make(1, 5, 9, Value::u64(1));
        let hi = make(2, 1, 1, Value::u64(1));
        let mut a = Vec::new();
        let mut b = Vec::new();
        let mut blobs = Vec::new();
        encode(&lo, &mut a, &mut blobs);
        encode(&hi, &mut b, &mut blobs);
        assert!(a < b);
    }

    #[test]
    fn test_truncated_prefix_is_corrupt() {
        let err = decode_prefix(&[0u8; KEY_PREFIX_SIZE - 1]).unwrap_err();
        assert!(matches!(err, Error::CorruptData(_)));
    }

    #[test]
    fn test_blob_pointer_out_of_bounds() {
        let payload = vec![1u8; INLINE_VALUE_THRESHOLD + 1];
        let d = make(1, 1, 1, Value::blob(payload));
        let mut out = Vec::new();
        let mut blobs = Vec::new();
        encode(&d, &mut out, &mut blobs);
        // Decode against an empty blob buffer.
        assert!(matches!(decode(&out, &[]), Err(Error::CorruptData(_))));
    }

    #[test]
    fn test_bad_value_tag_is_corrupt() {
        let d = make(1, 1, 1, Value::u64(7));
        let mut out = Vec::new();
        let mut blobs = Vec::new();
        encode(&d, &mut out, &mut blobs);
        out[18] = 0xF3; // tag nibble outside the closed set
        assert!(matches!(decode(&out, &blobs), Err(Error::CorruptData(_))));
    }

    #[test]
    fn test_batch_round_trip() {
        let datoms = vec![
            make(1, 1, 1, Value::str("a")),
            make(2, 2, 1, Value::blob(vec![7u8; 100])),
            Datom::retract(
                EntityId::new(Partition::Entity, 3),
                AttributeId(1),
                Value::i64(-9),
            ),
        ];
        let block = encode_batch(&datoms);
        assert_eq!(decode_batch(&block).unwrap(), datoms);
    }

    #[test]
    fn test_batch_truncation_is_corrupt() {
        let block = encode_batch(&[make(1, 1, 1, Value::str("abc"))]);
        assert!(matches!(
            decode_batch(&block[..block.len() - 1]),
            Err(Error::CorruptData(_))
        ));
    }
}
