//! Transaction-log blocks.
//!
//! Every committed batch is appended to the node store's transaction-log
//! stream as one self-contained block. Blocks chain backwards: each one
//! carries the key of its predecessor, and the snapshot records the newest
//! block, so the full history can be replayed from any snapshot without a
//! separate manifest.
//!
//! ```text
//! prev:u64 BE (0 = genesis) · batch block (codec framing)
//! ```

use strata_db_core::datom::Datom;
use strata_db_core::error::{Error, Result};
use strata_db_core::ids::StoreKey;
use strata_db_index::codec;

/// Encode one committed batch with its back-link.
///
/// A raw zero is never a valid transaction-log key (those carry the TxLog
/// partition tag in the top byte), so it serves as the genesis sentinel.
pub(crate) fn encode_block(prev: Option<StoreKey>, datoms: &[Datom]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&prev.map_or(0, StoreKey::as_u64).to_be_bytes());
    out.extend_from_slice(&codec::encode_batch(datoms));
    out
}

/// Decode a block into its back-link and datoms.
pub(crate) fn decode_block(bytes: &[u8]) -> Result<(Option<StoreKey>, Vec<Datom>)> {
    if bytes.len() < 8 {
        return Err(Error::corrupt("tx-log block truncated"));
    }
    let prev = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
    let prev = (prev != 0).then(|| StoreKey::from_u64(prev));
    let datoms = codec::decode_batch(&bytes[8..])?;
    Ok((prev, datoms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db_core::ids::{AttributeId, EntityId, Partition, TxId};
    use strata_db_core::value::Value;

    #[test]
    fn test_block_round_trip() {
        let datoms = vec![Datom::new(
            EntityId::new(Partition::Entity, 1),
            AttributeId(1),
            TxId::from_sequence(5),
            true,
            Value::str("x"),
        )];
        let prev = Some(StoreKey::new(Partition::TxLog, 4));
        let (decoded_prev, decoded) = decode_block(&encode_block(prev, &datoms)).unwrap();
        assert_eq!(decoded_prev, prev);
        assert_eq!(decoded, datoms);
    }

    #[test]
    fn test_genesis_block_has_no_back_link() {
        let (prev, datoms) = decode_block(&encode_block(None, &[])).unwrap();
        assert_eq!(prev, None);
        assert!(datoms.is_empty());
    }
}
