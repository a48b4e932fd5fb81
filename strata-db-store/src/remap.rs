//! Temp-id remap: substituting transaction-scoped ids at commit time.
//!
//! Callers build batches against ids in the `Temp` partition; the pipeline
//! maps every distinct temp id to a freshly allocated `Entity`-partition id
//! and rewrites both entity fields and reference-typed values through the
//! table. The whole table is computed once per transaction, so mutually
//! referencing temp ids (entity A pointing at entity B and vice versa)
//! resolve consistently in a single pass.

use rustc_hash::FxHashMap;
use strata_db_core::datom::Datom;
use strata_db_core::error::{Error, Result};
use strata_db_core::ids::{EntityId, Partition};
use strata_db_core::registry::AttributeRegistry;
use strata_db_core::value::Value;

/// Remap table: temp id to permanent id.
pub type RemapTable = FxHashMap<EntityId, EntityId>;

/// Replace every temp id in `batch` with a permanent id.
///
/// `next_entity` is the entity-id allocator position owned by the pipeline;
/// it advances once per distinct temp id. Returns the table so callers can
/// translate their own temp ids to the committed ones.
///
/// A temp id that survives the rewrite (possible only if a reference value
/// hides under a non-reference attribute, which validation rejects first)
/// is an internal invariant violation and fails the commit.
pub fn remap_batch(
    batch: &mut [Datom],
    registry: &AttributeRegistry,
    next_entity: &mut u64,
) -> Result<RemapTable> {
    let mut table = RemapTable::default();

    // First pass: allocate one permanent id per distinct temp id, whether
    // it appears as an entity or as a reference target.
    for datom in batch.iter() {
        if datom.e.is_temp() {
            allocate(&mut table, datom.e, next_entity);
        }
        if registry.is_reference(datom.a) {
            if let Some(target) = datom.v.as_entity_id() {
                if target.is_temp() {
                    allocate(&mut table, target, next_entity);
                }
            }
        }
    }

    if table.is_empty() {
        return Ok(table);
    }

    // Second pass: rewrite entity fields and reference values.
    for datom in batch.iter_mut() {
        if let Some(&mapped) = table.get(&datom.e) {
            datom.e = mapped;
        }
        if registry.is_reference(datom.a) {
            if let Some(target) = datom.v.as_entity_id() {
                if let Some(&mapped) = table.get(&target) {
                    datom.v = Value::reference(mapped);
                }
            }
        }
    }

    // After remap no temp id may remain visible.
    for datom in batch.iter() {
        if datom.e.is_temp() {
            debug_assert!(false, "temp entity survived remap: {}", datom.e);
            return Err(Error::RemapConflict(datom.e));
        }
        if let Some(target) = datom.v.as_entity_id() {
            if target.is_temp() {
                debug_assert!(false, "temp reference survived remap: {target}");
                return Err(Error::RemapConflict(target));
            }
        }
    }

    Ok(table)
}

fn allocate(table: &mut RemapTable, temp: EntityId, next_entity: &mut u64) {
    table.entry(temp).or_insert_with(|| {
        let id = EntityId::new(Partition::Entity, *next_entity);
        *next_entity += 1;
        id
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db_core::ids::AttributeId;
    use strata_db_core::registry::AttributeDef;
    use strata_db_core::value::ValueTag;

    fn registry() -> AttributeRegistry {
        AttributeRegistry::new()
            .with(AttributeDef::new(AttributeId(1), ValueTag::Str))
            .with(AttributeDef::new(AttributeId(2), ValueTag::Ref))
    }

    fn temp(seq: u64) -> EntityId {
        EntityId::new(Partition::Temp, seq)
    }

    #[test]
    fn test_entity_fields_are_rewritten() {
        let reg = registry();
        let mut next = 100;
        let mut batch = vec![
            Datom::add(temp(1), AttributeId(1), Value::str("a")),
            Datom::add(temp(1), AttributeId(1), Value::str("b")),
            Datom::add(temp(2), AttributeId(1), Value::str("c")),
        ];
        let table = remap_batch(&mut batch, &reg, &mut next).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(next, 102);
        // Same temp id maps to the same permanent id.
        assert_eq!(batch[0].e, batch[1].e);
        assert_ne!(batch[0].e, batch[2].e);
        assert!(batch.iter().all(|d| !d.e.is_temp()));
    }

    #[test]
    fn test_mutually_referencing_temp_ids() {
        let reg = registry();
        let mut next = 0;
        let mut batch = vec![
            Datom::add(temp(1), AttributeId(2), Value::reference(temp(2))),
            Datom::add(temp(2), AttributeId(2), Value::reference(temp(1))),
        ];
        let table = remap_batch(&mut batch, &reg, &mut next).unwrap();

        let p1 = table[&temp(1)];
        let p2 = table[&temp(2)];
        assert!(!p1.is_temp() && !p2.is_temp());
        // Each datom's value points at the other's permanent id.
        assert_eq!(batch[0].v.as_entity_id(), Some(p2));
        assert_eq!(batch[1].v.as_entity_id(), Some(p1));
    }

    #[test]
    fn test_permanent_ids_pass_through_untouched() {
        let reg = registry();
        let mut next = 0;
        let perm = EntityId::new(Partition::Entity, 7);
        let mut batch = vec![Datom::add(perm, AttributeId(1), Value::str("x"))];
        let table = remap_batch(&mut batch, &reg, &mut next).unwrap();
        assert!(table.is_empty());
        assert_eq!(next, 0);
        assert_eq!(batch[0].e, perm);
    }
}
