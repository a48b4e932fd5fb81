//! Attribute registry: the explicit `AttributeId -> {tag, unique}` table.
//!
//! Built once when a store opens and read-only afterwards. The indexing
//! engine consults it for value-type comparators, reference detection
//! (VAET membership, remap of reference values), and unique-constraint
//! enforcement. Nothing here is derived from type metadata - callers
//! register every attribute explicitly.

use crate::datom::Datom;
use crate::error::{Error, Result};
use crate::ids::AttributeId;
use crate::value::{compare_tagged, ValueTag};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Registration record for one attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttributeDef {
    pub id: AttributeId,
    /// Value type every datom of this attribute must carry. `Ref` marks
    /// the attribute as reference-typed.
    pub tag: ValueTag,
    /// Whether (attribute, value) pairs must be unique across entities.
    pub unique: bool,
}

impl AttributeDef {
    pub fn new(id: AttributeId, tag: ValueTag) -> Self {
        Self {
            id,
            tag,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Read-only attribute table.
///
/// An attribute's id never changes for the lifetime of the store; new
/// registrations may add ids but never move or reuse existing ones.
#[derive(Debug, Default, Clone)]
pub struct AttributeRegistry {
    defs: HashMap<AttributeId, AttributeDef>,
}

impl AttributeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an attribute. Re-registering an existing id is an error:
    /// ids are assigned once and never redefined.
    pub fn register(&mut self, def: AttributeDef) -> Result<()> {
        if self.defs.contains_key(&def.id) {
            return Err(Error::AttributeRedefined(def.id));
        }
        self.defs.insert(def.id, def);
        Ok(())
    }

    /// Convenience builder used by tests and store setup.
    pub fn with(mut self, def: AttributeDef) -> Self {
        self.defs.insert(def.id, def);
        self
    }

    pub fn get(&self, id: AttributeId) -> Option<&AttributeDef> {
        self.defs.get(&id)
    }

    pub fn value_tag(&self, id: AttributeId) -> Option<ValueTag> {
        self.defs.get(&id).map(|d| d.tag)
    }

    pub fn is_reference(&self, id: AttributeId) -> bool {
        self.value_tag(id) == Some(ValueTag::Ref)
    }

    pub fn is_unique(&self, id: AttributeId) -> bool {
        self.defs.get(&id).is_some_and(|d| d.unique)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Compare two value payloads under the attribute's registered type.
    ///
    /// Unregistered attributes fall back to bytewise order so comparators
    /// stay total; validation rejects such datoms before they reach an
    /// index.
    pub fn compare_values(&self, id: AttributeId, a: &[u8], b: &[u8]) -> Ordering {
        let tag = self.value_tag(id).unwrap_or(ValueTag::Blob);
        compare_tagged(tag, a, b)
    }

    /// Like [`Self::compare_values`] but with a caller-supplied tag for
    /// attributes the registry doesn't know (used mid-comparator, where
    /// the datom carries its own tag).
    pub fn compare_values_as(
        &self,
        id: AttributeId,
        fallback: ValueTag,
        a: &[u8],
        b: &[u8],
    ) -> Ordering {
        let tag = self.value_tag(id).unwrap_or(fallback);
        compare_tagged(tag, a, b)
    }

    /// Reject datoms that reference unregistered attributes or carry a
    /// value whose tag disagrees with the registration.
    pub fn validate(&self, datom: &Datom) -> Result<()> {
        let def = self
            .get(datom.a)
            .ok_or(Error::UnknownAttribute(datom.a))?;
        if datom.v.tag != def.tag {
            return Err(Error::TagMismatch {
                attribute: datom.a,
                expected: def.tag,
                found: datom.v.tag,
            });
        }
        Ok(())
    }
}
