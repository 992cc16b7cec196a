//! Attribute-level diff between applied and declared state

use crate::provider::ResourceSchema;
use crate::types::{Attributes, Value};
use serde::Serialize;
use std::collections::BTreeSet;

/// One changed top-level attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeChange {
    pub name: String,
    /// Value at the last apply, `None` if the attribute was not set
    pub before: Option<Value>,
    /// Declared value, `None` if the attribute was removed
    pub after: Option<Value>,
    /// The provider cannot change this attribute in place
    pub forces_replacement: bool,
}

impl AttributeChange {
    pub fn is_addition(&self) -> bool {
        self.before.is_none() && self.after.is_some()
    }

    pub fn is_removal(&self) -> bool {
        self.before.is_some() && self.after.is_none()
    }
}

/// Compare stored inputs with declared attributes
///
/// Attributes listed in `ignore` are skipped. Changes come back sorted by
/// attribute name.
pub fn diff_attributes(
    before: &Attributes,
    after: &Attributes,
    schema: &ResourceSchema,
    ignore: &[String],
) -> Vec<AttributeChange> {
    let names: BTreeSet<&String> = before.keys().chain(after.keys()).collect();

    names
        .into_iter()
        .filter(|name| !ignore.iter().any(|ignored| ignored == *name))
        .filter_map(|name| {
            let old = before.get(name);
            let new = after.get(name);
            let same = match (old, new) {
                (Some(a), Some(b)) => a.semantic_eq(b),
                (None, None) => true,
                _ => false,
            };
            (!same).then(|| AttributeChange {
                name: name.clone(),
                before: old.cloned(),
                after: new.cloned(),
                forces_replacement: schema.is_immutable(name),
            })
        })
        .collect()
}

/// Changes counted by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub additions: usize,
    pub removals: usize,
    pub modifications: usize,
    pub forcing_replacement: usize,
}

impl DiffSummary {
    pub fn from_changes(changes: &[AttributeChange]) -> Self {
        let mut summary = Self::default();
        for change in changes {
            if change.is_addition() {
                summary.additions += 1;
            } else if change.is_removal() {
                summary.removals += 1;
            } else {
                summary.modifications += 1;
            }
            if change.forces_replacement {
                summary.forcing_replacement += 1;
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications
    }
}
