// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Field-level diff between two records of the same metadata shape.

use serde::Serialize;

use super::shape::{Accessor, Composite, MetadataShape};

/// Joins string-list values in change records.
pub const LIST_DELIMITER: &str = "|";

/// One changed leaf field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub field_path: String,
    pub before: String,
    pub after: String,
}

impl Change {
    fn new(field_path: String, before: &str, after: &str) -> Self {
        Self {
            field_path,
            before: before.to_string(),
            after: after.to_string(),
        }
    }
}

/// Compare `old` and `new` field by field.
///
/// Scalars are compared directly. String lists are compared as a whole and
/// produce at most one change. Composites produce one change per differing
/// leaf; a composite with no counterpart only reports its non-empty leaves.
/// Composite lists are compared by position.
pub fn diff<R: MetadataShape>(old: &R, new: &R) -> Vec<Change> {
    let mut changes = Vec::new();

    for descriptor in R::descriptors() {
        let name = descriptor.name;
        if name == R::SCHEMA_VERSION_FIELD {
            continue;
        }

        match descriptor.accessor {
            Accessor::Scalar(get) => {
                let (before, after) = (get(old), get(new));
                if before != after {
                    changes.push(Change::new(name.to_string(), before, after));
                }
            }
            Accessor::Composite(get) => {
                diff_composite(&mut changes, name, None, Some(get(old)), Some(get(new)));
            }
            Accessor::ListOfScalar(get) => {
                let (before, after) = (get(old), get(new));
                if before != after {
                    changes.push(Change::new(
                        name.to_string(),
                        &before.join(LIST_DELIMITER),
                        &after.join(LIST_DELIMITER),
                    ));
                }
            }
            Accessor::ListOfComposite(get) => {
                let (before, after) = (get(old), get(new));
                let len = before.len().max(after.len());
                for index in 0..len {
                    diff_composite(
                        &mut changes,
                        name,
                        Some(index),
                        before.get(index).copied(),
                        after.get(index).copied(),
                    );
                }
            }
        }
    }

    changes
}

fn diff_composite(
    changes: &mut Vec<Change>,
    name: &str,
    index: Option<usize>,
    old: Option<&dyn Composite>,
    new: Option<&dyn Composite>,
) {
    let path = |leaf: &str| match index {
        Some(index) => format!("{name}[{index}].{leaf}"),
        None => format!("{name}.{leaf}"),
    };

    match (old, new) {
        (None, None) => {}
        (None, Some(new)) => {
            for (leaf, value) in new.leaves() {
                if !value.is_empty() {
                    changes.push(Change::new(path(leaf), "", value));
                }
            }
        }
        (Some(old), None) => {
            for (leaf, value) in old.leaves() {
                if !value.is_empty() {
                    changes.push(Change::new(path(leaf), value, ""));
                }
            }
        }
        (Some(old), Some(new)) => {
            for ((leaf, before), (_, after)) in old.leaves().into_iter().zip(new.leaves()) {
                if before != after {
                    changes.push(Change::new(path(leaf), before, after));
                }
            }
        }
    }
}
