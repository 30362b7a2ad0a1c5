// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Field descriptor tables for metadata shapes.
//!
//! Every metadata kind lists its fields once, in order, with an accessor per
//! field. The accessor variant fixes the field's kind, so two records of the
//! same shape always yield matching values for a descriptor.

/// The four kinds of field a metadata record can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    Composite,
    ListOfScalar,
    ListOfComposite,
}

/// A nested record whose leaves are all strings.
pub trait Composite {
    /// Leaf names and values in declaration order.
    fn leaves(&self) -> Vec<(&'static str, &str)>;
}

/// Typed read access to one field of `R`.
pub enum Accessor<R> {
    Scalar(fn(&R) -> &str),
    Composite(fn(&R) -> &dyn Composite),
    ListOfScalar(fn(&R) -> &[String]),
    ListOfComposite(fn(&R) -> Vec<&dyn Composite>),
}

/// One entry of a shape's descriptor table.
pub struct FieldDescriptor<R> {
    pub name: &'static str,
    pub accessor: Accessor<R>,
}

impl<R> FieldDescriptor<R> {
    pub fn scalar(name: &'static str, get: fn(&R) -> &str) -> Self {
        Self {
            name,
            accessor: Accessor::Scalar(get),
        }
    }

    pub fn composite(name: &'static str, get: fn(&R) -> &dyn Composite) -> Self {
        Self {
            name,
            accessor: Accessor::Composite(get),
        }
    }

    pub fn scalar_list(name: &'static str, get: fn(&R) -> &[String]) -> Self {
        Self {
            name,
            accessor: Accessor::ListOfScalar(get),
        }
    }

    pub fn composite_list(name: &'static str, get: fn(&R) -> Vec<&dyn Composite>) -> Self {
        Self {
            name,
            accessor: Accessor::ListOfComposite(get),
        }
    }
}

/// A metadata record that can be diffed field by field.
pub trait MetadataShape {
    /// Field that never produces audit events.
    const SCHEMA_VERSION_FIELD: &'static str = "schemaVersion";

    /// The ordered descriptor table for this shape.
    fn descriptors() -> Vec<FieldDescriptor<Self>>
    where
        Self: Sized;
}

pub fn classify<R>(descriptor: &FieldDescriptor<R>) -> FieldKind {
    match descriptor.accessor {
        Accessor::Scalar(_) => FieldKind::Scalar,
        Accessor::Composite(_) => FieldKind::Composite,
        Accessor::ListOfScalar(_) => FieldKind::ListOfScalar,
        Accessor::ListOfComposite(_) => FieldKind::ListOfComposite,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContributorData, EtdWork, OaWork};

    fn kinds<R: MetadataShape>() -> Vec<(&'static str, FieldKind)> {
        R::descriptors()
            .iter()
            .map(|descriptor| (descriptor.name, classify(descriptor)))
            .collect()
    }

    #[test]
    fn classifies_thesis_fields() {
        let kinds = kinds::<EtdWork>();
        assert!(kinds.contains(&("title", FieldKind::Scalar)));
        assert!(kinds.contains(&("author", FieldKind::Composite)));
        assert!(kinds.contains(&("advisors", FieldKind::ListOfComposite)));
        assert!(kinds.contains(&("keywords", FieldKind::ListOfScalar)));
    }

    #[test]
    fn classifies_open_access_fields() {
        let kinds = kinds::<OaWork>();
        assert!(kinds.contains(&("authors", FieldKind::ListOfComposite)));
        assert!(kinds.contains(&("languages", FieldKind::ListOfScalar)));
        assert!(kinds.contains(&("abstract", FieldKind::Scalar)));
    }

    #[test]
    fn contributor_leaves_follow_declaration_order() {
        let person = ContributorData {
            compute_id: "abc1d".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            ..ContributorData::default()
        };
        let names: Vec<_> = person.leaves().into_iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            ["computeID", "firstName", "lastName", "department", "institution"]
        );
    }
}
