//! Parsing of merge specs into join descriptors.
//!
//! A spec names the parent field to fill and where its children live:
//!
//! ```text
//! spec   := parent_key (":" target)?
//! target := collection ("." child_key)? | "[" collection ("." child_key)? "]"
//! ```
//!
//! The bracketed form selects a one-to-many join. An empty collection defaults to the parent
//! key. An empty child key defaults to `_id` for one-to-one joins and to the parent
//! collection's name for one-to-many joins.

use std::collections::HashSet;
use std::fmt;

use crate::bail;
use crate::document::ID_FIELD;
use crate::error::{ErrorKind, MergeResult};

/// Whether a parent field receives one child or an ordered group of children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    OneToOne,
    OneToMany,
}

impl Cardinality {
    /// Tag used in stamps and canonical spec strings.
    pub fn as_static_str(&self) -> &'static str {
        match self {
            Cardinality::OneToOne => "one",
            Cardinality::OneToMany => "many",
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_static_str())
    }
}

/// A fully resolved join between a parent field and a child collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinDescriptor {
    pub cardinality: Cardinality,
    pub parent_field: String,
    pub child_collection: String,
    pub child_key: String,
}

impl JoinDescriptor {
    pub fn one_to_one(
        parent_field: impl Into<String>,
        child_collection: impl Into<String>,
        child_key: impl Into<String>,
    ) -> Self {
        Self {
            cardinality: Cardinality::OneToOne,
            parent_field: parent_field.into(),
            child_collection: child_collection.into(),
            child_key: child_key.into(),
        }
    }

    pub fn one_to_many(
        parent_field: impl Into<String>,
        child_collection: impl Into<String>,
        child_key: impl Into<String>,
    ) -> Self {
        Self {
            cardinality: Cardinality::OneToMany,
            parent_field: parent_field.into(),
            child_collection: child_collection.into(),
            child_key: child_key.into(),
        }
    }

    pub fn is_one_to_one(&self) -> bool {
        self.cardinality == Cardinality::OneToOne
    }
}

/// Canonical form, e.g. `one:gender:gender._id` or `many:pet:pet.owner`.
impl fmt::Display for JoinDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}.{}",
            self.cardinality, self.parent_field, self.child_collection, self.child_key
        )
    }
}

/// Parses a single spec for joins into `parent_collection`.
pub fn parse_spec(spec: &str, parent_collection: &str) -> MergeResult<JoinDescriptor> {
    let (parent_field, target) = match spec.split_once(':') {
        Some((parent_field, target)) => (parent_field, Some(target)),
        None => (spec, None),
    };

    if parent_field.is_empty() {
        bail!(
            ErrorKind::InvalidSpec,
            "Merge spec has an empty parent key",
            format!("unrecognized merge spec: {spec:?}")
        );
    }

    let Some(target) = target else {
        return Ok(JoinDescriptor::one_to_one(parent_field, parent_field, ID_FIELD));
    };

    let (cardinality, target) = match target.strip_prefix('[') {
        Some(inner) => match inner.strip_suffix(']') {
            Some(inner) => (Cardinality::OneToMany, inner),
            None => bail!(
                ErrorKind::InvalidSpec,
                "Merge spec has an unterminated one-to-many target",
                format!("unrecognized merge spec: {spec:?}")
            ),
        },
        None => (Cardinality::OneToOne, target),
    };

    let (collection, child_key) = match target.split_once('.') {
        Some((collection, child_key)) => (collection, child_key),
        None => (target, ""),
    };

    if contains_brackets(collection) || contains_brackets(child_key) {
        bail!(
            ErrorKind::InvalidSpec,
            "Merge spec target contains unexpected brackets",
            format!("unrecognized merge spec: {spec:?}")
        );
    }

    let child_collection = if collection.is_empty() {
        parent_field
    } else {
        collection
    };

    let descriptor = match cardinality {
        Cardinality::OneToOne => {
            let child_key = if child_key.is_empty() {
                ID_FIELD
            } else {
                child_key
            };
            JoinDescriptor::one_to_one(parent_field, child_collection, child_key)
        }
        Cardinality::OneToMany => {
            let child_key = if child_key.is_empty() {
                parent_collection
            } else {
                child_key
            };
            JoinDescriptor::one_to_many(parent_field, child_collection, child_key)
        }
    };

    Ok(descriptor)
}

/// Parses every spec of a run, rejecting two specs that write the same parent field.
pub fn parse_specs<S>(specs: &[S], parent_collection: &str) -> MergeResult<Vec<JoinDescriptor>>
where
    S: AsRef<str>,
{
    let mut seen_fields = HashSet::new();
    let mut descriptors = Vec::with_capacity(specs.len());

    for spec in specs {
        let descriptor = parse_spec(spec.as_ref(), parent_collection)?;

        if !seen_fields.insert(descriptor.parent_field.clone()) {
            bail!(
                ErrorKind::InvalidSpec,
                "Parent field is targeted by more than one merge spec",
                format!(
                    "field `{}` repeated in spec {:?}",
                    descriptor.parent_field,
                    spec.as_ref()
                )
            );
        }

        descriptors.push(descriptor);
    }

    Ok(descriptors)
}

fn contains_brackets(value: &str) -> bool {
    value.contains(['[', ']'])
}
