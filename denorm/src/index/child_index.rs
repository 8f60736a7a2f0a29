use std::collections::HashMap;

use serde_json::Value;

use crate::document::{Document, get_path};
use crate::grouper::sort_and_group;
use crate::key::JoinKey;
use crate::spec::{Cardinality, JoinDescriptor};

/// Lookup from join key to the child, or ordered children, carrying that key.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildIndex {
    One(HashMap<JoinKey, Document>),
    Many(HashMap<JoinKey, Vec<Value>>),
}

impl ChildIndex {
    /// Builds an index over `children` for the descriptor's cardinality.
    ///
    /// Children are expected in `_id` order. For one-to-one joins the last child carrying a key
    /// wins. For one-to-many joins each group is ordered by `group_sort_field`. Children without
    /// the child key are ignored.
    pub fn build(
        descriptor: &JoinDescriptor,
        children: Vec<Document>,
        group_sort_field: &str,
    ) -> Self {
        let keyed = children.into_iter().filter_map(|child| {
            let key = get_path(&child, &descriptor.child_key)
                .filter(|key| !key.is_null())
                .cloned()?;
            Some((JoinKey::new(key), child))
        });

        match descriptor.cardinality {
            Cardinality::OneToOne => ChildIndex::One(keyed.collect()),
            Cardinality::OneToMany => {
                let pairs = keyed
                    .map(|(key, child)| (key, Value::Object(child)))
                    .collect();
                ChildIndex::Many(
                    sort_and_group(pairs, Some(group_sort_field))
                        .into_iter()
                        .collect(),
                )
            }
        }
    }

    /// Number of distinct keys in the index.
    pub fn len(&self) -> usize {
        match self {
            ChildIndex::One(index) => index.len(),
            ChildIndex::Many(index) => index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_one(&self, key: &JoinKey) -> Option<&Document> {
        match self {
            ChildIndex::One(index) => index.get(key),
            ChildIndex::Many(_) => None,
        }
    }

    pub fn get_many(&self, key: &JoinKey) -> Option<&[Value]> {
        match self {
            ChildIndex::One(_) => None,
            ChildIndex::Many(index) => index.get(key).map(Vec::as_slice),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn docs(values: Vec<Value>) -> Vec<Document> {
        values
            .into_iter()
            .map(|value| value.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn one_to_one_index_is_keyed_by_child_key() {
        let descriptor = JoinDescriptor::one_to_one("gender", "gender", "_id");
        let index = ChildIndex::build(
            &descriptor,
            docs(vec![
                json!({"_id": 1, "name": "Male"}),
                json!({"_id": 2, "name": "Female"}),
            ]),
            "_id",
        );

        assert_eq!(index.len(), 2);
        assert_eq!(
            index.get_one(&JoinKey::new(json!(2.0))),
            Some(&docs(vec![json!({"_id": 2, "name": "Female"})])[0])
        );
        assert!(index.get_many(&JoinKey::new(json!(2))).is_none());
    }

    #[test]
    fn one_to_many_index_groups_and_skips_children_without_key() {
        let descriptor = JoinDescriptor::one_to_many("pet", "pet", "owner");
        let index = ChildIndex::build(
            &descriptor,
            docs(vec![
                json!({"_id": 1, "name": "Lassie", "owner": 11}),
                json!({"_id": 2, "name": "Flipper", "owner": 22}),
                json!({"_id": 3, "name": "Snoopy", "owner": 22}),
                json!({"_id": 5, "name": "Marmaduke"}),
            ]),
            "_id",
        );

        assert_eq!(index.len(), 2);
        assert_eq!(
            index.get_many(&JoinKey::new(json!(22))),
            Some(
                &[
                    json!({"_id": 2, "name": "Flipper", "owner": 22}),
                    json!({"_id": 3, "name": "Snoopy", "owner": 22})
                ][..]
            )
        );
    }
}
