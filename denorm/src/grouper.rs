//! Stable grouping of key-sorted pairs.

use serde_json::Value;

use crate::document::get_path;
use crate::key::{JoinKey, compare_values};

/// Groups `(key, value)` pairs that are sorted by key into `(key, members)` groups.
///
/// Groups keep the order in which their keys first appear. Without `sort_field` every group is
/// sorted by natural value order. With `sort_field`, object members are stable-sorted by that
/// field while scalar members keep their insertion order.
pub fn group<I>(pairs: I, sort_field: Option<&str>) -> Vec<(JoinKey, Vec<Value>)>
where
    I: IntoIterator<Item = (JoinKey, Value)>,
{
    let mut groups: Vec<(JoinKey, Vec<Value>)> = Vec::new();

    for (key, value) in pairs {
        match groups.last_mut() {
            Some((last_key, members)) if *last_key == key => members.push(value),
            _ => groups.push((key, vec![value])),
        }
    }

    for (_, members) in groups.iter_mut() {
        sort_members(members, sort_field);
    }

    groups
}

/// Sorts pairs by key and groups them.
///
/// The sort is stable so members with the same key keep their relative order before the group
/// sort is applied.
pub fn sort_and_group(
    mut pairs: Vec<(JoinKey, Value)>,
    sort_field: Option<&str>,
) -> Vec<(JoinKey, Vec<Value>)> {
    pairs.sort_by(|(a, _), (b, _)| a.cmp(b));
    group(pairs, sort_field)
}

/// Sorts the members of one group, see [`group`].
///
/// With `sort_field`, object members are reordered among the positions objects already hold,
/// so scalars mixed into the group stay where they were.
pub fn sort_members(members: &mut [Value], sort_field: Option<&str>) {
    let Some(field) = sort_field else {
        members.sort_by(compare_values);
        return;
    };

    let slots: Vec<usize> = members
        .iter()
        .enumerate()
        .filter_map(|(index, member)| member.is_object().then_some(index))
        .collect();
    if slots.len() < 2 {
        return;
    }

    let mut objects: Vec<Value> = slots
        .iter()
        .map(|&index| std::mem::take(&mut members[index]))
        .collect();
    objects.sort_by(|a, b| compare_values(sort_value(a, field), sort_value(b, field)));

    for (index, object) in slots.into_iter().zip(objects) {
        members[index] = object;
    }
}

fn sort_value<'a>(member: &'a Value, field: &str) -> &'a Value {
    member
        .as_object()
        .and_then(|object| get_path(object, field))
        .unwrap_or(&Value::Null)
}
