//! Documents and dotted field paths.

use serde_json::{Map, Value};

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

/// Field holding a document's unique identifier.
pub const ID_FIELD: &str = "_id";

/// Separator between the segments of a nested field path.
pub const PATH_SEPARATOR: char = '.';

/// Returns the `_id` of a document.
pub fn document_id(document: &Document) -> Option<&Value> {
    document.get(ID_FIELD)
}

/// Returns the first segment of `path`, which names the top level field holding it.
pub fn top_level_field(path: &str) -> &str {
    path.split(PATH_SEPARATOR).next().unwrap_or(path)
}

/// Looks up a possibly nested field such as `address.city`.
pub fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split(PATH_SEPARATOR);
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }

    Some(current)
}

/// Sets a possibly nested field, creating missing intermediate objects.
///
/// Returns `false` without modifying the document when an intermediate segment holds a
/// non-object value.
pub fn set_path(document: &mut Document, path: &str, value: Value) -> bool {
    let Some((parents, leaf)) = split_leaf(path) else {
        document.insert(path.to_string(), value);
        return true;
    };

    let mut current = document;
    for segment in parents.split(PATH_SEPARATOR) {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match entry {
            Value::Object(inner) => current = inner,
            _ => return false,
        }
    }

    current.insert(leaf.to_string(), value);
    true
}

/// Returns whether a possibly nested field is present and not null.
pub fn has_non_null(document: &Document, path: &str) -> bool {
    get_path(document, path).is_some_and(|value| !value.is_null())
}

fn split_leaf(path: &str) -> Option<(&str, &str)> {
    path.rsplit_once(PATH_SEPARATOR)
}

/// Keeps `_id` plus the top level fields named by `fields`.
pub fn project(document: &Document, fields: &[String]) -> Document {
    let mut projected = Document::new();

    if let Some(id) = document_id(document) {
        projected.insert(ID_FIELD.to_string(), id.clone());
    }

    for field in fields {
        let top = top_level_field(field);
        if let Some(value) = document.get(top) {
            projected.insert(top.to_string(), value.clone());
        }
    }

    projected
}
