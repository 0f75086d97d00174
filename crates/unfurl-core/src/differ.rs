//! Path flattening and change detection between successive value trees.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::partial_json::MAX_DEPTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldEventKind {
    NewField,
    UpdateField,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldEvent {
    pub kind: FieldEventKind,
    pub path: String,
    pub value: Value,
}

/// Path of an object member: `parent.key`, or `key` at the root.
pub fn join_key(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

/// Path of an array element: `parent[index]`.
pub fn join_index(parent: &str, index: usize) -> String {
    format!("{}[{}]", parent, index)
}

/// Every node below the root with its path, depth-first, parents before
/// their children, in document order. Nodes nested deeper than
/// [`MAX_DEPTH`] are not listed.
pub fn flatten_paths(tree: &Value) -> Vec<(String, &Value)> {
    let mut out = Vec::new();
    collect_children("", tree, 0, &mut out);
    out
}

fn collect_children<'a>(
    path: &str,
    value: &'a Value,
    depth: usize,
    out: &mut Vec<(String, &'a Value)>,
) {
    if depth >= MAX_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = join_key(path, key);
                out.push((child_path.clone(), child));
                collect_children(&child_path, child, depth + 1, out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let child_path = join_index(path, index);
                out.push((child_path.clone(), child));
                collect_children(&child_path, child, depth + 1, out);
            }
        }
        _ => {}
    }
}

/// Deep equality with a pointer fast path.
///
/// Arrays compare in order; objects compare by key set and values
/// regardless of member order. `null` is distinct from `0`, `false` and `""`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    std::ptr::eq(a, b) || a == b
}

/// Remembers the last value seen at every path of one session.
#[derive(Debug, Default)]
pub struct PathDiffer {
    latest: HashMap<String, Value>,
}

impl PathDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `tree` against everything seen so far.
    ///
    /// Unseen paths yield `new-field`, changed ones `update-field`. Paths
    /// missing from `tree` keep their last value and yield nothing.
    pub fn diff(&mut self, tree: &Value) -> Vec<FieldEvent> {
        let mut events = Vec::new();

        for (path, value) in flatten_paths(tree) {
            match self.latest.get_mut(&path) {
                None => {
                    events.push(FieldEvent {
                        kind: FieldEventKind::NewField,
                        path: path.clone(),
                        value: value.clone(),
                    });
                    self.latest.insert(path, value.clone());
                }
                Some(previous) => {
                    if !values_equal(previous, value) {
                        events.push(FieldEvent {
                            kind: FieldEventKind::UpdateField,
                            path,
                            value: value.clone(),
                        });
                        *previous = value.clone();
                    }
                }
            }
        }

        events
    }

    pub fn latest(&self, path: &str) -> Option<&Value> {
        self.latest.get(path)
    }

    pub fn seen_paths(&self) -> usize {
        self.latest.len()
    }

    pub fn reset(&mut self) {
        self.latest.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paths(events: &[FieldEvent]) -> Vec<(FieldEventKind, &str)> {
        events.iter().map(|e| (e.kind, e.path.as_str())).collect()
    }

    #[test]
    fn test_flatten_paths_order() {
        let tree = json!({"title": "T", "characters": [{"name": "A"}], "meta": {"n": 1}});
        let flat: Vec<String> = flatten_paths(&tree).into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            flat,
            vec![
                "title",
                "characters",
                "characters[0]",
                "characters[0].name",
                "meta",
                "meta.n"
            ]
        );
    }

    #[test]
    fn test_flatten_stops_at_max_depth() {
        let mut tree = json!("leaf");
        for _ in 0..200 {
            tree = json!([tree]);
        }
        assert_eq!(flatten_paths(&tree).len(), MAX_DEPTH);
    }

    #[test]
    fn test_new_then_update_then_quiet() {
        use FieldEventKind::*;
        let mut differ = PathDiffer::new();

        let events = differ.diff(&json!({"title": "H"}));
        assert_eq!(paths(&events), vec![(NewField, "title")]);

        let events = differ.diff(&json!({"title": "Hi", "n": 1}));
        assert_eq!(paths(&events), vec![(UpdateField, "title"), (NewField, "n")]);
        assert_eq!(events[0].value, json!("Hi"));

        assert!(differ.diff(&json!({"title": "Hi", "n": 1})).is_empty());
    }

    #[test]
    fn test_containers_update_when_children_change() {
        use FieldEventKind::*;
        let mut differ = PathDiffer::new();
        differ.diff(&json!({"list": []}));

        let events = differ.diff(&json!({"list": [{"name": "A"}]}));
        assert_eq!(
            paths(&events),
            vec![
                (UpdateField, "list"),
                (NewField, "list[0]"),
                (NewField, "list[0].name")
            ]
        );
    }

    #[test]
    fn test_null_is_not_zero_or_empty() {
        let mut differ = PathDiffer::new();
        differ.diff(&json!({"a": null}));
        assert_eq!(differ.diff(&json!({"a": 0})).len(), 1);
        assert_eq!(differ.diff(&json!({"a": ""})).len(), 1);
        assert_eq!(differ.diff(&json!({"a": null})).len(), 1);
    }

    #[test]
    fn test_object_member_order_is_not_a_change() {
        let mut differ = PathDiffer::new();
        differ.diff(&json!({"o": {"a": 1, "b": 2}}));
        let reordered: Value = serde_json::from_str(r#"{"o": {"b": 2, "a": 1}}"#).unwrap();
        assert!(differ.diff(&reordered).is_empty());
    }

    #[test]
    fn test_disappearing_path_is_silent() {
        let mut differ = PathDiffer::new();
        differ.diff(&json!({"list": [1, 2]}));
        let events = differ.diff(&json!({"list": [1]}));
        assert_eq!(paths(&events), vec![(FieldEventKind::UpdateField, "list")]);
        assert_eq!(differ.latest("list[1]"), Some(&json!(2)));
    }
}
