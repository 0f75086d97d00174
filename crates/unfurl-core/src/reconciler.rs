//! Field store and presentation ordering.
//!
//! The reconciler keeps one [`RenderedField`] per matched path for the
//! whole session. Fields are created on first sight, updated in place and
//! never removed; a path that vanishes from a later tree keeps its last
//! value. [`Reconciler::view`] derives the ordered, grouped list handed to
//! the consumer, independent of the order in which fields were discovered.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::differ::FieldEvent;
use crate::registry::{field_id, path_to_id, FieldDefinition, FieldRegistry};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedField {
    pub id: String,
    pub path: String,
    pub definition: FieldDefinition,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    /// Array indices bound to the definition's wildcards.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub indices: Vec<usize>,
}

impl RenderedField {
    fn sort_order(&self) -> i64 {
        self.definition.sort_order()
    }
}

/// One entry of the presentation list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewItem {
    Field(RenderedField),
    Group {
        key: String,
        order: i64,
        members: Vec<RenderedField>,
    },
}

impl ViewItem {
    /// Identifier used to break ties between equal orders.
    pub fn label(&self) -> &str {
        match self {
            ViewItem::Field(field) => &field.path,
            ViewItem::Group { key, .. } => key,
        }
    }

    pub fn order(&self) -> i64 {
        match self {
            ViewItem::Field(field) => field.sort_order(),
            ViewItem::Group { order, .. } => *order,
        }
    }

    /// Every field of the item, in display order.
    pub fn fields(&self) -> Vec<&RenderedField> {
        match self {
            ViewItem::Field(field) => vec![field],
            ViewItem::Group { members, .. } => members.iter().collect(),
        }
    }
}

#[derive(Debug)]
pub struct Reconciler {
    registry: Arc<FieldRegistry>,
    fields: HashMap<String, RenderedField>,
    path_index: HashMap<String, String>,
    unmatched: usize,
}

impl Reconciler {
    pub fn new(registry: Arc<FieldRegistry>) -> Self {
        Self {
            registry,
            fields: HashMap::new(),
            path_index: HashMap::new(),
            unmatched: 0,
        }
    }

    /// Fold one field event into the store. Returns true when the store
    /// changed.
    pub fn apply(&mut self, event: &FieldEvent) -> bool {
        if let Some(id) = self.path_index.get(&event.path) {
            return match self.fields.get_mut(id) {
                Some(field) if field.value != event.value => {
                    field.value = event.value.clone();
                    true
                }
                _ => false,
            };
        }

        let Some(matched) = self.registry.match_path(&event.path) else {
            trace!("No field registered for {}", event.path);
            self.unmatched += 1;
            return false;
        };

        let definition = matched.definition.clone();
        let mut id = field_id(&definition, &event.path, &event.value);
        if self.fields.contains_key(&id) {
            // Two elements carried the same identity key.
            let disambiguated = format!("{}~{}", id, path_to_id(&event.path));
            debug!("Field id {} already taken, using {}", id, disambiguated);
            id = disambiguated;
        }

        let group_key = definition.resolve_group(&matched.indices);
        let field = RenderedField {
            id: id.clone(),
            path: event.path.clone(),
            definition,
            value: event.value.clone(),
            group_key,
            indices: matched.indices,
        };
        self.path_index.insert(event.path.clone(), id.clone());
        self.fields.insert(id, field);
        true
    }

    /// Replace the value of the field rendered at `path`.
    ///
    /// Returns false when nothing is rendered there.
    pub fn edit(&mut self, path: &str, value: Value) -> bool {
        let Some(id) = self.path_index.get(path) else {
            return false;
        };
        match self.fields.get_mut(id) {
            Some(field) => {
                field.value = value;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&RenderedField> {
        self.fields.get(id)
    }

    pub fn get_by_path(&self, path: &str) -> Option<&RenderedField> {
        self.path_index.get(path).and_then(|id| self.fields.get(id))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field events whose path matched no definition.
    pub fn unmatched_events(&self) -> usize {
        self.unmatched
    }

    /// The ordered presentation list.
    ///
    /// Ungrouped fields sort by (declared order, path). Groups take the
    /// order of their first member and sort by (order, group key). Members
    /// sort by (declared order, path).
    pub fn view(&self) -> Vec<ViewItem> {
        let mut items = Vec::new();
        let mut groups: BTreeMap<&str, Vec<RenderedField>> = BTreeMap::new();

        for field in self.fields.values() {
            match &field.group_key {
                Some(key) => groups.entry(key.as_str()).or_default().push(field.clone()),
                None => items.push(ViewItem::Field(field.clone())),
            }
        }

        for (key, mut members) in groups {
            members.sort_by(|a, b| {
                a.sort_order()
                    .cmp(&b.sort_order())
                    .then_with(|| a.path.cmp(&b.path))
            });
            let order = members
                .first()
                .map(RenderedField::sort_order)
                .unwrap_or(crate::registry::UNORDERED);
            items.push(ViewItem::Group {
                key: key.to_string(),
                order,
                members,
            });
        }

        items.sort_by(|a, b| a.order().cmp(&b.order()).then_with(|| a.label().cmp(b.label())));
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::differ::FieldEventKind;
    use serde_json::json;

    fn new_field(path: &str, value: Value) -> FieldEvent {
        FieldEvent {
            kind: FieldEventKind::NewField,
            path: path.to_string(),
            value,
        }
    }

    fn update(path: &str, value: Value) -> FieldEvent {
        FieldEvent {
            kind: FieldEventKind::UpdateField,
            path: path.to_string(),
            value,
        }
    }

    fn labels(view: &[ViewItem]) -> Vec<&str> {
        view.iter().map(ViewItem::label).collect()
    }

    #[test]
    fn test_unregistered_paths_are_dropped() {
        let registry = Arc::new(FieldRegistry::new(vec![FieldDefinition::new("title", "text")]));
        let mut reconciler = Reconciler::new(registry);

        assert!(reconciler.apply(&new_field("title", json!("T"))));
        assert!(!reconciler.apply(&new_field("notes", json!("n"))));
        assert_eq!(reconciler.len(), 1);
        assert_eq!(reconciler.unmatched_events(), 1);
    }

    #[test]
    fn test_update_keeps_identity() {
        let registry = Arc::new(FieldRegistry::new(vec![FieldDefinition::new("characters[*]", "character")
            .key_field("name")
            .group("cast")]));
        let mut reconciler = Reconciler::new(registry);

        reconciler.apply(&new_field("characters[0]", json!({"name": "Ann"})));
        let before = reconciler.get_by_path("characters[0]").unwrap().id.clone();
        assert_eq!(before, "characters--any~Ann");

        assert!(reconciler.apply(&update("characters[0]", json!({"name": "Ann", "age": 30}))));
        let after = reconciler.get_by_path("characters[0]").unwrap();
        assert_eq!(after.id, before);
        assert_eq!(after.group_key.as_deref(), Some("cast"));
        assert_eq!(after.value["age"], json!(30));

        assert!(!reconciler.apply(&update("characters[0]", json!({"name": "Ann", "age": 30}))));
    }

    #[test]
    fn test_duplicate_identity_keys_are_disambiguated() {
        let registry = Arc::new(FieldRegistry::new(vec![
            FieldDefinition::new("characters[*]", "character").key_field("name"),
        ]));
        let mut reconciler = Reconciler::new(registry);

        reconciler.apply(&new_field("characters[0]", json!({"name": "Ann"})));
        reconciler.apply(&new_field("characters[1]", json!({"name": "Ann"})));
        assert_eq!(reconciler.len(), 2);
        assert_eq!(
            reconciler.get_by_path("characters[1]").unwrap().id,
            "characters--any~Ann~characters--1"
        );
    }

    #[test]
    fn test_group_sorts_before_later_field() {
        let registry = Arc::new(FieldRegistry::new(vec![
            FieldDefinition::new("a", "text").order(2),
            FieldDefinition::new("b", "text").order(1).group("g"),
            FieldDefinition::new("c", "text").order(1).group("g"),
        ]));
        let mut reconciler = Reconciler::new(registry);

        // Discovery order is irrelevant.
        reconciler.apply(&new_field("c", json!(3)));
        reconciler.apply(&new_field("a", json!(1)));
        reconciler.apply(&new_field("b", json!(2)));

        let view = reconciler.view();
        assert_eq!(labels(&view), vec!["g", "a"]);
        let members: Vec<&str> = view[0].fields().into_iter().map(|f| f.path.as_str()).collect();
        assert_eq!(members, vec!["b", "c"]);
    }

    #[test]
    fn test_unordered_fields_sort_last_by_path() {
        let registry = Arc::new(FieldRegistry::new(vec![
            FieldDefinition::new("zeta", "text").order(5),
            FieldDefinition::new("beta", "text"),
            FieldDefinition::new("alpha", "text"),
        ]));
        let mut reconciler = Reconciler::new(registry);
        for path in ["alpha", "beta", "zeta"] {
            reconciler.apply(&new_field(path, json!(path)));
        }
        assert_eq!(labels(&reconciler.view()), vec!["zeta", "alpha", "beta"]);
    }

    #[test]
    fn test_wildcard_groups() {
        let registry = Arc::new(FieldRegistry::new(vec![
            FieldDefinition::new("characters[*].name", "text").order(1).group("character-{0}"),
            FieldDefinition::new("characters[*].role", "text").order(2).group("character-{0}"),
        ]));
        let mut reconciler = Reconciler::new(registry);
        reconciler.apply(&new_field("characters[1].role", json!("villain")));
        reconciler.apply(&new_field("characters[0].name", json!("Ann")));
        reconciler.apply(&new_field("characters[1].name", json!("Bo")));

        let view = reconciler.view();
        assert_eq!(labels(&view), vec!["character-0", "character-1"]);
        let second: Vec<&str> = view[1].fields().into_iter().map(|f| f.path.as_str()).collect();
        assert_eq!(second, vec!["characters[1].name", "characters[1].role"]);
        assert_eq!(view[1].fields()[0].indices, vec![1]);
    }

    #[test]
    fn test_edit() {
        let registry = Arc::new(FieldRegistry::new(vec![FieldDefinition::new("title", "text")]));
        let mut reconciler = Reconciler::new(registry);
        reconciler.apply(&new_field("title", json!("Draft")));

        assert!(reconciler.edit("title", json!("Final")));
        assert_eq!(reconciler.get("title").unwrap().value, json!("Final"));
        assert!(!reconciler.edit("missing", json!(1)));
    }
}
