//! Declarative table of the fields a consumer wants to see.
//!
//! Each [`FieldDefinition`] maps a path pattern to display metadata. A
//! pattern is a concrete path in which any array position may be written
//! as `[*]`. Matching is exact and registry order decides ties, so more
//! specific entries go first. Paths matching nothing are not rendered.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::config::{read_file, ConfigError};

pub const WILDCARD: &str = "[*]";

/// Sort key of fields that declare no order.
pub const UNORDERED: i64 = i64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    #[default]
    Field,
    Section,
    List,
    ListItem,
}

/// Computes a content-based identity key for a matched value.
#[derive(Clone)]
pub struct KeyExtractor(Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>);

impl KeyExtractor {
    pub fn new(f: impl Fn(&Value) -> Option<String> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn extract(&self, value: &Value) -> Option<String> {
        (self.0)(value)
    }
}

impl fmt::Debug for KeyExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyExtractor(..)")
    }
}

impl PartialEq for KeyExtractor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(rename = "path")]
    pub path_pattern: String,
    #[serde(rename = "render")]
    pub render_kind: String,
    #[serde(rename = "container", default)]
    pub container_kind: ContainerKind,
    /// Group template. `{0}`, `{1}` ... stand for the wildcard indices.
    #[serde(rename = "group", default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    /// Member of the matched object whose value is the identity key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_field: Option<String>,
    #[serde(skip)]
    pub key_extractor: Option<KeyExtractor>,
}

impl FieldDefinition {
    pub fn new(path_pattern: impl Into<String>, render_kind: impl Into<String>) -> Self {
        Self {
            path_pattern: path_pattern.into(),
            render_kind: render_kind.into(),
            container_kind: ContainerKind::Field,
            group_key: None,
            order: None,
            key_field: None,
            key_extractor: None,
        }
    }

    pub fn container(mut self, kind: ContainerKind) -> Self {
        self.container_kind = kind;
        self
    }

    pub fn group(mut self, template: impl Into<String>) -> Self {
        self.group_key = Some(template.into());
        self
    }

    pub fn order(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }

    pub fn key_field(mut self, member: impl Into<String>) -> Self {
        self.key_field = Some(member.into());
        self
    }

    pub fn key_with(mut self, f: impl Fn(&Value) -> Option<String> + Send + Sync + 'static) -> Self {
        self.key_extractor = Some(KeyExtractor::new(f));
        self
    }

    pub fn sort_order(&self) -> i64 {
        self.order.unwrap_or(UNORDERED)
    }

    pub fn wildcard_count(&self) -> usize {
        self.path_pattern.matches(WILDCARD).count()
    }

    fn has_key(&self) -> bool {
        self.key_extractor.is_some() || self.key_field.is_some()
    }

    /// Identity key for `value`, if the definition declares one and the
    /// value carries it yet.
    pub fn identity_key(&self, value: &Value) -> Option<String> {
        if let Some(extractor) = &self.key_extractor {
            return extractor.extract(value).filter(|k| !k.is_empty());
        }
        let member = value.get(self.key_field.as_deref()?)?;
        match member {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Group of a field matched with `indices`, with placeholders filled in.
    pub fn resolve_group(&self, indices: &[usize]) -> Option<String> {
        let template = self.group_key.as_ref()?;
        let mut group = template.clone();
        for (position, index) in indices.iter().enumerate() {
            group = group.replace(&format!("{{{}}}", position), &index.to_string());
        }
        Some(group)
    }
}

/// A definition that matched a concrete path.
#[derive(Debug, Clone, Copy)]
pub struct FieldMatch<'a> {
    pub definition: &'a FieldDefinition,
    /// Position of the definition in the registry.
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchedPath<'a> {
    pub definition: &'a FieldDefinition,
    pub position: usize,
    /// Array indices bound to each `[*]`, left to right.
    pub indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryProblem {
    #[error("entry {index}: empty path pattern")]
    EmptyPattern { index: usize },

    #[error("pattern '{pattern}' is declared twice (entries {first} and {second}); entry {second} can never match")]
    DuplicatePattern {
        pattern: String,
        first: usize,
        second: usize,
    },

    #[error("pattern '{pattern}' has a malformed array segment")]
    MalformedWildcard { pattern: String },

    #[error("pattern '{pattern}' does not compile: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("pattern '{pattern}' has no render kind")]
    EmptyRenderKind { pattern: String },

    #[error("pattern '{pattern}' renders as unknown component '{render_kind}'")]
    UnknownComponent { pattern: String, render_kind: String },

    #[error("pattern '{pattern}' group '{group}' refers to wildcard {{{index}}} but the pattern has {available}")]
    GroupIndexOutOfRange {
        pattern: String,
        group: String,
        index: usize,
        available: usize,
    },

    #[error("pattern '{pattern}' declares an identity key but has no wildcard")]
    KeyWithoutWildcard { pattern: String },
}

#[derive(Debug, Clone)]
struct CompiledDefinition {
    definition: FieldDefinition,
    matcher: Option<Regex>,
}

/// Ordered, immutable set of field definitions.
///
/// Cheap to share: wrap it in an `Arc` and hand it to any number of engines.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    entries: Vec<CompiledDefinition>,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    fields: Vec<FieldDefinition>,
}

impl FieldRegistry {
    pub fn new(definitions: Vec<FieldDefinition>) -> Self {
        let entries = definitions
            .into_iter()
            .map(|definition| {
                let matcher = match compile_pattern(&definition.path_pattern) {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        warn!("Field pattern '{}' will never match: {}", definition.path_pattern, e);
                        None
                    }
                };
                CompiledDefinition { definition, matcher }
            })
            .collect();
        Self { entries }
    }

    /// Parse a YAML registry: either a bare list of definitions or a map
    /// with a `fields` list.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let definitions = match serde_yaml::from_str::<Vec<FieldDefinition>>(text) {
            Ok(list) => list,
            Err(_) => serde_yaml::from_str::<RegistryFile>(text)?.fields,
        };
        Ok(Self::new(definitions))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = read_file(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.entries.iter().map(|e| &e.definition)
    }

    /// First definition, in registry order, whose pattern matches `path`.
    pub fn match_path(&self, path: &str) -> Option<MatchedPath<'_>> {
        self.entries
            .iter()
            .enumerate()
            .find_map(|(position, entry)| {
                let captures = entry.matcher.as_ref()?.captures(path)?;
                let indices = captures
                    .iter()
                    .skip(1)
                    .filter_map(|m| m.and_then(|m| m.as_str().parse::<usize>().ok()))
                    .collect();
                Some(MatchedPath {
                    definition: &entry.definition,
                    position,
                    indices,
                })
            })
    }

    /// Every definition matching `path`, in registry order.
    pub fn all_matches(&self, path: &str) -> Vec<FieldMatch<'_>> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.matcher.as_ref().is_some_and(|m| m.is_match(path)))
            .map(|(position, entry)| FieldMatch {
                definition: &entry.definition,
                position,
            })
            .collect()
    }

    /// Check the table for authoring mistakes.
    pub fn validate(&self) -> Vec<RegistryProblem> {
        let mut problems = Vec::new();

        for (index, entry) in self.entries.iter().enumerate() {
            let def = &entry.definition;
            let pattern = def.path_pattern.clone();

            if pattern.trim().is_empty() {
                problems.push(RegistryProblem::EmptyPattern { index });
                continue;
            }

            if let Some(first) = self.entries[..index]
                .iter()
                .position(|other| other.definition.path_pattern == pattern)
            {
                problems.push(RegistryProblem::DuplicatePattern {
                    pattern: pattern.clone(),
                    first,
                    second: index,
                });
            }

            if !wildcards_well_formed(&pattern) {
                problems.push(RegistryProblem::MalformedWildcard {
                    pattern: pattern.clone(),
                });
            }

            if let Err(e) = compile_pattern(&pattern) {
                problems.push(RegistryProblem::InvalidPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                });
            }

            if def.render_kind.trim().is_empty() {
                problems.push(RegistryProblem::EmptyRenderKind {
                    pattern: pattern.clone(),
                });
            }

            let available = def.wildcard_count();
            if let Some(group) = &def.group_key {
                for index in group_placeholders(group) {
                    if index >= available {
                        problems.push(RegistryProblem::GroupIndexOutOfRange {
                            pattern: pattern.clone(),
                            group: group.clone(),
                            index,
                            available,
                        });
                    }
                }
            }

            if def.has_key() && available == 0 {
                problems.push(RegistryProblem::KeyWithoutWildcard { pattern });
            }
        }

        problems
    }

    /// [`validate`](Self::validate) plus a check that every render kind is a
    /// component the consumer knows how to draw.
    pub fn validate_components(&self, known: &[&str]) -> Vec<RegistryProblem> {
        let mut problems = self.validate();
        for def in self.definitions() {
            if !def.render_kind.trim().is_empty() && !known.contains(&def.render_kind.as_str()) {
                problems.push(RegistryProblem::UnknownComponent {
                    pattern: def.path_pattern.clone(),
                    render_kind: def.render_kind.clone(),
                });
            }
        }
        problems
    }
}

/// Anchored regex for a path pattern. Each `[*]` captures one index.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(pattern);
    let body = escaped.replace(r"\[\*\]", r"\[(\d+)\]");
    Regex::new(&format!("^{}$", body))
}

/// Every `[` must open either `[*]` or a run of digits closed by `]`, and
/// `*` may only appear inside `[*]`.
fn wildcards_well_formed(pattern: &str) -> bool {
    let mut rest = pattern;
    while let Some(open) = rest.find('[') {
        if rest[..open].contains('*') || rest[..open].contains(']') {
            return false;
        }
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            return false;
        };
        let inner = &after[..close];
        if inner != "*" && (inner.is_empty() || !inner.bytes().all(|b| b.is_ascii_digit())) {
            return false;
        }
        rest = &after[close + 1..];
    }
    !rest.contains('*') && !rest.contains(']')
}

fn group_placeholders(template: &str) -> Vec<usize> {
    let mut found = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                if let Ok(index) = after[..close].parse::<usize>() {
                    found.push(index);
                }
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    found
}

/// Filesystem-safe id derived from a path or pattern.
///
/// `characters[2].name` becomes `characters--2__name`; `[*]` becomes `--any`.
pub fn path_to_id(path: &str) -> String {
    let mut id = String::with_capacity(path.len() + 8);
    for c in path.chars() {
        match c {
            '.' => id.push_str("__"),
            '[' => id.push_str("--"),
            ']' => {}
            '*' => id.push_str("any"),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => id.push(c),
            _ => id.push('_'),
        }
    }
    id
}

/// Id of the field at `path` matched by `definition`.
///
/// Definitions with an identity key get `<pattern id>~<key>` so the field
/// keeps its id when the array is reordered; otherwise the id comes from
/// the path.
pub fn field_id(definition: &FieldDefinition, path: &str, value: &Value) -> String {
    match definition.identity_key(value) {
        Some(key) => format!(
            "{}~{}",
            path_to_id(&definition.path_pattern),
            path_to_id(&key)
        ),
        None => path_to_id(path),
    }
}
