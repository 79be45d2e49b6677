//! Custom field definitions and values.
//!
//! Definitions come from the channel configuration and describe what the
//! customer may fill in: free text (optionally validated as e-mail), a
//! single-select list, or a hierarchical tree. Values are the
//! `{ident, value, updatedAt}` records exchanged when fields are set.
//!
//! Tree options arrive as a flat list of `{value, name, parentId?}` records in
//! no particular order. [`build_forest`] places them with a worklist: a record
//! whose parent has not been placed yet is re-queued, and records whose parent
//! never shows up are logged and dropped.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::{join_path, DecodeError};
use crate::logging::Logger;

/// Anything that takes part in last-write-wins custom field merging.
pub trait CustomFieldRecord {
    /// Logical identity of the field.
    fn ident(&self) -> &str;
    /// When the record was last written.
    fn updated_at(&self) -> DateTime<Utc>;
}

/// A value set for a custom field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFieldValue {
    /// Field identifier.
    pub ident: String,
    /// Current value.
    pub value: String,
    /// Last write time.
    #[serde(default = "epoch")]
    pub updated_at: DateTime<Utc>,
}

impl CustomFieldRecord for CustomFieldValue {
    fn ident(&self) -> &str {
        &self.ident
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// One option of a single-select list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorOption {
    /// Key sent back to the backend.
    pub value: String,
    /// Label shown to the user.
    pub label: String,
}

/// A node of a hierarchical custom field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    /// Key sent back to the backend.
    pub value: String,
    /// Label shown to the user.
    pub label: String,
    /// Child nodes, in wire order.
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Depth-first search for a node by value.
    #[must_use]
    pub fn find(&self, value: &str) -> Option<&TreeNode> {
        if self.value == value {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(value))
    }

    fn find_mut(&mut self, value: &str) -> Option<&mut TreeNode> {
        if self.value == value {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(value))
    }

    /// A node with no children is selectable.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// The variant-specific part of a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomFieldKind {
    /// Free text, optionally validated as an e-mail address.
    Text {
        /// Validate the value as an e-mail address.
        is_email: bool,
    },
    /// Single-select list.
    Selector {
        /// Options in display order.
        options: Vec<SelectorOption>,
    },
    /// Hierarchical tree (multi-root forest).
    Tree {
        /// Root nodes.
        nodes: Vec<TreeNode>,
    },
}

/// A custom field definition from the channel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomFieldDefinition {
    /// Field identifier.
    pub ident: String,
    /// Label shown to the user.
    pub label: String,
    /// Whether the field must be filled before sending.
    pub is_required: bool,
    /// Current value, if any.
    pub value: Option<String>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
    /// Variant-specific shape.
    pub kind: CustomFieldKind,
}

impl CustomFieldRecord for CustomFieldDefinition {
    fn ident(&self) -> &str {
        &self.ident
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl CustomFieldDefinition {
    /// Check a candidate value against the definition.
    #[must_use]
    pub fn accepts(&self, value: &str) -> bool {
        match &self.kind {
            CustomFieldKind::Text { is_email: false } => true,
            CustomFieldKind::Text { is_email: true } => looks_like_email(value),
            CustomFieldKind::Selector { options } => options.iter().any(|o| o.value == value),
            CustomFieldKind::Tree { nodes } => nodes
                .iter()
                .find_map(|n| n.find(value))
                .is_some_and(TreeNode::is_leaf),
        }
    }
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !value.contains(char::is_whitespace)
}

/// One record of a flat tree option list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeRecord {
    /// Node value.
    pub value: String,
    /// Node label.
    pub name: String,
    /// Parent node value, `None` for roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// Build a forest from flat records, regardless of input order.
///
/// Records whose parent is not placed yet are re-queued; the loop ends when a
/// full pass over the queue places nothing. Remaining records are orphans.
#[must_use]
pub fn build_forest(records: Vec<TreeRecord>, logger: &Logger) -> Vec<TreeNode> {
    let mut roots: Vec<TreeNode> = Vec::new();
    let mut queue: VecDeque<TreeRecord> = records.into();
    let mut stalled = 0;

    while let Some(record) = queue.pop_front() {
        let node = TreeNode {
            value: record.value.clone(),
            label: record.name.clone(),
            children: Vec::new(),
        };

        let placed = match &record.parent_id {
            None => {
                roots.push(node);
                true
            }
            Some(parent) => match roots.iter_mut().find_map(|r| r.find_mut(parent)) {
                Some(parent_node) => {
                    parent_node.children.push(node);
                    true
                }
                None => false,
            },
        };

        if placed {
            stalled = 0;
        } else {
            queue.push_back(record);
            stalled += 1;
            if stalled > queue.len() {
                break;
            }
        }
    }

    for orphan in queue {
        logger.warn(format_args!(
            "[CustomFields] Dropping tree node '{}': parent '{}' not found",
            orphan.value,
            orphan.parent_id.as_deref().unwrap_or_default()
        ));
    }

    roots
}

/// Flatten a forest into records, parents before children.
#[must_use]
pub fn flatten_forest(nodes: &[TreeNode]) -> Vec<TreeRecord> {
    fn walk(node: &TreeNode, parent: Option<&str>, out: &mut Vec<TreeRecord>) {
        out.push(TreeRecord {
            value: node.value.clone(),
            name: node.label.clone(),
            parent_id: parent.map(str::to_string),
        });
        for child in &node.children {
            walk(child, Some(&node.value), out);
        }
    }

    let mut out = Vec::new();
    for node in nodes {
        walk(node, None, &mut out);
    }
    out
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefinitionWire {
    ident: String,
    label: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    is_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default = "epoch")]
    updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    values: Vec<TreeRecord>,
}

impl CustomFieldDefinition {
    /// Decode one definition found at `path`.
    pub fn decode(value: &Value, path: &str, logger: &Logger) -> Result<Self, DecodeError> {
        let wire: DefinitionWire =
            serde_json::from_value(value.clone()).map_err(|e| DecodeError::at(path, &e))?;

        let kind = match wire.kind.to_ascii_lowercase().as_str() {
            "text" => CustomFieldKind::Text { is_email: false },
            "email" => CustomFieldKind::Text { is_email: true },
            "list" => CustomFieldKind::Selector {
                options: wire
                    .values
                    .into_iter()
                    .map(|r| SelectorOption {
                        value: r.value,
                        label: r.name,
                    })
                    .collect(),
            },
            "tree" => CustomFieldKind::Tree {
                nodes: build_forest(wire.values, logger),
            },
            _ => {
                return Err(DecodeError::UnknownVariant {
                    path: join_path(path, "type"),
                    value: wire.kind,
                })
            }
        };

        Ok(Self {
            ident: wire.ident,
            label: wire.label,
            is_required: wire.is_required,
            value: wire.value,
            updated_at: wire.updated_at,
            kind,
        })
    }

    /// Decode a list of definitions, dropping (and logging) invalid entries.
    #[must_use]
    pub fn decode_list(values: &[Value], path: &str, logger: &Logger) -> Vec<Self> {
        values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| match Self::decode(v, &format!("{path}[{i}]"), logger) {
                Ok(def) => Some(def),
                Err(e) => {
                    logger.warn(format_args!("[CustomFields] Skipping definition: {e}"));
                    None
                }
            })
            .collect()
    }

    fn to_wire(&self) -> DefinitionWire {
        let (kind, values) = match &self.kind {
            CustomFieldKind::Text { is_email: false } => ("text", Vec::new()),
            CustomFieldKind::Text { is_email: true } => ("email", Vec::new()),
            CustomFieldKind::Selector { options } => (
                "list",
                options
                    .iter()
                    .map(|o| TreeRecord {
                        value: o.value.clone(),
                        name: o.label.clone(),
                        parent_id: None,
                    })
                    .collect(),
            ),
            CustomFieldKind::Tree { nodes } => ("tree", flatten_forest(nodes)),
        };
        DefinitionWire {
            ident: self.ident.clone(),
            label: self.label.clone(),
            kind: kind.to_string(),
            is_required: self.is_required,
            value: self.value.clone(),
            updated_at: self.updated_at,
            values,
        }
    }
}

impl Serialize for CustomFieldDefinition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::tests::CaptureSink;
    use log::Level;
    use serde_json::json;
    use std::sync::Arc;

    fn logger() -> Logger {
        Logger::default()
    }

    fn record(value: &str, parent: Option<&str>) -> TreeRecord {
        TreeRecord {
            value: value.to_string(),
            name: format!("Label {value}"),
            parent_id: parent.map(str::to_string),
        }
    }

    #[test]
    fn test_child_before_parent_is_placed_under_parent() {
        let forest = build_forest(vec![record("B", Some("A")), record("A", None)], &logger());
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].value, "A");
        assert_eq!(forest[0].children.len(), 1);
        assert_eq!(forest[0].children[0].value, "B");
    }

    #[test]
    fn test_deep_reverse_order_and_multiple_roots() {
        let forest = build_forest(
            vec![
                record("C", Some("B")),
                record("B", Some("A")),
                record("X", None),
                record("A", None),
            ],
            &logger(),
        );
        assert_eq!(forest.iter().map(|n| n.value.as_str()).collect::<Vec<_>>(), ["X", "A"]);
        let a = &forest[1];
        assert_eq!(a.find("C").map(|n| n.value.as_str()), Some("C"));
    }

    #[test]
    fn test_orphans_are_dropped() {
        let sink = Arc::new(CaptureSink::default());
        let logger = Logger::new(Arc::clone(&sink) as Arc<dyn crate::logging::LogSink>);
        let forest = build_forest(vec![record("A", None), record("Z", Some("missing"))], &logger);
        assert_eq!(forest.len(), 1);
        assert!(forest[0].find("Z").is_none());

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, Level::Warn);
        assert!(records[0].1.contains("'Z'"));
    }

    #[test]
    fn test_tree_definition_round_trips() {
        let raw = json!({
            "ident": "topic",
            "label": "Topic",
            "type": "tree",
            "updatedAt": "2024-03-01T12:00:00Z",
            "values": [
                {"value": "mobile", "name": "Mobile", "parentId": "devices"},
                {"value": "devices", "name": "Devices"},
                {"value": "billing", "name": "Billing"}
            ]
        });
        let def = CustomFieldDefinition::decode(&raw, "", &logger()).unwrap();
        let CustomFieldKind::Tree { nodes } = &def.kind else {
            panic!("expected tree");
        };
        assert_eq!(nodes.len(), 2);
        assert!(def.accepts("mobile"));
        assert!(!def.accepts("devices"));

        let again =
            CustomFieldDefinition::decode(&serde_json::to_value(&def).unwrap(), "", &logger())
                .unwrap();
        assert_eq!(again, def);
    }

    #[test]
    fn test_list_keeps_option_order() {
        let raw = json!({
            "ident": "size", "label": "Size", "type": "LIST",
            "values": [{"value": "s", "name": "Small"}, {"value": "l", "name": "Large"}]
        });
        let def = CustomFieldDefinition::decode(&raw, "", &logger()).unwrap();
        let CustomFieldKind::Selector { options } = &def.kind else {
            panic!("expected selector");
        };
        assert_eq!(options[0].label, "Small");
        assert_eq!(options[1].value, "l");
        assert!(def.accepts("s"));
        assert!(!def.accepts("m"));
    }

    #[test]
    fn test_unknown_type_names_the_field() {
        let raw = json!({"ident": "x", "label": "X", "type": "slider"});
        let err = CustomFieldDefinition::decode(&raw, "endUserCustomFields[0]", &logger()).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnknownVariant {
                path: "endUserCustomFields[0].type".to_string(),
                value: "slider".to_string()
            }
        );
    }

    #[test]
    fn test_decode_list_skips_bad_entries() {
        let values = vec![
            json!({"ident": "email", "label": "E-mail", "type": "email"}),
            json!({"ident": "x", "label": "X", "type": "slider"}),
        ];
        let defs = CustomFieldDefinition::decode_list(&values, "fields", &logger());
        assert_eq!(defs.len(), 1);
        assert!(defs[0].accepts("jane@example.com"));
        assert!(!defs[0].accepts("jane@"));
    }
}
