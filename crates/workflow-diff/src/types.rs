//! Core types for workflow documents
//!
//! A workflow is a list of nodes plus a connection map. Connections are
//! keyed by node *name*, not id, so a rename has to be carried into the
//! map explicitly (see [`crate::rename`]).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Opaque, stable identifier of a node
pub type NodeId = String;

/// Output slots of one channel; each slot holds its outgoing edges in order
pub type OutputSlots = Vec<Vec<ConnectionTarget>>;

/// Outgoing connections of one node, keyed by channel ("main", "error", ...)
pub type NodeConnections = IndexMap<String, OutputSlots>;

/// Source node name -> channel -> slots -> edges
pub type ConnectionMap = IndexMap<String, NodeConnections>;

/// Canvas position (x, y), carried as the caller's own numbers
pub type Position = [Number; 2];

/// Default connection channel
pub const MAIN_CHANNEL: &str = "main";

/// The receiving end of a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    /// Target node name
    pub node: String,
    /// Target input channel
    #[serde(rename = "type")]
    pub input: String,
    /// Target input index
    pub index: usize,
}

impl ConnectionTarget {
    pub fn new(node: impl Into<String>, input: impl Into<String>, index: usize) -> Self {
        Self {
            node: node.into(),
            input: input.into(),
            index,
        }
    }
}

fn default_type_version() -> Number {
    Number::from(1)
}

fn default_position() -> Position {
    [Number::from(0), Number::from(0)]
}

/// JSON number for `value`, using the integer form for whole values.
/// Non-finite input maps to 0.
pub fn json_number(value: f64) -> Number {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        Number::from(value as i64)
    } else {
        Number::from_f64(value).unwrap_or_else(|| Number::from(0))
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// A node instance in a workflow
///
/// Fields the engine does not interpret (notes, alwaysOutputData, ...) are
/// kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    /// Unique identifier; generated on insertion when empty
    #[serde(default)]
    pub id: NodeId,
    /// Logical identity, unique after normalization
    #[serde(default)]
    pub name: String,
    /// Package-prefixed node type (e.g. "n8n-nodes-base.set")
    #[serde(rename = "type", default)]
    pub node_type: String,
    /// Kept as written (`1` stays `1`); see [`WorkflowNode::version`]
    #[serde(default = "default_type_version")]
    pub type_version: Number,
    #[serde(default = "default_position")]
    pub position: Position,
    /// Node-type specific configuration, carried as opaque JSON
    #[serde(default = "empty_object")]
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_on_fail: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_between_tries: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowNode {
    /// Create a node with default version, position and empty parameters
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        node_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_type: node_type.into(),
            type_version: default_type_version(),
            position: default_position(),
            parameters: empty_object(),
            credentials: None,
            disabled: None,
            on_error: None,
            retry_on_fail: None,
            max_tries: None,
            wait_between_tries: None,
            webhook_id: None,
            extra: Map::new(),
        }
    }

    /// Type version as a float, for threshold comparisons
    pub fn version(&self) -> f64 {
        self.type_version.as_f64().unwrap_or(1.0)
    }

    /// Whether the node is disabled
    pub fn is_disabled(&self) -> bool {
        self.disabled.unwrap_or(false)
    }
}

/// A complete workflow document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub connections: ConnectionMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<IndexMap<String, Value>>,
    /// Tags, either plain names or `{id, name}` objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An edge that references a node which does not exist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleConnection {
    pub from: String,
    pub to: String,
}

impl Workflow {
    /// Create a new empty workflow
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Find a node by ID
    pub fn find_node_by_id(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Check whether a node with exactly this name exists
    pub fn has_node_named(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n.name == name)
    }

    /// Every edge whose source or target name no longer matches a node
    pub fn stale_connections(&self) -> Vec<StaleConnection> {
        let mut stale = Vec::new();
        for (source, channels) in &self.connections {
            let source_missing = !self.has_node_named(source);
            for target in channels.values().flatten().flatten() {
                if source_missing || !self.has_node_named(&target.node) {
                    stale.push(StaleConnection {
                        from: source.clone(),
                        to: target.node.clone(),
                    });
                }
            }
        }
        stale
    }

    /// Check whether an edge `source -> target` exists on a channel,
    /// optionally restricted to one slot
    pub fn has_connection(
        &self,
        source: &str,
        channel: &str,
        slot: Option<usize>,
        target: &str,
    ) -> bool {
        let Some(slots) = self.connections.get(source).and_then(|c| c.get(channel)) else {
            return false;
        };
        match slot {
            Some(index) => slots
                .get(index)
                .is_some_and(|edges| edges.iter().any(|e| e.node == target)),
            None => slots.iter().flatten().any(|e| e.node == target),
        }
    }
}

/// Remove every edge for which `remove(source, channel, slot, target)`
/// returns true, then prune what became empty.
///
/// Only channels that lost an edge are pruned. Their trailing empty slots
/// are trimmed but inner empty slots are kept, so the slot positions of
/// surviving edges (IF true/false, Switch cases) never shift. Channels and
/// sources left without edges are deleted.
pub fn retain_connections<F>(
    connections: &mut ConnectionMap,
    mut remove: F,
) -> Vec<StaleConnection>
where
    F: FnMut(&str, &str, usize, &ConnectionTarget) -> bool,
{
    let mut removed = Vec::new();
    let mut emptied_sources = Vec::new();

    for (source, channels) in connections.iter_mut() {
        let mut emptied_channels = Vec::new();
        for (channel, slots) in channels.iter_mut() {
            let before = removed.len();
            for (slot_index, edges) in slots.iter_mut().enumerate() {
                edges.retain(|target| {
                    if remove(source, channel, slot_index, target) {
                        removed.push(StaleConnection {
                            from: source.clone(),
                            to: target.node.clone(),
                        });
                        false
                    } else {
                        true
                    }
                });
            }
            if removed.len() > before {
                trim_trailing_slots(slots);
                if slots.is_empty() {
                    emptied_channels.push(channel.clone());
                }
            }
        }
        if !emptied_channels.is_empty() {
            channels.retain(|channel, _| !emptied_channels.contains(channel));
            if channels.is_empty() {
                emptied_sources.push(source.clone());
            }
        }
    }
    connections.retain(|source, _| !emptied_sources.contains(source));

    removed
}

/// Drop empty slots from the end of a channel
pub fn trim_trailing_slots(slots: &mut OutputSlots) {
    while slots.last().is_some_and(|edges| edges.is_empty()) {
        slots.pop();
    }
}

/// Name of a tag entry, whether stored as a string or as `{name: ...}`
pub fn tag_name(tag: &Value) -> Option<&str> {
    match tag {
        Value::String(name) => Some(name),
        Value::Object(fields) => fields.get("name").and_then(Value::as_str),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Workflow {
        serde_json::from_value(json!({
            "name": "Sample",
            "nodes": [
                {"id": "1", "name": "Start", "type": "n8n-nodes-base.manualTrigger",
                    "typeVersion": 1, "position": [0, 0], "parameters": {}},
                {"id": "2", "name": "Check", "type": "n8n-nodes-base.if",
                    "typeVersion": 2.2, "position": [200, 0], "parameters": {}},
                {"id": "3", "name": "Yes", "type": "n8n-nodes-base.set",
                    "position": [400, 0], "notes": "kept"}
            ],
            "connections": {
                "Start": {"main": [[{"node": "Check", "type": "main", "index": 0}]]},
                "Check": {"main": [
                    [{"node": "Yes", "type": "main", "index": 0}],
                    [{"node": "Gone", "type": "main", "index": 0}]
                ]}
            },
            "staticData": {"counter": 1}
        }))
        .unwrap()
    }

    #[test]
    fn test_unknown_fields_are_preserved() {
        let workflow = sample();
        assert_eq!(workflow.extra.get("staticData"), Some(&json!({"counter": 1})));
        assert_eq!(workflow.nodes[2].extra.get("notes"), Some(&json!("kept")));

        let value = serde_json::to_value(&workflow).unwrap();
        assert_eq!(value["staticData"]["counter"], json!(1));
        assert_eq!(value["nodes"][2]["notes"], json!("kept"));
        assert!(value["nodes"][0].get("disabled").is_none());
    }

    #[test]
    fn test_node_defaults() {
        let workflow = sample();
        assert_eq!(workflow.nodes[2].type_version, Number::from(1));
        assert_eq!(workflow.nodes[2].version(), 1.0);
        assert_eq!(workflow.nodes[1].version(), 2.2);
        assert_eq!(workflow.nodes[2].parameters, json!({}));
    }

    #[test]
    fn test_numbers_keep_their_written_form() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["nodes"][0]["typeVersion"], json!(1));
        assert_eq!(value["nodes"][0]["position"], json!([0, 0]));
        assert_eq!(value["nodes"][1]["typeVersion"], json!(2.2));
        assert_eq!(value["nodes"][2]["typeVersion"], json!(1));
    }

    #[test]
    fn test_json_number_prefers_integers() {
        assert_eq!(json_number(220.0), Number::from(220));
        assert_eq!(json_number(-40.0), Number::from(-40));
        assert_eq!(Value::Number(json_number(2.5)), json!(2.5));
        assert_eq!(json_number(f64::NAN), Number::from(0));
    }

    #[test]
    fn test_stale_connections() {
        let stale = sample().stale_connections();
        assert_eq!(
            stale,
            vec![StaleConnection {
                from: "Check".to_string(),
                to: "Gone".to_string()
            }]
        );
    }

    #[test]
    fn test_has_connection_by_slot() {
        let workflow = sample();
        assert!(workflow.has_connection("Check", "main", None, "Gone"));
        assert!(workflow.has_connection("Check", "main", Some(1), "Gone"));
        assert!(!workflow.has_connection("Check", "main", Some(0), "Gone"));
        assert!(!workflow.has_connection("Check", "error", None, "Yes"));
    }

    #[test]
    fn test_retain_keeps_inner_slot_positions() {
        let mut workflow = sample();
        let removed =
            retain_connections(&mut workflow.connections, |_, _, _, t| t.node == "Yes");
        assert_eq!(removed.len(), 1);

        let slots = &workflow.connections["Check"]["main"];
        assert_eq!(slots.len(), 2);
        assert!(slots[0].is_empty());
        assert_eq!(slots[1][0].node, "Gone");
    }

    #[test]
    fn test_retain_prunes_empty_structures() {
        let mut workflow = sample();
        retain_connections(&mut workflow.connections, |source, _, _, _| source == "Check");
        assert!(!workflow.connections.contains_key("Check"));
        assert!(workflow.connections.contains_key("Start"));
    }

    #[test]
    fn test_tag_name_forms() {
        assert_eq!(tag_name(&json!("prod")), Some("prod"));
        assert_eq!(tag_name(&json!({"id": "7", "name": "prod"})), Some("prod"));
        assert_eq!(tag_name(&json!(3)), None);
    }
}
