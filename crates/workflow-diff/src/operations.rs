//! Diff requests, operations and results
//!
//! Operations are a closed tagged enum keyed by the `type` field, so the
//! validator and applier match on them exhaustively.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{ConnectionMap, Position, StaleConnection, Workflow, WorkflowNode};

/// Which output of an IF node a connection leaves from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    True,
    False,
}

impl Branch {
    /// Output slot of the IF node for this branch
    pub fn slot(self) -> usize {
        match self {
            Branch::True => 0,
            Branch::False => 1,
        }
    }
}

/// Where on the source node a connection leaves from
///
/// `branch` and `case` are the semantic forms; `sourceIndex` is the raw
/// slot. See [`crate::resolver::resolve_source_slot`] for precedence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRoute {
    /// Output channel, "main" when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
    #[serde(rename = "case", default, skip_serializing_if = "Option::is_none")]
    pub case_index: Option<usize>,
}

impl SourceRoute {
    /// Whether the caller pinned a specific slot
    pub fn pins_slot(&self) -> bool {
        self.source_index.is_some() || self.branch.is_some() || self.case_index.is_some()
    }
}

/// A single graph mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DiffOperation {
    // Node operations
    #[serde(rename_all = "camelCase")]
    AddNode { node: WorkflowNode },

    #[serde(rename_all = "camelCase")]
    RemoveNode {
        #[serde(default)]
        node_id: Option<String>,
        #[serde(default)]
        node_name: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    UpdateNode {
        #[serde(default)]
        node_id: Option<String>,
        #[serde(default)]
        node_name: Option<String>,
        /// Dotted path -> new value
        #[serde(default)]
        updates: Option<Map<String, Value>>,
        /// Common mistake for `updates`; only read to report it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        changes: Option<Value>,
    },

    #[serde(rename_all = "camelCase")]
    MoveNode {
        #[serde(default)]
        node_id: Option<String>,
        #[serde(default)]
        node_name: Option<String>,
        position: Position,
    },

    #[serde(rename_all = "camelCase")]
    EnableNode {
        #[serde(default)]
        node_id: Option<String>,
        #[serde(default)]
        node_name: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    DisableNode {
        #[serde(default)]
        node_id: Option<String>,
        #[serde(default)]
        node_name: Option<String>,
    },

    // Connection operations
    #[serde(rename_all = "camelCase")]
    AddConnection {
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        target: Option<String>,
        #[serde(flatten)]
        route: SourceRoute,
        #[serde(default)]
        target_input: Option<String>,
        #[serde(default)]
        target_index: Option<usize>,
        /// Common mistake for `source`; only read to report it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_node_id: Option<Value>,
        /// Common mistake for `target`; only read to report it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_node_id: Option<Value>,
    },

    #[serde(rename_all = "camelCase")]
    RemoveConnection {
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        target: Option<String>,
        #[serde(flatten)]
        route: SourceRoute,
        /// Treat a missing node or edge as a no-op
        #[serde(default)]
        ignore_errors: bool,
    },

    #[serde(rename_all = "camelCase")]
    RewireConnection {
        source: String,
        from: String,
        to: String,
        #[serde(flatten)]
        route: SourceRoute,
        #[serde(default)]
        target_input: Option<String>,
        #[serde(default)]
        target_index: Option<usize>,
    },

    #[serde(rename_all = "camelCase")]
    CleanStaleConnections {
        #[serde(default)]
        dry_run: bool,
    },

    #[serde(rename_all = "camelCase")]
    ReplaceConnections { connections: ConnectionMap },

    // Workflow metadata operations
    #[serde(rename_all = "camelCase")]
    UpdateSettings { settings: IndexMap<String, Value> },

    #[serde(rename_all = "camelCase")]
    UpdateName { name: String },

    #[serde(rename_all = "camelCase")]
    AddTag { tag: String },

    #[serde(rename_all = "camelCase")]
    RemoveTag { tag: String },

    ActivateWorkflow,

    DeactivateWorkflow,
}

/// Wire names of the operations that run in the node phase
const NODE_OPERATION_KINDS: [&str; 6] = [
    "addNode",
    "removeNode",
    "updateNode",
    "moveNode",
    "enableNode",
    "disableNode",
];

/// Whether a wire `type` names a node operation
///
/// Lets an entry that failed to parse still be placed in its phase.
pub fn is_node_operation_kind(kind: &str) -> bool {
    NODE_OPERATION_KINDS.contains(&kind)
}

impl DiffOperation {
    /// Node operations run before everything else in a request
    pub fn is_node_operation(&self) -> bool {
        matches!(
            self,
            DiffOperation::AddNode { .. }
                | DiffOperation::RemoveNode { .. }
                | DiffOperation::UpdateNode { .. }
                | DiffOperation::MoveNode { .. }
                | DiffOperation::EnableNode { .. }
                | DiffOperation::DisableNode { .. }
        )
    }

    /// Wire name of the operation, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            DiffOperation::AddNode { .. } => "addNode",
            DiffOperation::RemoveNode { .. } => "removeNode",
            DiffOperation::UpdateNode { .. } => "updateNode",
            DiffOperation::MoveNode { .. } => "moveNode",
            DiffOperation::EnableNode { .. } => "enableNode",
            DiffOperation::DisableNode { .. } => "disableNode",
            DiffOperation::AddConnection { .. } => "addConnection",
            DiffOperation::RemoveConnection { .. } => "removeConnection",
            DiffOperation::RewireConnection { .. } => "rewireConnection",
            DiffOperation::CleanStaleConnections { .. } => "cleanStaleConnections",
            DiffOperation::ReplaceConnections { .. } => "replaceConnections",
            DiffOperation::UpdateSettings { .. } => "updateSettings",
            DiffOperation::UpdateName { .. } => "updateName",
            DiffOperation::AddTag { .. } => "addTag",
            DiffOperation::RemoveTag { .. } => "removeTag",
            DiffOperation::ActivateWorkflow => "activateWorkflow",
            DiffOperation::DeactivateWorkflow => "deactivateWorkflow",
        }
    }
}

/// A batch of operations to apply to one workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffRequest {
    pub operations: Vec<DiffOperation>,
    /// Validate against a discarded copy, never return the workflow
    #[serde(default)]
    pub validate_only: bool,
    /// Skip failing operations instead of aborting the call
    #[serde(default)]
    pub continue_on_error: bool,
}

impl DiffRequest {
    /// Create an atomic request
    pub fn new(operations: Vec<DiffOperation>) -> Self {
        Self {
            operations,
            validate_only: false,
            continue_on_error: false,
        }
    }

    /// Only validate, do not return the mutated workflow
    pub fn validate_only(mut self) -> Self {
        self.validate_only = true;
        self
    }

    /// Apply what can be applied and report the rest
    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }
}

/// Operation index used for failures outside any single operation
pub const ENGINE_ERROR_INDEX: i64 = -1;

/// A failed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffErrorRecord {
    /// Index in the request, or -1 for engine errors
    pub operation: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Non-fatal guidance attached to an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffWarning {
    pub operation: usize,
    pub message: String,
}

/// Outcome of a diff call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Workflow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations_applied: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<DiffErrorRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<DiffWarning>,
    /// Indices applied in continueOnError mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied: Option<Vec<usize>>,
    /// Indices that failed in continueOnError mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub should_activate: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub should_deactivate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_connections_removed: Option<Vec<StaleConnection>>,
}

impl DiffResult {
    /// A failed call carrying the given errors
    pub fn failure(errors: Vec<DiffErrorRecord>) -> Self {
        Self {
            success: false,
            errors,
            ..Default::default()
        }
    }

    /// A failure outside any single operation
    pub fn engine_error(message: impl std::fmt::Display) -> Self {
        Self::failure(vec![DiffErrorRecord {
            operation: ENGINE_ERROR_INDEX,
            message: format!("Diff engine error: {}", message),
            details: None,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request_with_all_families() {
        let request: DiffRequest = serde_json::from_value(json!({
            "operations": [
                {"type": "addNode", "node": {"name": "Set", "type": "n8n-nodes-base.set"}},
                {"type": "addConnection", "source": "A", "target": "B", "branch": "false",
                    "sourceOutput": "main"},
                {"type": "removeConnection", "source": "A", "target": "B", "case": 2,
                    "ignoreErrors": true},
                {"type": "cleanStaleConnections", "dryRun": true},
                {"type": "activateWorkflow"}
            ],
            "continueOnError": true
        }))
        .unwrap();

        assert!(request.continue_on_error);
        assert!(!request.validate_only);
        assert_eq!(request.operations.len(), 5);

        match &request.operations[1] {
            DiffOperation::AddConnection { route, .. } => {
                assert_eq!(route.branch, Some(Branch::False));
                assert_eq!(route.source_output.as_deref(), Some("main"));
            }
            other => panic!("unexpected operation: {:?}", other),
        }
        match &request.operations[2] {
            DiffOperation::RemoveConnection { route, ignore_errors, .. } => {
                assert_eq!(route.case_index, Some(2));
                assert!(*ignore_errors);
            }
            other => panic!("unexpected operation: {:?}", other),
        }
        assert_eq!(request.operations[4], DiffOperation::ActivateWorkflow);
    }

    #[test]
    fn test_update_node_keeps_changes_for_diagnostics() {
        let op: DiffOperation = serde_json::from_value(json!({
            "type": "updateNode", "nodeName": "Set", "changes": {"name": "X"}
        }))
        .unwrap();
        match op {
            DiffOperation::UpdateNode { updates, changes, .. } => {
                assert!(updates.is_none());
                assert!(changes.is_some());
            }
            other => panic!("unexpected operation: {:?}", other),
        }
    }

    #[test]
    fn test_partition_helpers() {
        let op = DiffOperation::UpdateName {
            name: "x".to_string(),
        };
        assert!(!op.is_node_operation());
        assert_eq!(op.kind(), "updateName");
        assert!(DiffOperation::DisableNode {
            node_id: None,
            node_name: Some("A".to_string())
        }
        .is_node_operation());
    }

    #[test]
    fn test_node_kinds_match_parsed_operations() {
        for kind in NODE_OPERATION_KINDS {
            assert!(is_node_operation_kind(kind));
        }
        assert!(!is_node_operation_kind("rewireConnection"));
        assert!(!is_node_operation_kind("teleportNode"));

        let op: DiffOperation = serde_json::from_value(json!({
            "type": "moveNode", "nodeName": "A", "position": [10, 2.5]
        }))
        .unwrap();
        assert!(op.is_node_operation());
        assert!(is_node_operation_kind(op.kind()));
        match op {
            DiffOperation::MoveNode { position, .. } => {
                assert_eq!(serde_json::to_value(position).unwrap(), json!([10, 2.5]));
            }
            other => panic!("unexpected operation: {:?}", other),
        }
    }

    #[test]
    fn test_result_serialization_skips_empty_fields() {
        let value = serde_json::to_value(DiffResult::engine_error("boom")).unwrap();
        assert_eq!(
            value,
            json!({
                "success": false,
                "errors": [{"operation": -1, "message": "Diff engine error: boom"}]
            })
        );
    }
}
