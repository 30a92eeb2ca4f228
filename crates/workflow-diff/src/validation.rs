//! Per-operation precondition checks
//!
//! Validation is pure: it reads the current working copy and either accepts
//! the operation or explains what is wrong. Messages name the likely caller
//! mistake and list candidate nodes where a typo is plausible.

use std::fmt;

use serde_json::{json, Value};
use thiserror::Error;

use crate::catalog::NodeCatalog;
use crate::config::DiffEngineConfig;
use crate::operations::{DiffOperation, SourceRoute};
use crate::resolver::{
    find_node, find_node_by_reference, normalize_node_name, resolve_source_slot, SourceSlot,
};
use crate::types::{ConnectionMap, Workflow, WorkflowNode};

/// Nodes offered to the caller when a reference did not resolve
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCandidates {
    /// (name, id) pairs, capped at the configured limit
    pub listed: Vec<(String, String)>,
    /// Number of nodes in the workflow
    pub total: usize,
}

impl NodeCandidates {
    fn from_workflow(workflow: &Workflow, limit: usize) -> Self {
        Self {
            listed: workflow
                .nodes
                .iter()
                .take(limit)
                .map(|n| (n.name.clone(), n.id.clone()))
                .collect(),
            total: workflow.nodes.len(),
        }
    }

    fn to_json(&self) -> Value {
        Value::Array(
            self.listed
                .iter()
                .map(|(name, id)| json!({"name": name, "id": id}))
                .collect(),
        )
    }
}

impl fmt::Display for NodeCandidates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.listed.is_empty() {
            return write!(f, "(workflow has no nodes)");
        }
        let listed: Vec<String> = self
            .listed
            .iter()
            .map(|(name, id)| format!("\"{}\" (id: {})", name, id))
            .collect();
        write!(f, "{}", listed.join(", "))?;
        if self.total > self.listed.len() {
            write!(f, " and {} more", self.total - self.listed.len())?;
        }
        Ok(())
    }
}

fn describe_slot(slot: &Option<usize>) -> String {
    match slot {
        Some(index) => format!(" at index {}", index),
        None => String::new(),
    }
}

/// A structural precondition an operation violates
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Node name is required for addNode")]
    MissingNodeName,

    #[error("Node type is required for addNode")]
    MissingNodeType,

    #[error(
        "Node with name \"{name}\" already exists. \
         Node names must be unique, choose a different name"
    )]
    DuplicateNodeName { name: String },

    #[error("Node with id \"{id}\" already exists. Omit the id to have one generated")]
    DuplicateNodeId { id: String },

    #[error(
        "Invalid node type \"{node_type}\". \
         Must include package prefix (e.g., \"n8n-nodes-base.{node_type}\")"
    )]
    MissingPackagePrefix { node_type: String },

    #[error("Invalid node type \"{node_type}\". Use \"{suggestion}\" instead (full package name)")]
    ShortPackagePrefix { node_type: String, suggestion: String },

    #[error(
        "Node not found: \"{reference}\". Available nodes: {candidates}. \
         Use the exact node name or id"
    )]
    NodeNotFound {
        reference: String,
        candidates: NodeCandidates,
    },

    #[error("updateNode requires an \"updates\" object mapping property paths to new values")]
    MissingUpdates,

    #[error(
        "Invalid parameter \"changes\": updateNode takes \"updates\", e.g. \
         {{\"type\": \"updateNode\", \"nodeName\": \"HTTP Request\", \
         \"updates\": {{\"parameters.url\": \"https://...\"}}}}"
    )]
    ChangesInsteadOfUpdates,

    #[error("Invalid node name in updates: name must be a non-empty string")]
    InvalidNodeName,

    #[error(
        "Cannot rename node \"{node}\" to \"{new_name}\": \
         node \"{existing}\" already uses that name"
    )]
    RenameConflict {
        node: String,
        new_name: String,
        existing: String,
    },

    #[error("{operation} requires both \"source\" and \"target\"")]
    MissingEndpoints { operation: &'static str },

    #[error(
        "Invalid parameters \"sourceNodeId\"/\"targetNodeId\": \
         {operation} takes \"source\" and \"target\" (node name or id)"
    )]
    NodeIdFieldsUsed { operation: &'static str },

    #[error("{role} node not found: \"{reference}\". Available nodes: {candidates}")]
    EndpointNotFound {
        role: &'static str,
        reference: String,
        candidates: NodeCandidates,
    },

    #[error(
        "Connection already exists from \"{source_node}\" to \"{target_node}\" \
         on output \"{channel}\""
    )]
    DuplicateConnection {
        source_node: String,
        target_node: String,
        channel: String,
    },

    #[error(
        "No connection found from \"{source_node}\" to \"{target_node}\" \
         on output \"{channel}\"{}",
        describe_slot(.slot)
    )]
    ConnectionNotFound {
        source_node: String,
        target_node: String,
        channel: String,
        slot: Option<usize>,
    },

    #[error("Output index {index} is out of range: connections may use slots 0 to {max}")]
    OutputIndexOutOfRange { index: usize, max: usize },

    #[error(
        "Cannot activate workflow: no activatable trigger nodes found. \
         Add an enabled trigger node (webhook, schedule, app trigger, ...) first"
    )]
    NoActivatableTrigger,

    #[error("replaceConnections references unknown {role} node \"{name}\"")]
    UnknownConnectionNode { role: &'static str, name: String },

    #[error("Invalid {kind} operation: {reason}")]
    MalformedOperation { kind: String, reason: String },
}

impl ValidationError {
    /// Structured data for the error record, when there is any
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::NodeNotFound { candidates, .. } | Self::EndpointNotFound { candidates, .. } => {
                Some(json!({ "availableNodes": candidates.to_json() }))
            }
            Self::ShortPackagePrefix { suggestion, .. } => {
                Some(json!({ "suggestedType": suggestion }))
            }
            _ => None,
        }
    }
}

/// Checks each operation against the current state of the working copy
pub struct OperationValidator<'a> {
    config: &'a DiffEngineConfig,
    catalog: &'a dyn NodeCatalog,
}

impl<'a> OperationValidator<'a> {
    pub fn new(config: &'a DiffEngineConfig, catalog: &'a dyn NodeCatalog) -> Self {
        Self { config, catalog }
    }

    /// Validate one operation against `workflow`
    pub fn validate(
        &self,
        workflow: &Workflow,
        operation: &DiffOperation,
    ) -> Result<(), ValidationError> {
        match operation {
            DiffOperation::AddNode { node } => self.validate_add_node(workflow, node),
            DiffOperation::RemoveNode { node_id, node_name }
            | DiffOperation::MoveNode {
                node_id, node_name, ..
            }
            | DiffOperation::EnableNode { node_id, node_name }
            | DiffOperation::DisableNode { node_id, node_name } => self
                .require_node(workflow, node_id.as_deref(), node_name.as_deref())
                .map(|_| ()),
            DiffOperation::UpdateNode {
                node_id,
                node_name,
                updates,
                changes,
            } => self.validate_update_node(
                workflow,
                node_id.as_deref(),
                node_name.as_deref(),
                updates.as_ref(),
                changes.is_some(),
            ),
            DiffOperation::AddConnection {
                source,
                target,
                route,
                source_node_id,
                target_node_id,
                ..
            } => {
                let (Some(source), Some(target)) = (source, target) else {
                    if source_node_id.is_some() || target_node_id.is_some() {
                        return Err(ValidationError::NodeIdFieldsUsed {
                            operation: "addConnection",
                        });
                    }
                    return Err(ValidationError::MissingEndpoints {
                        operation: "addConnection",
                    });
                };
                self.validate_add_connection(workflow, source, target, route)
            }
            DiffOperation::RemoveConnection {
                source,
                target,
                route,
                ignore_errors,
            } => {
                let result = match (source, target) {
                    (Some(source), Some(target)) => {
                        self.validate_remove_connection(workflow, source, target, route)
                    }
                    _ => Err(ValidationError::MissingEndpoints {
                        operation: "removeConnection",
                    }),
                };
                if *ignore_errors {
                    return Ok(());
                }
                result
            }
            DiffOperation::RewireConnection {
                source,
                from,
                to,
                route,
                ..
            } => self.validate_rewire_connection(workflow, source, from, to, route),
            DiffOperation::ReplaceConnections { connections } => {
                validate_replacement(workflow, connections)
            }
            DiffOperation::ActivateWorkflow => self.validate_activation(workflow),
            DiffOperation::CleanStaleConnections { .. }
            | DiffOperation::UpdateSettings { .. }
            | DiffOperation::UpdateName { .. }
            | DiffOperation::AddTag { .. }
            | DiffOperation::RemoveTag { .. }
            | DiffOperation::DeactivateWorkflow => Ok(()),
        }
    }

    fn candidates(&self, workflow: &Workflow) -> NodeCandidates {
        NodeCandidates::from_workflow(workflow, self.config.max_listed_nodes)
    }

    fn require_node<'w>(
        &self,
        workflow: &'w Workflow,
        id: Option<&str>,
        name: Option<&str>,
    ) -> Result<&'w WorkflowNode, ValidationError> {
        find_node(workflow, id, name).ok_or_else(|| ValidationError::NodeNotFound {
            reference: id.or(name).unwrap_or("(no nodeId or nodeName given)").to_string(),
            candidates: self.candidates(workflow),
        })
    }

    fn require_endpoint<'w>(
        &self,
        workflow: &'w Workflow,
        role: &'static str,
        reference: &str,
    ) -> Result<&'w WorkflowNode, ValidationError> {
        find_node_by_reference(workflow, reference).ok_or_else(|| {
            ValidationError::EndpointNotFound {
                role,
                reference: reference.to_string(),
                candidates: self.candidates(workflow),
            }
        })
    }

    /// Resolve the source slot and keep it within the configured range
    fn resolve_slot(
        &self,
        source_node: &WorkflowNode,
        route: &SourceRoute,
    ) -> Result<SourceSlot, ValidationError> {
        let slot = resolve_source_slot(source_node, route, self.config).slot;
        if slot.index > self.config.max_output_index {
            return Err(ValidationError::OutputIndexOutOfRange {
                index: slot.index,
                max: self.config.max_output_index,
            });
        }
        Ok(slot)
    }

    fn validate_add_node(
        &self,
        workflow: &Workflow,
        node: &WorkflowNode,
    ) -> Result<(), ValidationError> {
        if node.name.trim().is_empty() {
            return Err(ValidationError::MissingNodeName);
        }
        if node.node_type.trim().is_empty() {
            return Err(ValidationError::MissingNodeType);
        }

        let wanted = normalize_node_name(&node.name);
        if workflow
            .nodes
            .iter()
            .any(|existing| normalize_node_name(&existing.name) == wanted)
        {
            return Err(ValidationError::DuplicateNodeName {
                name: node.name.clone(),
            });
        }
        if !node.id.is_empty() && workflow.find_node_by_id(&node.id).is_some() {
            return Err(ValidationError::DuplicateNodeId {
                id: node.id.clone(),
            });
        }

        self.validate_node_type(&node.node_type)
    }

    fn validate_node_type(&self, node_type: &str) -> Result<(), ValidationError> {
        if !node_type.contains('.') {
            return Err(ValidationError::MissingPackagePrefix {
                node_type: node_type.to_string(),
            });
        }
        let canonical = self.catalog.normalize_node_type(node_type);
        if canonical != node_type {
            return Err(ValidationError::ShortPackagePrefix {
                node_type: node_type.to_string(),
                suggestion: canonical,
            });
        }
        Ok(())
    }

    fn validate_update_node(
        &self,
        workflow: &Workflow,
        id: Option<&str>,
        name: Option<&str>,
        updates: Option<&serde_json::Map<String, Value>>,
        has_changes: bool,
    ) -> Result<(), ValidationError> {
        let node = self.require_node(workflow, id, name)?;

        let Some(updates) = updates else {
            if has_changes {
                return Err(ValidationError::ChangesInsteadOfUpdates);
            }
            return Err(ValidationError::MissingUpdates);
        };

        let Some(new_name) = updates.get("name") else {
            return Ok(());
        };
        let new_name = match new_name.as_str() {
            Some(name) if !name.trim().is_empty() => name,
            _ => return Err(ValidationError::InvalidNodeName),
        };

        let wanted = normalize_node_name(new_name);
        let conflict = workflow
            .nodes
            .iter()
            .filter(|other| other.id != node.id || other.name != node.name)
            .find(|other| normalize_node_name(&other.name) == wanted);
        if let Some(existing) = conflict {
            return Err(ValidationError::RenameConflict {
                node: node.name.clone(),
                new_name: new_name.to_string(),
                existing: existing.name.clone(),
            });
        }
        Ok(())
    }

    fn validate_add_connection(
        &self,
        workflow: &Workflow,
        source: &str,
        target: &str,
        route: &SourceRoute,
    ) -> Result<(), ValidationError> {
        let source_node = self.require_endpoint(workflow, "Source", source)?;
        let target_node = self.require_endpoint(workflow, "Target", target)?;
        let slot = self.resolve_slot(source_node, route)?;

        if workflow.has_connection(&source_node.name, &slot.channel, None, &target_node.name) {
            return Err(ValidationError::DuplicateConnection {
                source_node: source_node.name.clone(),
                target_node: target_node.name.clone(),
                channel: slot.channel,
            });
        }
        Ok(())
    }

    fn validate_remove_connection(
        &self,
        workflow: &Workflow,
        source: &str,
        target: &str,
        route: &SourceRoute,
    ) -> Result<(), ValidationError> {
        let source_node = self.require_endpoint(workflow, "Source", source)?;
        let target_node = self.require_endpoint(workflow, "Target", target)?;
        let slot = self.resolve_slot(source_node, route)?;
        let pinned = route.pins_slot().then_some(slot.index);

        if !workflow.has_connection(&source_node.name, &slot.channel, pinned, &target_node.name) {
            return Err(ValidationError::ConnectionNotFound {
                source_node: source_node.name.clone(),
                target_node: target_node.name.clone(),
                channel: slot.channel,
                slot: pinned,
            });
        }
        Ok(())
    }

    fn validate_rewire_connection(
        &self,
        workflow: &Workflow,
        source: &str,
        from: &str,
        to: &str,
        route: &SourceRoute,
    ) -> Result<(), ValidationError> {
        let source_node = self.require_endpoint(workflow, "Source", source)?;
        let from_node = self.require_endpoint(workflow, "From", from)?;
        self.require_endpoint(workflow, "To", to)?;
        let slot = self.resolve_slot(source_node, route)?;

        let slot_index = Some(slot.index);
        if !workflow.has_connection(&source_node.name, &slot.channel, slot_index, &from_node.name) {
            return Err(ValidationError::ConnectionNotFound {
                source_node: source_node.name.clone(),
                target_node: from_node.name.clone(),
                channel: slot.channel,
                slot: Some(slot.index),
            });
        }
        Ok(())
    }

    fn validate_activation(&self, workflow: &Workflow) -> Result<(), ValidationError> {
        let has_trigger = workflow
            .nodes
            .iter()
            .any(|n| !n.is_disabled() && self.catalog.is_activatable_trigger(&n.node_type));
        if has_trigger {
            Ok(())
        } else {
            Err(ValidationError::NoActivatableTrigger)
        }
    }
}

/// Every source key and target in a replacement map must name a current node
fn validate_replacement(
    workflow: &Workflow,
    connections: &ConnectionMap,
) -> Result<(), ValidationError> {
    for (source, channels) in connections {
        if !workflow.has_node_named(source) {
            return Err(ValidationError::UnknownConnectionNode {
                role: "source",
                name: source.clone(),
            });
        }
        for target in channels.values().flatten().flatten() {
            if !workflow.has_node_named(&target.node) {
                return Err(ValidationError::UnknownConnectionNode {
                    role: "target",
                    name: target.node.clone(),
                });
            }
        }
    }
    Ok(())
}
