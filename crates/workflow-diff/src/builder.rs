//! Fluent builder for workflow documents
//!
//! Provides a compact way to assemble workflows programmatically, mostly
//! for tests and for callers that generate workflows in code.

use serde_json::{Number, Value};

use crate::types::{json_number, ConnectionTarget, Workflow, WorkflowNode, MAIN_CHANNEL};

/// Horizontal spacing between auto-placed nodes
const NODE_SPACING: u64 = 220;

/// Fluent builder for constructing workflows
///
/// # Example
///
/// ```
/// use workflow_diff::WorkflowBuilder;
///
/// let workflow = WorkflowBuilder::new("Demo")
///     .add_node("1", "Manual Trigger", "n8n-nodes-base.manualTrigger")
///     .add_node("2", "Set Data", "n8n-nodes-base.set")
///     .with_version(3.4)
///     .connect("Manual Trigger", "Set Data")
///     .build();
///
/// assert_eq!(workflow.nodes.len(), 2);
/// assert!(workflow.has_connection("Manual Trigger", "main", Some(0), "Set Data"));
/// ```
pub struct WorkflowBuilder {
    workflow: Workflow,
}

impl WorkflowBuilder {
    /// Create a new workflow builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            workflow: Workflow::new(name),
        }
    }

    /// Add a node, placed to the right of the previous one
    pub fn add_node(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        node_type: impl Into<String>,
    ) -> Self {
        let mut node = WorkflowNode::new(id, name, node_type);
        let x = self.workflow.nodes.len() as u64 * NODE_SPACING;
        node.position = [Number::from(x), Number::from(0)];
        self.workflow.nodes.push(node);
        self
    }

    /// Set the type version of the most recently added node
    pub fn with_version(mut self, version: f64) -> Self {
        if let Some(node) = self.workflow.nodes.last_mut() {
            node.type_version = json_number(version);
        }
        self
    }

    /// Set the parameters of the most recently added node
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        if let Some(node) = self.workflow.nodes.last_mut() {
            node.parameters = parameters;
        }
        self
    }

    /// Move the most recently added node
    pub fn at(mut self, x: f64, y: f64) -> Self {
        if let Some(node) = self.workflow.nodes.last_mut() {
            node.position = [json_number(x), json_number(y)];
        }
        self
    }

    /// Disable the most recently added node
    pub fn disabled(mut self) -> Self {
        if let Some(node) = self.workflow.nodes.last_mut() {
            node.disabled = Some(true);
        }
        self
    }

    /// Connect `source` output 0 to `target` on the main channel
    pub fn connect(self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.connect_slot(source, 0, target)
    }

    /// Connect a specific main output slot of `source` to `target`
    pub fn connect_slot(
        self,
        source: impl Into<String>,
        slot: usize,
        target: impl Into<String>,
    ) -> Self {
        self.connect_channel(source, MAIN_CHANNEL, slot, target)
    }

    /// Connect an output slot of any channel; the target input uses the same channel
    pub fn connect_channel(
        mut self,
        source: impl Into<String>,
        channel: &str,
        slot: usize,
        target: impl Into<String>,
    ) -> Self {
        let slots = self
            .workflow
            .connections
            .entry(source.into())
            .or_default()
            .entry(channel.to_string())
            .or_default();
        if slots.len() <= slot {
            slots.resize_with(slot + 1, Vec::new);
        }
        slots[slot].push(ConnectionTarget::new(target, channel, 0));
        self
    }

    /// Add a plain tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.workflow
            .tags
            .get_or_insert_with(Vec::new)
            .push(Value::String(tag.into()));
        self
    }

    /// Build the workflow without validation
    pub fn build(self) -> Workflow {
        self.workflow
    }
}
