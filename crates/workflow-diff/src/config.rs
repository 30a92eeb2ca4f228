//! Configuration for the diff engine
//!
//! Every field has a default, so an empty JSON object is a valid config.

use serde::{Deserialize, Serialize};

use crate::error::{DiffError, Result};

/// Default values used by [`DiffEngineConfig::default`]
pub mod defaults {
    pub const IF_NODE_TYPE: &str = "n8n-nodes-base.if";
    pub const SWITCH_NODE_TYPE: &str = "n8n-nodes-base.switch";
    pub const FILTER_NODE_TYPE: &str = "n8n-nodes-base.filter";
    pub const IF_SANITIZE_MIN_VERSION: f64 = 2.2;
    pub const SWITCH_SANITIZE_MIN_VERSION: f64 = 3.2;
    pub const FILTER_SANITIZE_MIN_VERSION: f64 = 2.0;
    pub const SANITIZE_ON_COMMIT: bool = true;
    pub const MAX_LISTED_NODES: usize = 20;
    pub const MAX_OUTPUT_INDEX: usize = 255;
}

/// Tunables for [`WorkflowDiffEngine`](crate::engine::WorkflowDiffEngine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiffEngineConfig {
    /// Node type of the boolean filter ("IF") node
    pub if_node_type: String,
    /// Node type of the multi-way ("Switch") node
    pub switch_node_type: String,
    /// Node type of the item filter node
    pub filter_node_type: String,
    /// IF nodes at or above this version get their conditions canonicalized
    pub if_sanitize_min_version: f64,
    /// Switch nodes at or above this version get their rules canonicalized
    pub switch_sanitize_min_version: f64,
    /// Filter nodes at or above this version get their conditions canonicalized
    pub filter_sanitize_min_version: f64,
    /// Run the sanitizer over every node after a successful atomic call
    pub sanitize_on_commit: bool,
    /// Maximum number of candidates listed in "node not found" messages
    pub max_listed_nodes: usize,
    /// Highest output slot a connection may use on any channel
    pub max_output_index: usize,
}

impl Default for DiffEngineConfig {
    fn default() -> Self {
        Self {
            if_node_type: defaults::IF_NODE_TYPE.to_string(),
            switch_node_type: defaults::SWITCH_NODE_TYPE.to_string(),
            filter_node_type: defaults::FILTER_NODE_TYPE.to_string(),
            if_sanitize_min_version: defaults::IF_SANITIZE_MIN_VERSION,
            switch_sanitize_min_version: defaults::SWITCH_SANITIZE_MIN_VERSION,
            filter_sanitize_min_version: defaults::FILTER_SANITIZE_MIN_VERSION,
            sanitize_on_commit: defaults::SANITIZE_ON_COMMIT,
            max_listed_nodes: defaults::MAX_LISTED_NODES,
            max_output_index: defaults::MAX_OUTPUT_INDEX,
        }
    }
}

impl DiffEngineConfig {
    /// Parse a config from JSON, filling missing keys with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| DiffError::InvalidRequest(format!("invalid engine config: {}", e)))
    }

    /// Whether `node_type` is the IF node
    pub fn is_if_node(&self, node_type: &str) -> bool {
        same_node_type(&self.if_node_type, node_type)
    }

    /// Whether `node_type` is the Switch node
    pub fn is_switch_node(&self, node_type: &str) -> bool {
        same_node_type(&self.switch_node_type, node_type)
    }

    /// Whether `node_type` is the filter node
    pub fn is_filter_node(&self, node_type: &str) -> bool {
        same_node_type(&self.filter_node_type, node_type)
    }

    /// IF and Switch nodes route by output slot
    pub fn is_branching_node(&self, node_type: &str) -> bool {
        self.is_if_node(node_type) || self.is_switch_node(node_type)
    }
}

/// Compare a configured type against one from a document, accepting the
/// short `nodes-base.*` form for the configured `n8n-nodes-base.*` type.
fn same_node_type(configured: &str, actual: &str) -> bool {
    actual == configured
        || configured
            .strip_prefix("n8n-")
            .is_some_and(|short| short == actual)
}
