//! Node type classification consumed by the engine
//!
//! The engine never looks node types up in a persisted catalog itself. It
//! asks a [`NodeCatalog`] two questions: can this type start a workflow on
//! activation, and what is the canonical package-prefixed form of a type.

/// Classifier for node types
///
/// Implementations must be pure: no I/O, same answer for the same input.
pub trait NodeCatalog: Send + Sync {
    /// Whether a node of this type can serve as the entry point of an
    /// active workflow
    fn is_activatable_trigger(&self, node_type: &str) -> bool;

    /// Canonical package-prefixed form of a node type
    ///
    /// Only used to check the format of caller-supplied types, never for
    /// node identity.
    fn normalize_node_type(&self, node_type: &str) -> String;
}

const BASE_PACKAGE: &str = "n8n-nodes-base";
const BASE_PACKAGE_SHORT: &str = "nodes-base";
const LANGCHAIN_PACKAGE: &str = "@n8n/n8n-nodes-langchain";
const LANGCHAIN_PACKAGE_SHORT: &str = "nodes-langchain";
const LANGCHAIN_PACKAGE_UNSCOPED: &str = "n8n-nodes-langchain";

/// Type fragments that mark a node as an event source
const TRIGGER_MARKERS: &[&str] = &["trigger", "webhook", "schedule", "poll", "cron"];

/// Trigger types that cannot start a workflow on activation
const NON_ACTIVATABLE_TRIGGERS: &[&str] = &["executeworkflowtrigger", "manualtrigger"];

/// Name-based classifier used when no catalog is supplied
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNodeCatalog;

impl NodeCatalog for DefaultNodeCatalog {
    fn is_activatable_trigger(&self, node_type: &str) -> bool {
        let normalized = self.normalize_node_type(node_type).to_lowercase();
        let local_name = normalized.rsplit('.').next().unwrap_or(&normalized);

        if NON_ACTIVATABLE_TRIGGERS.contains(&local_name) {
            return false;
        }
        TRIGGER_MARKERS.iter().any(|m| local_name.contains(m))
    }

    fn normalize_node_type(&self, node_type: &str) -> String {
        let trimmed = node_type.trim();
        let Some((package, local)) = trimmed.split_once('.') else {
            return trimmed.to_string();
        };

        let package = match package {
            BASE_PACKAGE_SHORT => BASE_PACKAGE,
            LANGCHAIN_PACKAGE_SHORT | LANGCHAIN_PACKAGE_UNSCOPED => LANGCHAIN_PACKAGE,
            other => other,
        };
        format!("{}.{}", package, local)
    }
}
