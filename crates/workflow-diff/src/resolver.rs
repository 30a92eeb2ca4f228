//! Node lookup and connection slot resolution
//!
//! Callers refer to nodes by id or by name, and names often arrive with
//! shell/JSON escaping still applied. Lookup tolerates both.

use crate::config::DiffEngineConfig;
use crate::operations::SourceRoute;
use crate::types::{Workflow, WorkflowNode, MAIN_CHANNEL};

/// Canonical form of a node name used for lookup and uniqueness checks
///
/// Trims, un-escapes `\\`, `\'` and `\"`, and collapses whitespace runs to
/// a single space.
pub fn normalize_node_name(name: &str) -> String {
    let unescaped = name
        .trim()
        .replace("\\\\", "\\")
        .replace("\\'", "'")
        .replace("\\\"", "\"");
    unescaped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Index of the node matching an id and/or name
///
/// Tries an exact id match, then a normalized name match, then (when only
/// an id was given) the id as a name.
pub fn find_node_index(
    nodes: &[WorkflowNode],
    id: Option<&str>,
    name: Option<&str>,
) -> Option<usize> {
    if let Some(id) = id {
        if let Some(index) = nodes.iter().position(|n| n.id == id) {
            return Some(index);
        }
    }

    if let Some(name) = name {
        if let Some(index) = position_by_name(nodes, name) {
            return Some(index);
        }
    }

    match (id, name) {
        (Some(id), None) => position_by_name(nodes, id),
        _ => None,
    }
}

/// Node matching an id and/or name
pub fn find_node<'a>(
    workflow: &'a Workflow,
    id: Option<&str>,
    name: Option<&str>,
) -> Option<&'a WorkflowNode> {
    find_node_index(&workflow.nodes, id, name).map(|index| &workflow.nodes[index])
}

/// Node matching a single reference that may be an id or a name
pub fn find_node_by_reference<'a>(
    workflow: &'a Workflow,
    reference: &str,
) -> Option<&'a WorkflowNode> {
    find_node(workflow, Some(reference), None)
}

fn position_by_name(nodes: &[WorkflowNode], name: &str) -> Option<usize> {
    let wanted = normalize_node_name(name);
    nodes
        .iter()
        .position(|n| normalize_node_name(&n.name) == wanted)
}

/// A concrete output position on a source node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSlot {
    pub channel: String,
    pub index: usize,
}

/// Result of resolving a [`SourceRoute`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub slot: SourceSlot,
    /// Non-fatal hints about the form the caller used
    pub warnings: Vec<String>,
}

/// Turn semantic `branch`/`case` shortcuts into a concrete slot
///
/// Precedence: `branch` on an IF node, then `case`, then `sourceIndex`
/// (default 0). Raw indices on IF/Switch nodes are honored but produce a
/// warning recommending the semantic form.
pub fn resolve_source_slot(
    source: &WorkflowNode,
    route: &SourceRoute,
    config: &DiffEngineConfig,
) -> ResolvedRoute {
    let channel = route
        .source_output
        .clone()
        .unwrap_or_else(|| MAIN_CHANNEL.to_string());
    let is_if = config.is_if_node(&source.node_type);
    let mut warnings = Vec::new();

    let index = match (route.branch, route.case_index) {
        (Some(branch), _) if is_if => branch.slot(),
        (branch, Some(case)) => {
            if branch.is_some() {
                warnings.push(branch_ignored(source));
            }
            case
        }
        (branch, None) => {
            if branch.is_some() {
                warnings.push(branch_ignored(source));
            }
            route.source_index.unwrap_or(0)
        }
    };

    if config.is_branching_node(&source.node_type)
        && route.source_index.is_some()
        && route.branch.is_none()
        && route.case_index.is_none()
    {
        let hint = if is_if {
            "branch: \"true\" or branch: \"false\""
        } else {
            "case: <n>"
        };
        warnings.push(format!(
            "Connection from \"{}\" uses sourceIndex {}. \
             Prefer {} so the intended output is explicit.",
            source.name, index, hint
        ));
    }

    ResolvedRoute {
        slot: SourceSlot { channel, index },
        warnings,
    }
}

fn branch_ignored(source: &WorkflowNode) -> String {
    format!(
        "\"branch\" only applies to IF nodes; ignored for \"{}\" ({})",
        source.name, source.node_type
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::Branch;

    fn nodes() -> Vec<WorkflowNode> {
        vec![
            WorkflowNode::new("a1", "Manual Trigger", "n8n-nodes-base.manualTrigger"),
            WorkflowNode::new("b2", "Say \"hi\"", "n8n-nodes-base.set"),
            WorkflowNode::new("c3", "Route", "n8n-nodes-base.if"),
            WorkflowNode::new("d4", "Cases", "n8n-nodes-base.switch"),
        ]
    }

    #[test]
    fn test_normalize_node_name() {
        assert_eq!(normalize_node_name("  Say \\\"hi\\\"  "), "Say \"hi\"");
        assert_eq!(normalize_node_name("It\\'s"), "It's");
        assert_eq!(normalize_node_name("a\\\\b"), "a\\b");
        assert_eq!(normalize_node_name("Set \t  Data"), "Set Data");
    }

    #[test]
    fn test_find_by_id_then_name() {
        let nodes = nodes();
        assert_eq!(find_node_index(&nodes, Some("b2"), None), Some(1));
        assert_eq!(find_node_index(&nodes, None, Some("Say \\\"hi\\\"")), Some(1));
        assert_eq!(find_node_index(&nodes, Some("zz"), Some("Route")), Some(2));
    }

    #[test]
    fn test_lone_id_retried_as_name() {
        let nodes = nodes();
        assert_eq!(find_node_index(&nodes, Some("Manual  Trigger"), None), Some(0));
        assert_eq!(find_node_index(&nodes, Some("missing"), None), None);
    }

    #[test]
    fn test_id_not_retried_when_name_given() {
        let nodes = nodes();
        assert_eq!(find_node_index(&nodes, Some("Route"), Some("nope")), None);
    }

    #[test]
    fn test_branch_mapping_on_if() {
        let config = DiffEngineConfig::default();
        let node = &nodes()[2];
        let route = SourceRoute {
            branch: Some(Branch::False),
            ..Default::default()
        };
        let resolved = resolve_source_slot(node, &route, &config);
        assert_eq!(resolved.slot, SourceSlot { channel: "main".to_string(), index: 1 });
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn test_case_used_directly() {
        let config = DiffEngineConfig::default();
        let node = &nodes()[3];
        let route = SourceRoute {
            case_index: Some(3),
            ..Default::default()
        };
        assert_eq!(resolve_source_slot(node, &route, &config).slot.index, 3);
    }

    #[test]
    fn test_raw_index_on_branching_node_warns() {
        let config = DiffEngineConfig::default();
        let node = &nodes()[2];
        let route = SourceRoute {
            source_index: Some(1),
            ..Default::default()
        };
        let resolved = resolve_source_slot(node, &route, &config);
        assert_eq!(resolved.slot.index, 1);
        assert_eq!(resolved.warnings.len(), 1);
        assert!(resolved.warnings[0].contains("branch"));
    }

    #[test]
    fn test_branch_on_plain_node_ignored() {
        let config = DiffEngineConfig::default();
        let node = &nodes()[1];
        let route = SourceRoute {
            branch: Some(Branch::False),
            source_output: Some("error".to_string()),
            ..Default::default()
        };
        let resolved = resolve_source_slot(node, &route, &config);
        assert_eq!(resolved.slot, SourceSlot { channel: "error".to_string(), index: 0 });
        assert_eq!(resolved.warnings.len(), 1);
    }
}
