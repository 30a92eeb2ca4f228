//! Apply single operations to the working copy
//!
//! The applier assumes the operation passed validation against the same
//! working copy. Anything it still cannot do is returned as
//! [`DiffError::Apply`] and reported against the operation's index.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::config::DiffEngineConfig;
use crate::error::{DiffError, Result};
use crate::operations::{DiffOperation, DiffWarning, SourceRoute};
use crate::path::set_path;
use crate::rename::RenameTracker;
use crate::resolver::{find_node_by_reference, find_node_index, resolve_source_slot, SourceSlot};
use crate::sanitize::sanitize_node;
use crate::types::{
    retain_connections, tag_name, ConnectionMap, ConnectionTarget, StaleConnection, Workflow,
    WorkflowNode,
};

/// Side effects collected while applying the operations of one call
#[derive(Debug, Default)]
pub struct ApplyState {
    /// Renames waiting to be carried into the connection map
    pub renames: RenameTracker,
    pub warnings: Vec<DiffWarning>,
    /// Edges removed (or, in dry-run, found) by cleanStaleConnections
    pub stale_connections: Vec<StaleConnection>,
    pub should_activate: bool,
    pub should_deactivate: bool,
}

impl ApplyState {
    fn warn(&mut self, operation: usize, message: String) {
        self.warnings.push(DiffWarning { operation, message });
    }
}

/// Mutates a working copy one operation at a time
pub struct OperationApplier<'a> {
    config: &'a DiffEngineConfig,
}

impl<'a> OperationApplier<'a> {
    pub fn new(config: &'a DiffEngineConfig) -> Self {
        Self { config }
    }

    /// Apply `operation` (at request position `index`) to `workflow`
    pub fn apply(
        &self,
        workflow: &mut Workflow,
        index: usize,
        operation: &DiffOperation,
        state: &mut ApplyState,
    ) -> Result<()> {
        match operation {
            DiffOperation::AddNode { node } => self.add_node(workflow, node),
            DiffOperation::RemoveNode { node_id, node_name } => {
                remove_node(workflow, node_id.as_deref(), node_name.as_deref(), state)
            }
            DiffOperation::UpdateNode {
                node_id,
                node_name,
                updates,
                ..
            } => {
                let updates = updates
                    .as_ref()
                    .ok_or_else(|| DiffError::apply("updateNode requires \"updates\""))?;
                let (id, name) = (node_id.as_deref(), node_name.as_deref());
                self.update_node(workflow, id, name, updates, state)
            }
            DiffOperation::MoveNode {
                node_id,
                node_name,
                position,
            } => {
                let node = node_mut(workflow, node_id.as_deref(), node_name.as_deref())?;
                node.position = position.clone();
                Ok(())
            }
            DiffOperation::EnableNode { node_id, node_name } => {
                let node = node_mut(workflow, node_id.as_deref(), node_name.as_deref())?;
                node.disabled = Some(false);
                Ok(())
            }
            DiffOperation::DisableNode { node_id, node_name } => {
                let node = node_mut(workflow, node_id.as_deref(), node_name.as_deref())?;
                node.disabled = Some(true);
                Ok(())
            }
            DiffOperation::AddConnection {
                source,
                target,
                route,
                target_input,
                target_index,
                ..
            } => {
                let (Some(source), Some(target)) = (source, target) else {
                    return Err(DiffError::apply(
                        "addConnection requires \"source\" and \"target\"",
                    ));
                };
                let (source_name, slot) =
                    self.resolve_route(workflow, source, route, index, state)?;
                let target_name = node_name_of(workflow, "Target", target)?;
                let edge = ConnectionTarget::new(
                    target_name,
                    target_input.clone().unwrap_or_else(|| slot.channel.clone()),
                    target_index.unwrap_or(0),
                );
                connect(&mut workflow.connections, &source_name, &slot, edge)
            }
            DiffOperation::RemoveConnection {
                source,
                target,
                route,
                ignore_errors,
            } => self.remove_connection(
                workflow,
                source.as_deref(),
                target.as_deref(),
                route,
                *ignore_errors,
            ),
            DiffOperation::RewireConnection {
                source,
                from,
                to,
                route,
                target_input,
                target_index,
            } => {
                let (source_name, slot) =
                    self.resolve_route(workflow, source, route, index, state)?;
                let from_name = node_name_of(workflow, "From", from)?;
                let to_name = node_name_of(workflow, "To", to)?;

                let removed = disconnect(
                    &mut workflow.connections,
                    &source_name,
                    &slot.channel,
                    Some(slot.index),
                    &from_name,
                );
                if removed.is_empty() {
                    return Err(DiffError::apply(format!(
                        "No connection from \"{}\" to \"{}\" at {}[{}] to rewire",
                        source_name, from_name, slot.channel, slot.index
                    )));
                }
                let edge = ConnectionTarget::new(
                    to_name,
                    target_input.clone().unwrap_or_else(|| slot.channel.clone()),
                    target_index.unwrap_or(0),
                );
                connect(&mut workflow.connections, &source_name, &slot, edge)
            }
            DiffOperation::CleanStaleConnections { dry_run } => {
                let stale = clean_stale_connections(workflow, *dry_run);
                if !stale.is_empty() {
                    log::debug!(
                        "cleanStaleConnections{}: {} stale edge(s)",
                        if *dry_run { " (dry run)" } else { "" },
                        stale.len()
                    );
                }
                state.stale_connections.extend(stale);
                Ok(())
            }
            DiffOperation::ReplaceConnections { connections } => {
                workflow.connections = connections.clone();
                Ok(())
            }
            DiffOperation::UpdateSettings { settings } => {
                workflow
                    .settings
                    .get_or_insert_with(IndexMap::new)
                    .extend(settings.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(())
            }
            DiffOperation::UpdateName { name } => {
                workflow.name = name.clone();
                Ok(())
            }
            DiffOperation::AddTag { tag } => {
                let tags = workflow.tags.get_or_insert_with(Vec::new);
                if !tags.iter().any(|t| tag_name(t) == Some(tag.as_str())) {
                    tags.push(Value::String(tag.clone()));
                }
                Ok(())
            }
            DiffOperation::RemoveTag { tag } => {
                if let Some(tags) = workflow.tags.as_mut() {
                    tags.retain(|t| tag_name(t) != Some(tag.as_str()));
                }
                Ok(())
            }
            DiffOperation::ActivateWorkflow => {
                state.should_activate = true;
                state.should_deactivate = false;
                Ok(())
            }
            DiffOperation::DeactivateWorkflow => {
                state.should_deactivate = true;
                state.should_activate = false;
                Ok(())
            }
        }
    }

    fn add_node(&self, workflow: &mut Workflow, node: &WorkflowNode) -> Result<()> {
        let mut node = node.clone();
        if node.id.is_empty() {
            node.id = uuid::Uuid::new_v4().to_string();
        }
        sanitize_node(&mut node, self.config);
        workflow.nodes.push(node);
        Ok(())
    }

    /// Apply `updates` to a copy of the node and commit only if every path
    /// assigned cleanly
    fn update_node(
        &self,
        workflow: &mut Workflow,
        id: Option<&str>,
        name: Option<&str>,
        updates: &Map<String, Value>,
        state: &mut ApplyState,
    ) -> Result<()> {
        let index = find_node_index(&workflow.nodes, id, name)
            .ok_or_else(|| node_not_found(id, name))?;
        let old_name = workflow.nodes[index].name.clone();

        let mut document = serde_json::to_value(&workflow.nodes[index])?;
        for (path, value) in updates {
            set_path(&mut document, path, value.clone())?;
        }
        let mut updated: WorkflowNode = serde_json::from_value(document).map_err(|e| {
            DiffError::apply(format!("Invalid update for node \"{}\": {}", old_name, e))
        })?;

        if updated.name != old_name {
            state.renames.record(&old_name, &updated.name);
        }
        sanitize_node(&mut updated, self.config);
        workflow.nodes[index] = updated;
        Ok(())
    }

    fn remove_connection(
        &self,
        workflow: &mut Workflow,
        source: Option<&str>,
        target: Option<&str>,
        route: &SourceRoute,
        ignore_errors: bool,
    ) -> Result<()> {
        let endpoints = source
            .and_then(|s| find_node_by_reference(workflow, s))
            .zip(target.and_then(|t| find_node_by_reference(workflow, t)));
        let Some((source_node, target_node)) = endpoints else {
            if ignore_errors {
                return Ok(());
            }
            return Err(DiffError::apply("removeConnection: source or target node not found"));
        };

        let slot = resolve_source_slot(source_node, route, self.config).slot;
        let pinned = route.pins_slot().then_some(slot.index);
        let source_name = source_node.name.clone();
        let target_name = target_node.name.clone();

        let removed = disconnect(
            &mut workflow.connections,
            &source_name,
            &slot.channel,
            pinned,
            &target_name,
        );
        if removed.is_empty() && !ignore_errors {
            return Err(DiffError::apply(format!(
                "No connection from \"{}\" to \"{}\" on output \"{}\"",
                source_name, target_name, slot.channel
            )));
        }
        Ok(())
    }

    /// Resolve the source node and slot of a connection, recording warnings
    ///
    /// Slots past `maxOutputIndex` are refused here as well as in validation.
    fn resolve_route(
        &self,
        workflow: &Workflow,
        source: &str,
        route: &SourceRoute,
        index: usize,
        state: &mut ApplyState,
    ) -> Result<(String, SourceSlot)> {
        let source_node = find_node_by_reference(workflow, source)
            .ok_or_else(|| DiffError::apply(format!("Source node not found: \"{}\"", source)))?;
        let resolved = resolve_source_slot(source_node, route, self.config);
        if resolved.slot.index > self.config.max_output_index {
            return Err(DiffError::apply(format!(
                "Output index {} of \"{}\" is out of range (maximum {})",
                resolved.slot.index, source_node.name, self.config.max_output_index
            )));
        }
        for warning in resolved.warnings {
            state.warn(index, warning);
        }
        Ok((source_node.name.clone(), resolved.slot))
    }
}

fn node_not_found(id: Option<&str>, name: Option<&str>) -> DiffError {
    DiffError::apply(format!(
        "Node not found: \"{}\"",
        id.or(name).unwrap_or_default()
    ))
}

fn node_mut<'w>(
    workflow: &'w mut Workflow,
    id: Option<&str>,
    name: Option<&str>,
) -> Result<&'w mut WorkflowNode> {
    let index =
        find_node_index(&workflow.nodes, id, name).ok_or_else(|| node_not_found(id, name))?;
    Ok(&mut workflow.nodes[index])
}

fn node_name_of(workflow: &Workflow, role: &str, reference: &str) -> Result<String> {
    find_node_by_reference(workflow, reference)
        .map(|n| n.name.clone())
        .ok_or_else(|| DiffError::apply(format!("{} node not found: \"{}\"", role, reference)))
}

/// Delete a node with its outbound entry and every inbound edge
///
/// Edges of a node renamed earlier in the call are still filed under its
/// old name until propagation, so those names are dropped too.
fn remove_node(
    workflow: &mut Workflow,
    id: Option<&str>,
    name: Option<&str>,
    state: &mut ApplyState,
) -> Result<()> {
    let index =
        find_node_index(&workflow.nodes, id, name).ok_or_else(|| node_not_found(id, name))?;
    let removed = workflow.nodes.remove(index);

    let mut names = state.renames.forget(&removed.name);
    // Edges under a name another node was renamed away from belong to that node
    if !state.renames.renamed_from(&removed.name) {
        names.push(removed.name.clone());
    }
    for name in &names {
        workflow.connections.shift_remove(name);
    }
    let dropped = retain_connections(&mut workflow.connections, |_, _, _, target| {
        names.contains(&target.node)
    });
    log::debug!(
        "Removed node '{}' and {} inbound connection(s)",
        removed.name,
        dropped.len()
    );
    Ok(())
}

/// Append an edge, creating the channel and padding slots as needed
fn connect(
    connections: &mut ConnectionMap,
    source: &str,
    slot: &SourceSlot,
    edge: ConnectionTarget,
) -> Result<()> {
    let needed = slot.index.checked_add(1).ok_or_else(|| {
        DiffError::apply(format!("Output index {} is out of range", slot.index))
    })?;
    let slots = connections
        .entry(source.to_string())
        .or_default()
        .entry(slot.channel.clone())
        .or_default();
    if slots.len() < needed {
        slots.resize_with(needed, Vec::new);
    }
    slots[slot.index].push(edge);
    Ok(())
}

/// Remove `source -> target` edges from one channel, optionally one slot
fn disconnect(
    connections: &mut ConnectionMap,
    source: &str,
    channel: &str,
    slot: Option<usize>,
    target: &str,
) -> Vec<StaleConnection> {
    retain_connections(connections, |s, c, index, edge| {
        s == source
            && c == channel
            && slot.map_or(true, |wanted| wanted == index)
            && edge.node == target
    })
}

/// Find (and unless `dry_run`, remove) edges that reference missing nodes
fn clean_stale_connections(workflow: &mut Workflow, dry_run: bool) -> Vec<StaleConnection> {
    if dry_run {
        return workflow.stale_connections();
    }

    let names: HashSet<String> = workflow.nodes.iter().map(|n| n.name.clone()).collect();
    let removed = retain_connections(&mut workflow.connections, |source, _, _, target| {
        !names.contains(source) || !names.contains(&target.node)
    });
    // Sources of deleted nodes may remain with no edges at all
    workflow.connections.retain(|source, _| names.contains(source));
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use serde_json::{json, Number};

    fn apply(workflow: &mut Workflow, op: Value) -> (Result<()>, ApplyState) {
        let config = DiffEngineConfig::default();
        let op: DiffOperation = serde_json::from_value(op).unwrap();
        let mut state = ApplyState::default();
        let result = OperationApplier::new(&config).apply(workflow, 0, &op, &mut state);
        (result, state)
    }

    fn workflow() -> Workflow {
        WorkflowBuilder::new("Test")
            .add_node("1", "Trigger", "n8n-nodes-base.manualTrigger")
            .add_node("2", "Check", "n8n-nodes-base.if")
            .with_version(2.2)
            .add_node("3", "Yes", "n8n-nodes-base.set")
            .add_node("4", "No", "n8n-nodes-base.set")
            .connect("Trigger", "Check")
            .connect_slot("Check", 0, "Yes")
            .connect_slot("Check", 1, "No")
            .build()
    }

    #[test]
    fn test_add_node_generates_id_and_sanitizes() {
        let mut wf = workflow();
        let (result, _) = apply(
            &mut wf,
            json!({"type": "addNode", "node": {
                "name": "Gate", "type": "n8n-nodes-base.if", "typeVersion": 2.2,
                "parameters": {"conditions": {"conditions": []}}
            }}),
        );
        result.unwrap();
        let node = wf.nodes.last().unwrap();
        assert!(!node.id.is_empty());
        assert_eq!(node.parameters["conditions"]["options"]["version"], json!(2));
    }

    #[test]
    fn test_remove_node_drops_inbound_and_outbound() {
        let mut wf = workflow();
        apply(&mut wf, json!({"type": "removeNode", "nodeName": "Yes"})).0.unwrap();
        // Slot 0 emptied but kept so "No" stays on the false branch
        assert_eq!(wf.connections["Check"]["main"].len(), 2);
        assert!(wf.connections["Check"]["main"][0].is_empty());

        apply(&mut wf, json!({"type": "removeNode", "nodeId": "2"})).0.unwrap();
        assert!(!wf.connections.contains_key("Check"));
        assert!(!wf.connections.contains_key("Trigger"));
        assert_eq!(wf.nodes.len(), 2);
    }

    #[test]
    fn test_update_node_records_rename_and_sets_paths() {
        let mut wf = workflow();
        let (result, state) = apply(
            &mut wf,
            json!({"type": "updateNode", "nodeName": "Yes", "updates": {
                "name": "Accepted",
                "parameters.values.string[0]": {"name": "status", "value": "ok"},
                "notes": "updated"
            }}),
        );
        result.unwrap();
        let node = &wf.nodes[2];
        assert_eq!(node.name, "Accepted");
        assert_eq!(node.parameters["values"]["string"][0]["value"], json!("ok"));
        assert_eq!(node.extra["notes"], json!("updated"));
        assert_eq!(state.renames.len(), 1);
    }

    #[test]
    fn test_remove_node_after_rename_drops_old_edges() {
        let mut wf = workflow();
        let config = DiffEngineConfig::default();
        let applier = OperationApplier::new(&config);
        let mut state = ApplyState::default();
        let ops: Vec<DiffOperation> = serde_json::from_value(json!([
            {"type": "updateNode", "nodeName": "Check", "updates": {"name": "Gate"}},
            {"type": "removeNode", "nodeName": "Gate"}
        ]))
        .unwrap();
        for (index, op) in ops.iter().enumerate() {
            applier.apply(&mut wf, index, op, &mut state).unwrap();
        }

        assert!(state.renames.is_empty());
        assert!(!wf.connections.contains_key("Check"));
        assert!(!wf.connections.contains_key("Trigger"));
        assert!(wf.stale_connections().is_empty());
    }

    #[test]
    fn test_removing_reused_name_keeps_renamed_edges() {
        let mut wf = workflow();
        let config = DiffEngineConfig::default();
        let applier = OperationApplier::new(&config);
        let mut state = ApplyState::default();
        let ops: Vec<DiffOperation> = serde_json::from_value(json!([
            {"type": "updateNode", "nodeName": "Check", "updates": {"name": "Gate"}},
            {"type": "addNode", "node": {"name": "Check", "type": "n8n-nodes-base.noOp"}},
            {"type": "removeNode", "nodeName": "Check"}
        ]))
        .unwrap();
        for (index, op) in ops.iter().enumerate() {
            applier.apply(&mut wf, index, op, &mut state).unwrap();
        }

        state.renames.apply(&mut wf.connections);
        assert!(wf.has_connection("Trigger", "main", Some(0), "Gate"));
        assert!(wf.has_connection("Gate", "main", Some(1), "No"));
        assert!(wf.stale_connections().is_empty());
    }

    #[test]
    fn test_update_node_invalid_leaves_node_untouched() {
        let mut wf = workflow();
        let before = wf.nodes[2].clone();
        let (result, state) = apply(
            &mut wf,
            json!({"type": "updateNode", "nodeName": "Yes",
                "updates": {"name": "Other", "position": "nowhere"}}),
        );
        assert!(matches!(result, Err(DiffError::Apply(_))));
        assert_eq!(wf.nodes[2], before);
        assert!(state.renames.is_empty());
    }

    #[test]
    fn test_move_and_toggle_node() {
        let mut wf = workflow();
        apply(&mut wf, json!({"type": "moveNode", "nodeName": "No", "position": [640, 120]}))
            .0
            .unwrap();
        apply(&mut wf, json!({"type": "disableNode", "nodeId": "4"})).0.unwrap();
        assert_eq!(wf.nodes[3].position, [Number::from(640), Number::from(120)]);
        assert_eq!(serde_json::to_value(&wf.nodes[3]).unwrap()["position"], json!([640, 120]));
        assert!(wf.nodes[3].is_disabled());

        apply(&mut wf, json!({"type": "enableNode", "nodeName": "No"})).0.unwrap();
        assert_eq!(wf.nodes[3].disabled, Some(false));

        let (result, _) = apply(&mut wf, json!({"type": "enableNode", "nodeName": "Missing"}));
        assert!(matches!(result, Err(DiffError::Apply(_))));
    }

    #[test]
    fn test_add_connection_pads_slots() {
        let mut wf = workflow();
        apply(
            &mut wf,
            json!({"type": "addConnection", "source": "Trigger", "target": "No",
                "sourceIndex": 2, "sourceOutput": "error"}),
        )
        .0
        .unwrap();
        let slots = &wf.connections["Trigger"]["error"];
        assert_eq!(slots.len(), 3);
        assert!(slots[0].is_empty() && slots[1].is_empty());
        assert_eq!(slots[2][0], ConnectionTarget::new("No", "error", 0));
    }

    #[test]
    fn test_add_connection_refuses_out_of_range_slot() {
        let mut wf = workflow();
        let before = wf.connections.clone();
        let (result, _) = apply(
            &mut wf,
            json!({"type": "addConnection", "source": "Trigger", "target": "No",
                "sourceOutput": "error", "sourceIndex": u64::MAX}),
        );
        assert!(matches!(result, Err(DiffError::Apply(_))));
        assert_eq!(wf.connections, before);
    }

    #[test]
    fn test_connect_index_overflow_is_an_error() {
        let mut connections = ConnectionMap::new();
        let slot = SourceSlot {
            channel: "main".to_string(),
            index: usize::MAX,
        };
        let result = connect(&mut connections, "A", &slot, ConnectionTarget::new("B", "main", 0));
        assert!(matches!(result, Err(DiffError::Apply(_))));
        assert!(connections.is_empty());
    }

    #[test]
    fn test_add_connection_warns_on_raw_index() {
        let mut wf = workflow();
        let (result, state) = apply(
            &mut wf,
            json!({"type": "addConnection", "source": "Check", "target": "Trigger",
                "sourceIndex": 1}),
        );
        result.unwrap();
        assert_eq!(state.warnings.len(), 1);
        assert_eq!(wf.connections["Check"]["main"][1].len(), 2);
    }

    #[test]
    fn test_remove_connection_trims_trailing_slots() {
        let mut wf = workflow();
        apply(&mut wf, json!({"type": "removeConnection", "source": "Check", "target": "No"}))
            .0
            .unwrap();
        assert_eq!(wf.connections["Check"]["main"].len(), 1);

        let (result, _) = apply(
            &mut wf,
            json!({"type": "removeConnection", "source": "Check", "target": "No",
                "ignoreErrors": true}),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_rewire_moves_edge_within_slot() {
        let mut wf = workflow();
        apply(
            &mut wf,
            json!({"type": "rewireConnection", "source": "Check", "from": "No", "to": "Yes",
                "branch": "false"}),
        )
        .0
        .unwrap();
        let slots = &wf.connections["Check"]["main"];
        assert_eq!(slots[1], vec![ConnectionTarget::new("Yes", "main", 0)]);
        assert_eq!(slots[0], vec![ConnectionTarget::new("Yes", "main", 0)]);
    }

    #[test]
    fn test_clean_stale_dry_run_matches_destructive() {
        let mut wf = workflow();
        wf.nodes.retain(|n| n.name != "No");

        let (_, dry) = apply(&mut wf, json!({"type": "cleanStaleConnections", "dryRun": true}));
        assert_eq!(wf.connections["Check"]["main"].len(), 2);

        let (_, real) = apply(&mut wf, json!({"type": "cleanStaleConnections"}));
        assert_eq!(dry.stale_connections, real.stale_connections);
        assert_eq!(real.stale_connections.len(), 1);
        assert_eq!(wf.connections["Check"]["main"].len(), 1);
    }

    #[test]
    fn test_metadata_operations() {
        let mut wf = workflow();
        apply(&mut wf, json!({"type": "updateName", "name": "Renamed"})).0.unwrap();
        apply(&mut wf, json!({"type": "addTag", "tag": "prod"})).0.unwrap();
        apply(&mut wf, json!({"type": "addTag", "tag": "prod"})).0.unwrap();
        apply(&mut wf, json!({"type": "updateSettings", "settings": {"timezone": "UTC"}}))
            .0
            .unwrap();
        apply(
            &mut wf,
            json!({"type": "updateSettings", "settings": {"saveManualExecutions": true}}),
        )
        .0
        .unwrap();

        assert_eq!(wf.name, "Renamed");
        assert_eq!(wf.tags, Some(vec![json!("prod")]));
        let settings = wf.settings.as_ref().unwrap();
        assert_eq!(settings["timezone"], json!("UTC"));
        assert_eq!(settings["saveManualExecutions"], json!(true));

        apply(&mut wf, json!({"type": "removeTag", "tag": "prod"})).0.unwrap();
        assert_eq!(wf.tags, Some(vec![]));
    }

    #[test]
    fn test_activation_markers_last_wins() {
        let mut wf = workflow();
        let config = DiffEngineConfig::default();
        let applier = OperationApplier::new(&config);
        let mut state = ApplyState::default();
        applier
            .apply(&mut wf, 0, &DiffOperation::DeactivateWorkflow, &mut state)
            .unwrap();
        applier
            .apply(&mut wf, 1, &DiffOperation::ActivateWorkflow, &mut state)
            .unwrap();
        assert!(state.should_activate);
        assert!(!state.should_deactivate);
        assert_eq!(wf.active, None);
    }
}
