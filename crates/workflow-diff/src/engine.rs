//! Diff orchestration
//!
//! Sequences validation and application of a request's operations over a
//! private copy of the workflow:
//!
//! 1. node operations, in request order
//! 2. rename propagation into the connection map (once)
//! 3. all other operations, in request order
//! 4. the sanitizer pass (atomic mode only)
//!
//! In atomic mode the first failure aborts the call and the working copy is
//! dropped. In continueOnError mode each failure is recorded and skipped.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::apply::{ApplyState, OperationApplier};
use crate::catalog::{DefaultNodeCatalog, NodeCatalog};
use crate::config::DiffEngineConfig;
use crate::error::{DiffError, Result};
use crate::operations::{
    is_node_operation_kind, DiffErrorRecord, DiffOperation, DiffRequest, DiffResult,
};
use crate::sanitize::sanitize_workflow;
use crate::types::Workflow;
use crate::validation::{OperationValidator, ValidationError};

const VALIDATION_ONLY_MESSAGE: &str =
    "Validation successful. Operations are valid but not applied.";

/// Kind reported for entries without a usable `type`
const UNTYPED_OPERATION: &str = "untyped";

/// The two batches a request is split into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NodeOperations,
    OtherOperations,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::NodeOperations => write!(f, "node operations"),
            Phase::OtherOperations => write!(f, "connection/metadata operations"),
        }
    }
}

/// A request as read from JSON
///
/// Operations stay raw so that a malformed entry fails on its own index
/// instead of rejecting the whole request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    operations: Vec<Value>,
    #[serde(default)]
    validate_only: bool,
    #[serde(default)]
    continue_on_error: bool,
}

/// One request entry on its way through the engine
#[derive(Debug)]
struct PendingOperation<'r> {
    index: usize,
    kind: String,
    node_phase: bool,
    operation: std::result::Result<Cow<'r, DiffOperation>, ValidationError>,
}

impl<'r> PendingOperation<'r> {
    fn typed(index: usize, operation: &'r DiffOperation) -> Self {
        Self {
            index,
            kind: operation.kind().to_string(),
            node_phase: operation.is_node_operation(),
            operation: Ok(Cow::Borrowed(operation)),
        }
    }

    /// Parse one raw entry; a parse failure is kept as this entry's error
    fn from_json(index: usize, value: Value) -> Self {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(UNTYPED_OPERATION)
            .to_string();
        match serde_json::from_value::<DiffOperation>(value) {
            Ok(operation) => Self {
                index,
                kind,
                node_phase: operation.is_node_operation(),
                operation: Ok(Cow::Owned(operation)),
            },
            Err(e) => Self {
                index,
                node_phase: is_node_operation_kind(&kind),
                operation: Err(ValidationError::MalformedOperation {
                    kind: kind.clone(),
                    reason: e.to_string(),
                }),
                kind,
            },
        }
    }
}

/// Applies diff requests to workflows
///
/// The engine holds only configuration; every call works on its own copy of
/// the input, so one engine can serve concurrent callers.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use workflow_diff::WorkflowDiffEngine;
///
/// let engine = WorkflowDiffEngine::new();
/// let workflow = json!({
///     "name": "Demo",
///     "nodes": [{"id": "1", "name": "Manual Trigger", "type": "n8n-nodes-base.manualTrigger",
///                "typeVersion": 1, "position": [250, 300], "parameters": {}}],
///     "connections": {}
/// });
/// let request = json!({"operations": [
///     {"type": "addNode", "node": {"name": "Set Data", "type": "n8n-nodes-base.set",
///                                  "typeVersion": 3.4, "position": [450, 300]}},
///     {"type": "addConnection", "source": "Manual Trigger", "target": "Set Data"}
/// ]});
///
/// let result = engine.apply_json(&workflow, &request);
/// assert!(result.success);
/// assert_eq!(result.operations_applied, Some(2));
/// ```
#[derive(Clone)]
pub struct WorkflowDiffEngine {
    config: DiffEngineConfig,
    catalog: Arc<dyn NodeCatalog>,
}

impl Default for WorkflowDiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowDiffEngine {
    /// Create an engine with default configuration and node catalog
    pub fn new() -> Self {
        Self {
            config: DiffEngineConfig::default(),
            catalog: Arc::new(DefaultNodeCatalog),
        }
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: DiffEngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the node catalog used for trigger and type checks
    pub fn with_catalog(mut self, catalog: Arc<dyn NodeCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn config(&self) -> &DiffEngineConfig {
        &self.config
    }

    /// Apply `request` to a copy of `workflow`
    ///
    /// Never fails: every problem is reported inside the returned result.
    pub fn apply(&self, workflow: &Workflow, request: &DiffRequest) -> DiffResult {
        let operations = request
            .operations
            .iter()
            .enumerate()
            .map(|(index, operation)| PendingOperation::typed(index, operation))
            .collect::<Vec<_>>();
        self.run(
            workflow,
            &operations,
            request.validate_only,
            request.continue_on_error,
        )
    }

    /// Parse a workflow and request from JSON and apply them
    ///
    /// Each operation is parsed on its own: a malformed one is reported at
    /// its index like any other failed operation. Only an unreadable
    /// workflow or request envelope is an engine error.
    pub fn apply_json(&self, workflow: &Value, request: &Value) -> DiffResult {
        let (workflow, request) = match parse_input(workflow, request) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("Rejected diff input: {}", e);
                return DiffResult::engine_error(e);
            }
        };
        let operations = request
            .operations
            .into_iter()
            .enumerate()
            .map(|(index, value)| PendingOperation::from_json(index, value))
            .collect::<Vec<_>>();
        self.run(
            &workflow,
            &operations,
            request.validate_only,
            request.continue_on_error,
        )
    }

    fn run(
        &self,
        workflow: &Workflow,
        operations: &[PendingOperation<'_>],
        validate_only: bool,
        continue_on_error: bool,
    ) -> DiffResult {
        let outcome = if continue_on_error {
            self.run_continue_on_error(workflow, operations, validate_only)
        } else {
            self.run_atomic(workflow, operations, validate_only)
        };
        outcome.unwrap_or_else(|e| {
            log::warn!("Diff engine error: {}", e);
            DiffResult::engine_error(e)
        })
    }

    fn run_atomic(
        &self,
        original: &Workflow,
        operations: &[PendingOperation<'_>],
        validate_only: bool,
    ) -> Result<DiffResult> {
        let mut working = original.clone();
        let mut state = ApplyState::default();
        let (node_ops, other_ops) = partition(operations);

        let phases = [
            (Phase::NodeOperations, &node_ops),
            (Phase::OtherOperations, &other_ops),
        ];
        for (phase, batch) in phases {
            for &pending in batch {
                if let Err(record) = self.step(&mut working, pending, &mut state) {
                    log::debug!("Aborting diff at operation {} during {}", pending.index, phase);
                    return Ok(DiffResult::failure(vec![record]));
                }
            }
            if phase == Phase::NodeOperations {
                propagate_renames(&mut working, &mut state);
            }
        }
        ensure_no_new_stale_connections(original, &working)?;

        if validate_only {
            log::info!("Validated {} operation(s), nothing applied", operations.len());
            return Ok(DiffResult {
                success: true,
                message: Some(VALIDATION_ONLY_MESSAGE.to_string()),
                warnings: state.warnings,
                ..Default::default()
            });
        }

        if self.config.sanitize_on_commit {
            sanitize_workflow(&mut working, &self.config);
        }

        let applied = operations.len();
        log::info!("Applied {} operation(s) to workflow '{}'", applied, working.name);
        let stale_removed = !state.stale_connections.is_empty();
        Ok(DiffResult {
            success: true,
            workflow: Some(working),
            operations_applied: Some(applied),
            message: Some(format!("Applied {} operations", applied)),
            warnings: state.warnings,
            should_activate: state.should_activate,
            should_deactivate: state.should_deactivate,
            stale_connections_removed: stale_removed.then_some(state.stale_connections),
            ..Default::default()
        })
    }

    fn run_continue_on_error(
        &self,
        original: &Workflow,
        operations: &[PendingOperation<'_>],
        validate_only: bool,
    ) -> Result<DiffResult> {
        let mut working = original.clone();
        let mut state = ApplyState::default();
        let (node_ops, other_ops) = partition(operations);

        let mut applied = Vec::new();
        let mut failed = Vec::new();
        let mut errors = Vec::new();

        let phases = [
            (Phase::NodeOperations, &node_ops),
            (Phase::OtherOperations, &other_ops),
        ];
        for (phase, batch) in phases {
            for &pending in batch {
                match self.step(&mut working, pending, &mut state) {
                    Ok(()) => applied.push(pending.index),
                    Err(record) => {
                        log::warn!(
                            "Skipping operation {} ({}) during {}: {}",
                            pending.index,
                            pending.kind,
                            phase,
                            record.message
                        );
                        failed.push(pending.index);
                        errors.push(record);
                    }
                }
            }
            if phase == Phase::NodeOperations {
                propagate_renames(&mut working, &mut state);
            }
        }
        ensure_no_new_stale_connections(original, &working)?;

        applied.sort_unstable();
        failed.sort_unstable();
        errors.sort_by_key(|record: &DiffErrorRecord| record.operation);

        log::info!(
            "Applied {} operation(s), {} failed (continueOnError{})",
            applied.len(),
            failed.len(),
            if validate_only { ", validate only" } else { "" }
        );

        let committed = !validate_only;
        Ok(DiffResult {
            success: !applied.is_empty(),
            message: Some(format!(
                "Applied {} operations, {} failed",
                applied.len(),
                failed.len()
            )),
            operations_applied: committed.then_some(applied.len()),
            workflow: committed.then_some(working),
            errors,
            warnings: state.warnings,
            applied: Some(applied),
            failed: Some(failed),
            should_activate: committed && state.should_activate,
            should_deactivate: committed && state.should_deactivate,
            stale_connections_removed: (committed && !state.stale_connections.is_empty())
                .then_some(state.stale_connections),
        })
    }

    /// Validate then apply one operation
    fn step(
        &self,
        working: &mut Workflow,
        pending: &PendingOperation<'_>,
        state: &mut ApplyState,
    ) -> std::result::Result<(), DiffErrorRecord> {
        let index = pending.index;
        let rejected = |e: &ValidationError| DiffErrorRecord {
            operation: index as i64,
            message: e.to_string(),
            details: e.details(),
        };

        let operation = pending.operation.as_ref().map_err(rejected)?;
        let validator = OperationValidator::new(&self.config, self.catalog.as_ref());
        validator
            .validate(working, operation)
            .map_err(|e| rejected(&e))?;

        OperationApplier::new(&self.config)
            .apply(working, index, operation, state)
            .map_err(|e| DiffErrorRecord {
                operation: index as i64,
                message: format!("Failed to apply {}: {}", pending.kind, e),
                details: None,
            })?;

        log::debug!("Applied operation {} ({})", index, pending.kind);
        Ok(())
    }
}

fn parse_input(workflow: &Value, request: &Value) -> Result<(Workflow, WireRequest)> {
    let workflow = serde_json::from_value::<Workflow>(workflow.clone())
        .map_err(|e| DiffError::InvalidRequest(format!("workflow: {}", e)))?;
    let request = serde_json::from_value::<WireRequest>(request.clone())
        .map_err(|e| DiffError::InvalidRequest(format!("operations: {}", e)))?;
    Ok((workflow, request))
}

type Batch<'p, 'r> = Vec<&'p PendingOperation<'r>>;

/// Split operations into node operations and the rest, keeping request indices
fn partition<'p, 'r>(operations: &'p [PendingOperation<'r>]) -> (Batch<'p, 'r>, Batch<'p, 'r>) {
    operations.iter().partition(|pending| pending.node_phase)
}

fn propagate_renames(working: &mut Workflow, state: &mut ApplyState) {
    if !state.renames.is_empty() {
        state.renames.apply(&mut working.connections);
    }
}

/// The call must not leave more dangling connection references than it found
fn ensure_no_new_stale_connections(original: &Workflow, working: &Workflow) -> Result<()> {
    let before = original.stale_connections().len();
    let after = working.stale_connections();
    if after.len() > before {
        let listed: Vec<String> = after
            .iter()
            .map(|s| format!("{} -> {}", s.from, s.to))
            .collect();
        return Err(DiffError::engine(format!(
            "connections reference missing nodes after applying operations: {}",
            listed.join(", ")
        )));
    }
    Ok(())
}
