//! Workflow Diff - structured mutation of automation workflow graphs
//!
//! This crate applies ordered batches of graph-mutation operations to a
//! workflow document (nodes plus typed, slot-indexed connections). It
//! supports:
//!
//! - 17 operations over nodes, connections and workflow metadata
//! - Atomic (fail-fast) and continueOnError (best-effort) application
//! - Validate-only dry runs that never return a mutated workflow
//! - Rename propagation into connection references
//! - Semantic `branch`/`case` routing for IF and Switch nodes
//! - Canonicalization of filter-based node parameters
//!
//! # Architecture
//!
//! - `WorkflowDiffEngine`: orchestrates phases and assembles the result
//! - `OperationValidator`: pure per-operation precondition checks
//! - `OperationApplier`: mutates the private working copy
//! - `NodeCatalog`: pluggable node type classification
//!
//! The engine is synchronous and performs no I/O. It never mutates the
//! caller's workflow.
//!
//! # Example
//!
//! ```
//! use workflow_diff::{DiffOperation, DiffRequest, WorkflowBuilder, WorkflowDiffEngine};
//!
//! let workflow = WorkflowBuilder::new("Demo")
//!     .add_node("1", "Manual Trigger", "n8n-nodes-base.manualTrigger")
//!     .build();
//!
//! let request = DiffRequest::new(vec![DiffOperation::UpdateName {
//!     name: "Renamed".to_string(),
//! }]);
//! let result = WorkflowDiffEngine::new().apply(&workflow, &request);
//!
//! assert!(result.success);
//! assert_eq!(workflow.name, "Demo");
//! assert_eq!(result.workflow.map(|w| w.name).as_deref(), Some("Renamed"));
//! ```

pub mod apply;
pub mod builder;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod operations;
pub mod path;
pub mod rename;
pub mod resolver;
pub mod sanitize;
pub mod types;
pub mod validation;

// Re-export key types
pub use builder::WorkflowBuilder;
pub use catalog::{DefaultNodeCatalog, NodeCatalog};
pub use config::DiffEngineConfig;
pub use engine::WorkflowDiffEngine;
pub use error::{DiffError, Result};
pub use operations::{
    Branch, DiffErrorRecord, DiffOperation, DiffRequest, DiffResult, DiffWarning, SourceRoute,
};
pub use types::{
    ConnectionMap, ConnectionTarget, Position, StaleConnection, Workflow, WorkflowNode,
};
pub use validation::ValidationError;
