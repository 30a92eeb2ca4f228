//! Canonicalize version-dependent parameter shapes of filter-based nodes
//!
//! IF, Switch and Filter nodes from a certain version on store their
//! conditions in a "filter" structure:
//!
//! ```json
//! {
//!   "options": {"version": 2, "leftValue": "", "caseSensitive": true, "typeValidation": "strict"},
//!   "conditions": [
//!     {"id": "...", "leftValue": "...", "rightValue": "...",
//!      "operator": {"type": "string", "operation": "equals"}}
//!   ],
//!   "combinator": "and"
//! }
//! ```
//!
//! Callers frequently omit the options or put an operation name in the
//! operator's `type`. The sanitizer repairs both without overwriting values
//! the caller did supply.

use serde_json::{json, Map, Value};

use crate::config::DiffEngineConfig;
use crate::types::{Workflow, WorkflowNode};

/// Operator data types understood by the filter structure
const DATA_TYPES: &[&str] = &["string", "number", "boolean", "dateTime", "array", "object"];

/// Operations that take no right-hand value
const UNARY_OPERATIONS: &[&str] = &[
    "exists",
    "notExists",
    "empty",
    "notEmpty",
    "isEmpty",
    "isNotEmpty",
    "true",
    "false",
];

const BOOLEAN_OPERATIONS: &[&str] = &["true", "false", "isTrue", "isFalse"];
const NUMBER_OPERATIONS: &[&str] = &["gt", "gte", "lt", "lte", "isNumeric"];
const DATE_OPERATIONS: &[&str] = &["after", "before", "afterOrEquals", "beforeOrEquals"];

/// Where a node type keeps its filter structures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterLayout {
    /// `parameters.conditions` (IF, Filter)
    Conditions,
    /// `parameters.rules.values[*].conditions` (Switch)
    Rules,
}

fn filter_layout(node: &WorkflowNode, config: &DiffEngineConfig) -> Option<FilterLayout> {
    let version = node.version();
    let node_type = node.node_type.as_str();
    if config.is_if_node(node_type) && version >= config.if_sanitize_min_version {
        Some(FilterLayout::Conditions)
    } else if config.is_filter_node(node_type) && version >= config.filter_sanitize_min_version {
        Some(FilterLayout::Conditions)
    } else if config.is_switch_node(node_type) && version >= config.switch_sanitize_min_version {
        Some(FilterLayout::Rules)
    } else {
        None
    }
}

/// Sanitize one node in place, returning the number of fixes made
pub fn sanitize_node(node: &mut WorkflowNode, config: &DiffEngineConfig) -> usize {
    let Some(layout) = filter_layout(node, config) else {
        return 0;
    };
    let Some(parameters) = node.parameters.as_object_mut() else {
        return 0;
    };

    let fixes = match layout {
        FilterLayout::Conditions => parameters
            .get_mut("conditions")
            .and_then(Value::as_object_mut)
            .map_or(0, sanitize_filter),
        FilterLayout::Rules => {
            let Some(rules) = parameters.get_mut("rules").and_then(Value::as_object_mut) else {
                return 0;
            };
            // v3 stores rules under `values`, older payloads under `rules`
            let mut fixes = 0;
            for key in ["values", "rules"] {
                let Some(entries) = rules.get_mut(key).and_then(Value::as_array_mut) else {
                    continue;
                };
                for rule in entries.iter_mut() {
                    let filter = rule.get_mut("conditions").and_then(Value::as_object_mut);
                    if let Some(filter) = filter {
                        fixes += sanitize_filter(filter);
                    }
                }
            }
            fixes
        }
    };

    if fixes > 0 {
        log::debug!(
            "Sanitized {} field(s) on node '{}' ({} v{})",
            fixes,
            node.name,
            node.node_type,
            node.type_version
        );
    }
    fixes
}

/// Sanitize every node of a workflow
pub fn sanitize_workflow(workflow: &mut Workflow, config: &DiffEngineConfig) -> usize {
    workflow
        .nodes
        .iter_mut()
        .map(|node| sanitize_node(node, config))
        .sum()
}

fn sanitize_filter(filter: &mut Map<String, Value>) -> usize {
    let mut fixes = 0;

    let options = filter
        .entry("options")
        .or_insert_with(|| Value::Object(Map::new()));
    if !options.is_object() {
        *options = Value::Object(Map::new());
        fixes += 1;
    }
    if let Some(options) = options.as_object_mut() {
        let defaults = [
            ("version", json!(2)),
            ("leftValue", json!("")),
            ("caseSensitive", json!(true)),
            ("typeValidation", json!("strict")),
        ];
        for (key, default) in defaults {
            if !options.contains_key(key) {
                options.insert(key.to_string(), default);
                fixes += 1;
            }
        }
    }

    if let Some(conditions) = filter.get_mut("conditions").and_then(Value::as_array_mut) {
        for condition in conditions.iter_mut().filter_map(Value::as_object_mut) {
            fixes += sanitize_condition(condition);
        }
    }

    fixes
}

fn sanitize_condition(condition: &mut Map<String, Value>) -> usize {
    let mut fixes = 0;

    let has_id = condition
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty());
    if !has_id {
        condition.insert("id".to_string(), json!(uuid::Uuid::new_v4().to_string()));
        fixes += 1;
    }

    if let Some(operator) = condition.get_mut("operator").and_then(Value::as_object_mut) {
        fixes += sanitize_operator(operator);
    }
    fixes
}

fn sanitize_operator(operator: &mut Map<String, Value>) -> usize {
    let mut fixes = 0;
    let declared_type = operator.get("type").and_then(Value::as_str).map(str::to_string);
    let declared_operation = operator
        .get("operation")
        .and_then(Value::as_str)
        .map(str::to_string);

    // An operation name placed in `type`, e.g. {"type": "isEmpty"}
    let misplaced = declared_type
        .as_deref()
        .filter(|ty| !DATA_TYPES.contains(ty))
        .map(str::to_string);
    let operation = match (misplaced, declared_operation) {
        (Some(misplaced), None) => {
            operator.insert("operation".to_string(), json!(misplaced));
            fixes += 1;
            Some(misplaced)
        }
        (_, operation) => operation,
    };

    let type_is_valid = declared_type
        .as_deref()
        .is_some_and(|ty| DATA_TYPES.contains(&ty));
    if !type_is_valid {
        if let Some(operation) = &operation {
            operator.insert("type".to_string(), json!(infer_data_type(operation)));
            fixes += 1;
        }
    }

    if let Some(operation) = &operation {
        let unary = UNARY_OPERATIONS.contains(&operation.as_str());
        let single_value = operator.get("singleValue").cloned();
        match (unary, single_value) {
            (true, Some(Value::Bool(true))) | (false, None) => {}
            (true, _) => {
                operator.insert("singleValue".to_string(), json!(true));
                fixes += 1;
            }
            (false, Some(_)) => {
                operator.remove("singleValue");
                fixes += 1;
            }
        }
    }

    fixes
}

/// Best guess of the operand type an operation works on
fn infer_data_type(operation: &str) -> &'static str {
    if BOOLEAN_OPERATIONS.contains(&operation) {
        "boolean"
    } else if NUMBER_OPERATIONS.contains(&operation) {
        "number"
    } else if DATE_OPERATIONS.contains(&operation) {
        "dateTime"
    } else {
        "string"
    }
}
