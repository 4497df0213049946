//! Task-routing table: task-type → destination channel.

use crate::error::CoreError;
use crate::task::TaskType;

#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub destination: &'static str,
    pub queue_hint: &'static str,
}

/// A real deployment could make this data-driven; callers only require the
/// map to exist and be consulted at enqueue time, so a `match` over the
/// closed `TaskType` enum is the idiomatic (and exhaustiveness-checked)
/// shape.
pub fn route_for(task_type: TaskType) -> Route {
    match task_type {
        TaskType::ComputePi => Route { destination: "compute_pi", queue_hint: "default" },
        TaskType::DocumentAnalysis => {
            Route { destination: "document_analysis", queue_hint: "doc-tasks" }
        }
    }
}

/// Looks up a route by the wire-format task-type string. `TaskType` itself
/// is a closed enum today, but the routing table is the one place meant to
/// grow as task types are added — an unrecognized string surfaces
/// `InvalidTaskType` here rather than failing deserialization earlier.
pub fn route_for_str(task_type: &str) -> Result<Route, CoreError> {
    match task_type {
        "COMPUTE_PI" => Ok(route_for(TaskType::ComputePi)),
        "DOCUMENT_ANALYSIS" => Ok(route_for(TaskType::DocumentAnalysis)),
        other => Err(CoreError::InvalidTaskType(other.to_string())),
    }
}
