//! Task and Operation types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{CoreError, Payload, TaskId};

/// Named category of task, used as the grouping key for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Parse a source model partition.
    ReadSourceModel,
    /// Count effective ruptures and filter sources ahead of the main stage.
    Preclassical,
    /// Sample ruptures from a block of sources.
    BuildRuptures,
    /// Ground-motion fields and hazard curves from ruptures.
    ComputeGmfs,
    /// Classical probability-map computation.
    Classical,
}

impl Operation {
    /// Every known operation, in pipeline order.
    pub const ALL: [Operation; 5] = [
        Operation::ReadSourceModel,
        Operation::Preclassical,
        Operation::BuildRuptures,
        Operation::ComputeGmfs,
        Operation::Classical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::ReadSourceModel => "read_source_model",
            Operation::Preclassical => "preclassical",
            Operation::BuildRuptures => "build_ruptures",
            Operation::ComputeGmfs => "compute_gmfs",
            Operation::Classical => "classical",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown operation '{s}'")))
    }
}

/// An immutable unit of dispatchable work.
///
/// Tasks are created by a planner and shared by reference (`Arc<Task>`)
/// between the dispatcher, its in-flight table and the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// What the worker should run.
    pub operation: Operation,

    /// Tectonic-region / logic-tree group this task belongs to.
    pub group_id: u32,

    /// Random seed for any sampling done inside the task.
    pub seed: u64,

    /// Heuristic cost used by the planner when splitting sources.
    pub weight: u64,

    /// Opaque input for the executor.
    pub payload: Payload,

    /// When the task was created.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a new Task with a generated id.
    pub fn new(operation: Operation, group_id: u32, payload: Payload) -> Self {
        Self {
            id: TaskId::generate(),
            operation,
            group_id,
            seed: 0,
            weight: 1,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder method to set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Builder method to set the planner weight.
    pub fn with_weight(mut self, weight: u64) -> Self {
        self.weight = weight;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_round_trips_through_name() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
    }

    #[test]
    fn test_unknown_operation() {
        assert!(matches!(
            "disaggregation".parse::<Operation>(),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_operation_serde_name_matches_display() {
        let json = serde_json::to_string(&Operation::ReadSourceModel).unwrap();
        assert_eq!(json, "\"read_source_model\"");
        assert_eq!(Operation::ReadSourceModel.to_string(), "read_source_model");
    }

    #[test]
    fn test_task_builder() {
        let task = Task::new(Operation::Preclassical, 3, Payload::empty())
            .with_id("t-1")
            .with_seed(42)
            .with_weight(250);

        assert_eq!(task.id.as_str(), "t-1");
        assert_eq!(task.group_id, 3);
        assert_eq!(task.seed, 42);
        assert_eq!(task.weight, 250);
    }
}
