//! The composite accounting report handed to the reporting collaborator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Operation, OperationStats, TaskId};

/// Accumulated figures for one source across every task that touched it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub source_id: String,
    pub code: char,
    pub num_sites: u64,
    pub calc_time: f64,
    /// Number of task results that contributed to this source.
    pub num_split: u64,
    pub events: u64,
}

/// Bytes moved to and from workers for one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStats {
    /// Bytes the workers sent back (results).
    pub sent: u64,
    /// Bytes the workers received (task inputs).
    pub received: u64,
}

/// Structured summary of a calculation's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeReport {
    /// False if expected results are still missing or some task failed.
    pub complete: bool,

    pub expected_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: Vec<TaskId>,

    /// Duration statistics keyed by operation.
    pub operations: BTreeMap<Operation, OperationStats>,

    /// Sources by descending `calc_time`, truncated to the configured top-K.
    pub slowest_sources: Vec<SourceInfo>,

    /// Total `calc_time` per typology code.
    pub calc_time_by_code: BTreeMap<String, f64>,

    pub data_transfer: BTreeMap<Operation, TransferStats>,

    /// Effective ruptures per group id.
    pub eff_ruptures: BTreeMap<u32, u64>,
}

impl CompositeReport {
    /// Total effective ruptures over all groups.
    pub fn total_eff_ruptures(&self) -> u64 {
        self.eff_ruptures.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_json_keys() {
        let mut report = CompositeReport {
            complete: true,
            expected_tasks: 1,
            completed_tasks: 1,
            failed_tasks: Vec::new(),
            operations: BTreeMap::new(),
            slowest_sources: Vec::new(),
            calc_time_by_code: BTreeMap::new(),
            data_transfer: BTreeMap::new(),
            eff_ruptures: BTreeMap::from([(0, 10), (1, 5)]),
        };
        report.data_transfer.insert(
            Operation::Preclassical,
            TransferStats {
                sent: 10,
                received: 20,
            },
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["data_transfer"]["preclassical"]["received"], 20);
        assert_eq!(report.total_eff_ruptures(), 15);
    }
}
