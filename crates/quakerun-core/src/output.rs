//! Scientific task inputs and outputs as seen by the accounting layer.
//!
//! The hazard computation itself is opaque. These types only describe the
//! bookkeeping that flows around it: which sources a task covers, and how
//! long each of them took.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A seismic source as handed to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub source_id: String,

    /// Typology code, e.g. 'P' point, 'A' area, 'S' simple fault,
    /// 'C' complex fault, 'X' characteristic.
    pub code: char,

    pub num_ruptures: u64,

    /// Number of distance bins / sites the source affects.
    #[serde(default = "one")]
    pub num_dists: u64,
}

fn one() -> u64 {
    1
}

impl SourceSpec {
    pub fn new(source_id: impl Into<String>, code: char, num_ruptures: u64) -> Self {
        Self {
            source_id: source_id.into(),
            code,
            num_ruptures,
            num_dists: 1,
        }
    }

    pub fn with_num_dists(mut self, num_dists: u64) -> Self {
        self.num_dists = num_dists;
        self
    }

    /// Heuristic weight used to balance task blocks.
    pub fn weight(&self) -> u64 {
        self.num_ruptures.saturating_mul(self.num_dists.max(1))
    }
}

/// Timing of one source inside one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTiming {
    pub source_id: String,
    pub code: char,
    pub num_sites: u64,
    /// Seconds spent on this source.
    pub calc_time: f64,
    /// Events generated by the source.
    #[serde(default)]
    pub events: u64,
}

/// Decoded result payload of a source-processing task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    #[serde(default)]
    pub source_timings: Vec<SourceTiming>,

    /// Effective ruptures per group id.
    #[serde(default)]
    pub eff_ruptures: BTreeMap<u32, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_uses_at_least_one_dist() {
        let mut src = SourceSpec::new("s1", 'P', 120);
        assert_eq!(src.weight(), 120);

        src.num_dists = 0;
        assert_eq!(src.weight(), 120);

        assert_eq!(src.with_num_dists(3).weight(), 360);
    }

    #[test]
    fn test_source_spec_defaults_num_dists() {
        let src: SourceSpec =
            serde_json::from_str(r#"{"source_id":"a","code":"A","num_ruptures":10}"#).unwrap();
        assert_eq!(src.num_dists, 1);
        assert_eq!(src.code, 'A');
    }

    #[test]
    fn test_task_output_tolerates_missing_fields() {
        let output: TaskOutput = serde_json::from_str("{}").unwrap();
        assert!(output.source_timings.is_empty());
        assert!(output.eff_ruptures.is_empty());
    }
}
