//! Splitting a source model into weighted task blocks.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{CoreError, Operation, Payload, SourceSpec, Task, TaskId};

/// The sources of one tectonic-region / logic-tree group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceGroup {
    pub id: u32,

    /// Mutually exclusive sources must be computed together and are never
    /// split across tasks.
    #[serde(default)]
    pub mutex: bool,

    pub sources: Vec<SourceSpec>,
}

impl SourceGroup {
    pub fn new(id: u32, sources: Vec<SourceSpec>) -> Self {
        Self {
            id,
            mutex: false,
            sources,
        }
    }

    pub fn mutex(mut self) -> Self {
        self.mutex = true;
        self
    }

    pub fn weight(&self) -> u64 {
        self.sources.iter().map(SourceSpec::weight).sum()
    }
}

/// Target weight per block so that `concurrent_tasks` blocks cover the total.
pub fn max_weight(total_weight: u64, concurrent_tasks: usize) -> u64 {
    let tasks = concurrent_tasks.max(1) as u64;
    total_weight.div_ceil(tasks).max(1)
}

/// Group items into consecutive blocks of at most `max_weight`.
///
/// A block is closed as soon as the next item would push it past the limit.
/// An item heavier than `max_weight` ends up alone in its block.
pub fn block_splitter<T, F>(
    items: impl IntoIterator<Item = T>,
    max_weight: u64,
    weight: F,
) -> Vec<Vec<T>>
where
    F: Fn(&T) -> u64,
{
    let mut blocks = Vec::new();
    let mut block = Vec::new();
    let mut block_weight = 0u64;

    for item in items {
        let w = weight(&item);
        if !block.is_empty() && block_weight.saturating_add(w) > max_weight {
            blocks.push(std::mem::take(&mut block));
            block_weight = 0;
        }
        block_weight = block_weight.saturating_add(w);
        block.push(item);
    }
    if !block.is_empty() {
        blocks.push(block);
    }
    blocks
}

/// Turn source groups into tasks of roughly equal weight.
///
/// Each task's payload is the JSON list of its sources; seeds are derived
/// from `master_seed` by task index so reruns are reproducible.
pub fn plan_tasks(
    groups: &[SourceGroup],
    operation: Operation,
    concurrent_tasks: usize,
    master_seed: u64,
) -> Result<Vec<Task>, CoreError> {
    let total: u64 = groups.iter().map(SourceGroup::weight).sum();
    let maxweight = max_weight(total, concurrent_tasks);
    info!(maxweight, "Using maxweight={}", maxweight);

    let mut tasks = Vec::new();
    let mut num_sources = 0usize;

    for group in groups.iter().filter(|g| !g.sources.is_empty()) {
        let blocks = if group.mutex {
            vec![group.sources.clone()]
        } else {
            block_splitter(group.sources.iter().cloned(), maxweight, SourceSpec::weight)
        };

        for block in blocks {
            let index = tasks.len() as u64;
            let weight = block.iter().map(SourceSpec::weight).sum();
            num_sources += block.len();

            let task = Task::new(operation, group.id, Payload::from_json(&block)?)
                .with_id(TaskId::new(format!("{}-{:04}", operation, index)))
                .with_seed(master_seed.wrapping_add(index))
                .with_weight(weight);
            tasks.push(task);
        }
    }

    info!(
        num_sources,
        num_tasks = tasks.len(),
        "Sent {} sources in {} tasks",
        num_sources,
        tasks.len()
    );
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_weight() {
        assert_eq!(max_weight(100, 4), 25);
        assert_eq!(max_weight(101, 4), 26);
        assert_eq!(max_weight(0, 4), 1);
        assert_eq!(max_weight(10, 0), 10);
    }

    #[test]
    fn test_block_splitter_respects_limit() {
        let blocks = block_splitter(vec![3u64, 4, 2, 5, 1], 7, |w| *w);
        assert_eq!(blocks, vec![vec![3, 4], vec![2, 5], vec![1]]);
    }

    #[test]
    fn test_heavy_item_gets_its_own_block() {
        let blocks = block_splitter(vec![2u64, 50, 2], 10, |w| *w);
        assert_eq!(blocks, vec![vec![2], vec![50], vec![2]]);
    }

    #[test]
    fn test_block_splitter_empty() {
        let blocks: Vec<Vec<u64>> = block_splitter(Vec::<u64>::new(), 10, |w| *w);
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_plan_tasks_splits_by_weight() {
        let group = SourceGroup::new(
            0,
            (0..8)
                .map(|i| SourceSpec::new(format!("src{i}"), 'P', 10))
                .collect(),
        );

        let tasks = plan_tasks(&[group], Operation::Preclassical, 4, 42).unwrap();

        assert_eq!(tasks.len(), 4);
        assert!(tasks.iter().all(|t| t.weight == 20));
        assert_eq!(tasks[0].id.as_str(), "preclassical-0000");
        assert_eq!(tasks[3].seed, 45);

        let block: Vec<SourceSpec> = tasks[1].payload.decode_json().unwrap();
        assert_eq!(block[0].source_id, "src2");
    }

    #[test]
    fn test_mutex_group_is_not_split() {
        let sources: Vec<_> = (0..5)
            .map(|i| SourceSpec::new(format!("m{i}"), 'C', 100))
            .collect();
        let groups = vec![
            SourceGroup::new(1, sources).mutex(),
            SourceGroup::new(2, vec![SourceSpec::new("a", 'A', 100)]),
            SourceGroup::new(3, Vec::new()),
        ];

        let tasks = plan_tasks(&groups, Operation::BuildRuptures, 6, 0).unwrap();

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].group_id, 1);
        assert_eq!(tasks[0].weight, 500);
        assert_eq!(tasks[1].group_id, 2);
    }
}
