//! Comparison of today's statistics against the previous snapshot
//!
//! Tasks only present today are new, tasks present in both snapshots whose
//! counts or modification time differ are updated. Tasks that disappeared
//! since the previous snapshot are not reported.

use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::snapshot::Snapshot;
use crate::stats::TaskStats;

/// A task whose statistics changed between two snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskUpdate {
    pub previous: TaskStats,
    pub current: TaskStats,
}

impl TaskUpdate {
    /// Change in annotated frames (negative when annotations were removed)
    pub fn frames_added(&self) -> i64 {
        self.current.annotated_frame_count as i64 - self.previous.annotated_frame_count as i64
    }

    /// Change in total annotated objects
    pub fn objects_added(&self) -> i64 {
        self.current.total_object_count as i64 - self.previous.total_object_count as i64
    }
}

/// New and updated tasks of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub new_tasks: Vec<TaskStats>,
    pub updated_tasks: Vec<TaskUpdate>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.new_tasks.is_empty() && self.updated_tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.new_tasks.len() + self.updated_tasks.len()
    }

    /// Current statistics of every new or updated task
    pub fn changed_tasks(&self) -> impl Iterator<Item = &TaskStats> {
        self.new_tasks
            .iter()
            .chain(self.updated_tasks.iter().map(|update| &update.current))
    }
}

/// Compare `today` against `previous`, ignoring tasks in `skipped`
///
/// Without a previous snapshot every task is new. Output follows the row
/// order of `today`.
pub fn compute_delta(
    today: &Snapshot,
    previous: Option<&Snapshot>,
    skipped: &HashSet<u64>,
) -> Delta {
    let previous_by_id: HashMap<u64, &TaskStats> = previous
        .map(|snapshot| {
            snapshot
                .rows
                .iter()
                .filter(|row| !skipped.contains(&row.task_id))
                .map(|row| (row.task_id, row))
                .collect()
        })
        .unwrap_or_default();

    let mut delta = Delta::default();
    for row in today.rows.iter().filter(|row| !skipped.contains(&row.task_id)) {
        match previous_by_id.get(&row.task_id) {
            None => delta.new_tasks.push(row.clone()),
            Some(old) if old.stats_differ(row) => delta.updated_tasks.push(TaskUpdate {
                previous: (*old).clone(),
                current: row.clone(),
            }),
            Some(_) => {}
        }
    }

    match previous {
        Some(snapshot) => info!(
            "Compared with snapshot of {}: {} new, {} updated",
            snapshot.date,
            delta.new_tasks.len(),
            delta.updated_tasks.len()
        ),
        None => info!(
            "No previous snapshot; reporting all {} tasks as new",
            delta.new_tasks.len()
        ),
    }
    delta
}
