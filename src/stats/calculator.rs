use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::task_stats::TaskStats;
use crate::cvat::{FrameLabels, ProjectData, TaskRecord};

/// Occurrences of each label name across a project
pub type LabelCounts = BTreeMap<String, u64>;

/// Outcome of reconciling the task-level and job-level assignee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssigneeResolution<'a> {
    Resolved(Option<&'a str>),
    /// Task and job are assigned to different users
    Conflict,
}

/// Reconcile the task and job assignee; either may be unset
pub fn resolve_assignee<'a>(
    task_assignee: Option<&'a str>,
    job_assignee: Option<&'a str>,
) -> AssigneeResolution<'a> {
    match (task_assignee, job_assignee) {
        (Some(task), Some(job)) if task != job => AssigneeResolution::Conflict,
        (Some(task), _) => AssigneeResolution::Resolved(Some(task)),
        (None, job) => AssigneeResolution::Resolved(job),
    }
}

/// Task-level facts before annotations are counted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    pub task_id: u64,
    pub job_id: u64,
    pub task_name: String,
    pub frame_count: u64,
    pub assignee: Option<String>,
    pub last_modified: DateTime<Utc>,
}

fn task_row(record: &TaskRecord) -> Option<TaskRow> {
    let task = &record.task;
    let Some(job) = record.jobs.first() else {
        warn!("Skipping task {} ('{}'): it has no jobs", task.id, task.name);
        return None;
    };
    if record.jobs.len() > 1 {
        warn!(
            "Task {} has {} jobs; only job {} ({} stage) is reported",
            task.id,
            record.jobs.len(),
            job.id,
            job.stage_name()
        );
    }

    let task_assignee = task.assignee.as_ref().map(|u| u.username.as_str());
    let job_assignee = job.assignee.as_ref().map(|u| u.username.as_str());
    let assignee = match resolve_assignee(task_assignee, job_assignee) {
        AssigneeResolution::Resolved(assignee) => assignee.map(str::to_string),
        AssigneeResolution::Conflict => {
            warn!(
                "Skipping task {}: task assignee '{}' does not match job assignee '{}'",
                task.id,
                task_assignee.unwrap_or_default(),
                job_assignee.unwrap_or_default()
            );
            return None;
        }
    };

    Some(TaskRow {
        task_id: task.id,
        job_id: job.id,
        task_name: task.name.clone(),
        frame_count: job.frame_count(),
        assignee,
        last_modified: task.updated_date,
    })
}

/// One row per usable task; tasks without jobs or with conflicting
/// assignees are dropped
pub fn project_task_rows(tasks: &[TaskRecord]) -> Vec<TaskRow> {
    tasks.iter().filter_map(task_row).collect()
}

/// Count annotated frames and objects for each task row
///
/// Tasks without a single annotated frame are omitted. The result is ordered
/// by assignee (unassigned last), then task id.
pub fn annotation_stats(
    rows: Vec<TaskRow>,
    labels_per_task: &BTreeMap<u64, FrameLabels>,
) -> Vec<TaskStats> {
    let empty = FrameLabels::new();
    let mut stats: Vec<TaskStats> = rows
        .into_iter()
        .filter_map(|row| {
            let frames = labels_per_task.get(&row.task_id).unwrap_or(&empty);
            if frames.is_empty() {
                debug!("Task {} has no annotated frames", row.task_id);
                return None;
            }

            let mut unique_labels: BTreeSet<&str> = BTreeSet::new();
            let mut total_objects = 0u64;
            for labels in frames.values() {
                let in_frame: HashSet<&str> = labels.iter().map(String::as_str).collect();
                total_objects += in_frame.len() as u64;
                unique_labels.extend(in_frame);
            }

            Some(TaskStats {
                task_id: row.task_id,
                job_id: row.job_id,
                task_name: row.task_name,
                frame_count: row.frame_count,
                assignee: row.assignee,
                annotated_frame_count: frames.len() as u64,
                unique_object_count: unique_labels.len() as u64,
                total_object_count: total_objects,
                last_modified_timestamp: row.last_modified,
            })
        })
        .collect();

    stats.sort_by(|a, b| {
        compare_assignees(a.assignee.as_deref(), b.assignee.as_deref())
            .then(a.task_id.cmp(&b.task_id))
    });
    stats
}

fn compare_assignees(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Build today's statistics table from raw project data
pub fn compute_task_stats(data: &ProjectData) -> Vec<TaskStats> {
    let rows = project_task_rows(&data.tasks);
    annotation_stats(rows, &data.labels_per_task)
}

/// Count every label occurrence across all tasks and frames
pub fn label_counts(labels_per_task: &BTreeMap<u64, FrameLabels>) -> LabelCounts {
    let mut counts = LabelCounts::new();
    for labels in labels_per_task.values().flat_map(|frames| frames.values()) {
        for label in labels {
            *counts.entry(label.clone()).or_insert(0) += 1;
        }
    }
    counts
}
