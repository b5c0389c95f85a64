use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary statistics of one task (and its single job)
///
/// This is also the row format of the daily snapshot CSV; the serde names are
/// the snapshot column headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub task_id: u64,
    pub job_id: u64,
    pub task_name: String,
    /// Total frames in the job
    #[serde(rename = "frames")]
    pub frame_count: u64,
    pub assignee: Option<String>,
    /// Frames carrying at least one shape
    #[serde(rename = "frames_annotated")]
    pub annotated_frame_count: u64,
    /// Distinct label names across the task
    #[serde(rename = "unique_obj_annotated")]
    pub unique_object_count: u64,
    /// Sum over frames of the distinct label names in each frame
    #[serde(rename = "total_obj_annotated")]
    pub total_object_count: u64,
    #[serde(rename = "last_modified")]
    pub last_modified_timestamp: DateTime<Utc>,
}

impl TaskStats {
    /// Whether any count or the modification time differs from `other`
    ///
    /// Name, job id and assignee are descriptive and do not count as changes.
    pub fn stats_differ(&self, other: &TaskStats) -> bool {
        self.frame_count != other.frame_count
            || self.annotated_frame_count != other.annotated_frame_count
            || self.unique_object_count != other.unique_object_count
            || self.total_object_count != other.total_object_count
            || self.last_modified_timestamp != other.last_modified_timestamp
    }
}
