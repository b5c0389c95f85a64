use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One page of a paginated CVAT list endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

impl<T> Page<T> {
    /// Whether another page follows this one
    pub fn has_next(&self) -> bool {
        self.next.is_some() && !self.results.is_empty()
    }
}

/// User reference embedded in tasks and jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub assignee: Option<UserRef>,
    pub updated_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub id: u64,
    #[serde(default)]
    pub assignee: Option<UserRef>,
    pub start_frame: u64,
    pub stop_frame: u64,
    #[serde(default)]
    pub stage: Option<String>,
}

impl Job {
    /// Number of frames covered by the job (both bounds inclusive)
    pub fn frame_count(&self) -> u64 {
        self.stop_frame.saturating_sub(self.start_frame) + 1
    }

    /// Workflow stage for log messages
    pub fn stage_name(&self) -> &str {
        self.stage.as_deref().unwrap_or("unknown")
    }
}

/// Shape annotation; only the fields the report uses are decoded
#[derive(Debug, Clone, Deserialize)]
pub struct Shape {
    pub frame: u64,
    pub label_id: u64,
}

/// Body of `/api/tasks/{id}/annotations`
#[derive(Debug, Clone, Deserialize)]
pub struct TaskAnnotations {
    #[serde(default)]
    pub shapes: Vec<Shape>,
}

/// Body returned when a dataset export is queued
#[derive(Debug, Clone, Deserialize)]
pub struct ExportRequest {
    pub rq_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Queued,
    Started,
    Finished,
    Failed,
}

/// Body of `/api/requests/{rq_id}`
#[derive(Debug, Clone, Deserialize)]
pub struct RequestState {
    pub status: RequestStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_page_deserialization() {
        let json = r#"{
            "count": 2,
            "next": "http://cvat/api/tasks?page=2",
            "previous": null,
            "results": [
                {"id": 4, "name": "drive_004.mp4", "assignee": {"id": 9, "username": "ana"},
                 "updated_date": "2026-10-16T08:30:00.123456Z", "status": "annotation"},
                {"id": 5, "name": "drive_005.mp4", "assignee": null,
                 "updated_date": "2026-10-17T11:00:00Z"}
            ]
        }"#;

        let page: Page<Task> = serde_json::from_str(json).unwrap();
        assert_eq!(page.results.len(), 2);
        assert!(page.has_next());
        assert_eq!(page.results[0].assignee.as_ref().unwrap().username, "ana");
        assert!(page.results[1].assignee.is_none());
    }

    #[test]
    fn test_last_page_has_no_next() {
        let json = r#"{"count": 1, "next": null, "results": [{"id": 1, "name": "car"}]}"#;
        let page: Page<Label> = serde_json::from_str(json).unwrap();
        assert!(!page.has_next());
    }

    #[test]
    fn test_job_frame_count_inclusive() {
        let json = r#"{"id": 12, "assignee": null, "start_frame": 0, "stop_frame": 299,
                       "stage": "annotation"}"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.frame_count(), 300);
        assert_eq!(job.stage_name(), "annotation");
    }

    #[test]
    fn test_job_without_stage() {
        let job: Job =
            serde_json::from_str(r#"{"id": 3, "start_frame": 10, "stop_frame": 10}"#).unwrap();
        assert_eq!(job.frame_count(), 1);
        assert_eq!(job.stage_name(), "unknown");
    }

    #[test]
    fn test_annotations_ignore_tracks_and_tags() {
        let json = r#"{
            "version": 3,
            "tags": [{"frame": 0, "label_id": 1}],
            "shapes": [
                {"type": "rectangle", "frame": 0, "label_id": 1, "points": [0, 0, 5, 5]},
                {"type": "polygon", "frame": 2, "label_id": 2, "points": []}
            ],
            "tracks": []
        }"#;
        let annotations: TaskAnnotations = serde_json::from_str(json).unwrap();
        assert_eq!(annotations.shapes.len(), 2);
        assert_eq!(annotations.shapes[1].frame, 2);
    }

    #[test]
    fn test_request_state_deserialization() {
        let json = r#"{"status": "finished", "message": "",
                       "result_url": "http://cvat/api/requests/x/download"}"#;
        let state: RequestState = serde_json::from_str(json).unwrap();
        assert_eq!(state.status, RequestStatus::Finished);
        assert!(state.result_url.is_some());
    }
}
