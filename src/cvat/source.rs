use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use super::types::{Job, Label, Page, Task, TaskAnnotations};
use crate::config::CvatParams;

const PROGRESS_TEMPLATE: &str =
    "[{elapsed_precise}] Tasks: [{bar:30.cyan/blue}] {pos}/{len} ({percent}%) {msg}";

/// Label names per annotated frame of a single task
pub type FrameLabels = BTreeMap<u64, Vec<String>>;

/// A task together with its jobs
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task: Task,
    pub jobs: Vec<Job>,
}

/// Everything the statistics stage needs from the annotation platform
#[derive(Debug, Clone, Default)]
pub struct ProjectData {
    pub tasks: Vec<TaskRecord>,
    pub labels_per_task: BTreeMap<u64, FrameLabels>,
}

/// Trait for reading project data from an annotation platform
///
/// The HTTP client implements this against a CVAT server; tests substitute an
/// in-memory implementation.
#[async_trait]
pub trait AnnotationSource: Send + Sync {
    /// All labels defined on a project
    async fn list_labels(&self, project_id: u64) -> Result<Vec<Label>>;

    /// All tasks belonging to a project
    async fn list_tasks(&self, project_name: &str) -> Result<Vec<Task>>;

    /// All jobs of a task
    async fn list_jobs(&self, task_id: u64) -> Result<Vec<Job>>;

    /// Shape annotations of a task
    async fn task_annotations(&self, task_id: u64) -> Result<TaskAnnotations>;

    /// Export a task's annotations (without images) into an archive at `dest`
    async fn export_annotations(&self, task_id: u64, format: &str, dest: &Path) -> Result<()>;
}

/// Drain a paginated endpoint, requesting pages 1, 2, ... until the last one
pub(crate) async fn collect_pages<T, F, Fut>(mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut page_number = 1;
    loop {
        let page = fetch_page(page_number).await?;
        let has_next = page.has_next();
        debug!(
            "Fetched page {} with {} results",
            page_number,
            page.results.len()
        );
        items.extend(page.results);
        if !has_next {
            break;
        }
        page_number += 1;
    }
    Ok(items)
}

/// Group a task's shapes by frame, translating label ids to names
///
/// Label ids missing from the project mapping are reported as
/// `Unknown_label_<id>` rather than dropped.
pub fn labels_per_frame(
    annotations: &TaskAnnotations,
    label_names: &HashMap<u64, String>,
) -> FrameLabels {
    let mut frames = FrameLabels::new();
    for shape in &annotations.shapes {
        let name = label_names
            .get(&shape.label_id)
            .cloned()
            .unwrap_or_else(|| format!("Unknown_label_{}", shape.label_id));
        frames.entry(shape.frame).or_default().push(name);
    }
    frames
}

/// Collect tasks, jobs and per-frame labels for a project
///
/// Tasks listed in `task_ids_to_skip` are dropped before any per-task request
/// is made.
pub async fn fetch_project_data(
    source: &dyn AnnotationSource,
    params: &CvatParams,
    quiet: bool,
) -> Result<ProjectData> {
    info!("Fetching labels for project {}", params.project_id);
    let label_names: HashMap<u64, String> = source
        .list_labels(params.project_id)
        .await
        .context("Failed to fetch project labels")?
        .into_iter()
        .map(|label| (label.id, label.name))
        .collect();
    debug!("Project defines {} labels", label_names.len());

    info!("Fetching tasks for project '{}'", params.project_name);
    let skipped = params.skipped_task_ids();
    let tasks: Vec<Task> = source
        .list_tasks(&params.project_name)
        .await
        .context("Failed to list project tasks")?
        .into_iter()
        .filter(|task| {
            let skip = skipped.contains(&task.id);
            if skip {
                info!("Skipping task {} ('{}') as configured", task.id, task.name);
            }
            !skip
        })
        .collect();
    info!("Found {} tasks to report on", tasks.len());

    let progress = if quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(tasks.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(PROGRESS_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar
    };

    let mut data = ProjectData::default();
    for task in tasks {
        progress.set_message(task.name.clone());

        let jobs = source
            .list_jobs(task.id)
            .await
            .with_context(|| format!("Failed to list jobs for task {}", task.id))?;
        let annotations = source
            .task_annotations(task.id)
            .await
            .with_context(|| format!("Failed to fetch annotations for task {}", task.id))?;

        data.labels_per_task
            .insert(task.id, labels_per_frame(&annotations, &label_names));
        data.tasks.push(TaskRecord { task, jobs });
        progress.inc(1);
    }
    progress.finish_and_clear();

    info!("Compiled annotation data for {} tasks", data.tasks.len());
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cvat::types::Shape;

    #[tokio::test]
    async fn test_collect_pages_follows_next() {
        let pages = vec![
            Page {
                next: Some("p2".to_string()),
                results: vec![1, 2],
            },
            Page {
                next: None,
                results: vec![3],
            },
        ];

        let mut requested = Vec::new();
        let items = collect_pages(|n| {
            requested.push(n);
            let page = pages[(n - 1) as usize].clone();
            async move { Ok(page) }
        })
        .await
        .unwrap();

        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(requested, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_collect_pages_stops_on_empty_page() {
        let items: Vec<u32> = collect_pages(|_| async {
            Ok(Page {
                next: Some("more".to_string()),
                results: vec![],
            })
        })
        .await
        .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_collect_pages_propagates_errors() {
        let result: Result<Vec<u32>> =
            collect_pages(|_| async { Err(anyhow::anyhow!("server unreachable")) }).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_labels_per_frame_groups_and_names() {
        let annotations = TaskAnnotations {
            shapes: vec![
                Shape { frame: 4, label_id: 1 },
                Shape { frame: 0, label_id: 2 },
                Shape { frame: 4, label_id: 99 },
                Shape { frame: 4, label_id: 1 },
            ],
        };
        let names = HashMap::from([(1, "car".to_string()), (2, "person".to_string())]);

        let frames = labels_per_frame(&annotations, &names);
        assert_eq!(frames.keys().copied().collect::<Vec<_>>(), vec![0, 4]);
        assert_eq!(frames[&0], vec!["person"]);
        assert_eq!(frames[&4], vec!["car", "Unknown_label_99", "car"]);
    }
}
