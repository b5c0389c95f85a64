use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tokio::fs;
use tracing::info;

use crate::config::DATE_FOLDER_FORMAT;
use crate::cvat::{AnnotationSource, format_slug};
use crate::delta::Delta;

/// Folder receiving the archives downloaded on `date`
pub fn day_annotations_dir(annotations_dir: &Path, date: NaiveDate) -> PathBuf {
    annotations_dir.join(date.format(DATE_FOLDER_FORMAT).to_string())
}

/// Archive file name for a task: the task name without its extension, the
/// task id and the export format
///
/// Task names are not unique within a project, so the id keeps every
/// task's archive apart.
pub fn annotation_file_name(task_id: u64, task_name: &str, format: &str) -> String {
    let stem = Path::new(task_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| task_name.to_string());
    format!("{}_{}_{}_annotations.zip", stem, task_id, format_slug(format))
}

/// Export the annotations of every new or updated task
///
/// Returns the downloaded file names in delta order. Any failed export aborts
/// the run.
pub async fn download_delta_annotations(
    source: &dyn AnnotationSource,
    delta: &Delta,
    annotations_dir: &Path,
    date: NaiveDate,
    format: &str,
) -> Result<Vec<String>> {
    if delta.is_empty() {
        info!("No new or updated tasks; nothing to download");
        return Ok(Vec::new());
    }

    let target_dir = day_annotations_dir(annotations_dir, date);
    fs::create_dir_all(&target_dir)
        .await
        .with_context(|| format!("Failed to create {}", target_dir.display()))?;

    let mut file_names = Vec::with_capacity(delta.len());
    for task in delta.changed_tasks() {
        let file_name = annotation_file_name(task.task_id, &task.task_name, format);
        let path = target_dir.join(&file_name);
        info!(
            "Downloading annotations for task {} ('{}')",
            task.task_id, task.task_name
        );
        source
            .export_annotations(task.task_id, format, &path)
            .await
            .with_context(|| format!("Failed to download annotations for task {}", task.task_id))?;
        file_names.push(file_name);
    }

    info!(
        "Downloaded {} annotation files to {}",
        file_names.len(),
        target_dir.display()
    );
    Ok(file_names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotation_file_name_strips_extension() {
        assert_eq!(
            annotation_file_name(42, "drive_0042.mp4", "Datumaro 1.0"),
            "drive_0042_42_datumaro_annotations.zip"
        );
    }

    #[test]
    fn test_annotation_file_name_without_extension() {
        assert_eq!(
            annotation_file_name(7, "night shift", "COCO 1.0"),
            "night shift_7_coco_annotations.zip"
        );
    }

    #[test]
    fn test_annotation_file_name_drops_directories() {
        assert_eq!(
            annotation_file_name(9, "batch3/cam1.avi", "Datumaro 1.0"),
            "cam1_9_datumaro_annotations.zip"
        );
    }

    #[test]
    fn test_same_stem_tasks_get_distinct_names() {
        let first = annotation_file_name(1, "cam1.mp4", "Datumaro 1.0");
        let second = annotation_file_name(2, "cam1.avi", "Datumaro 1.0");
        assert_ne!(first, second);
    }

    #[test]
    fn test_day_annotations_dir() {
        let dir = day_annotations_dir(
            Path::new("/data/annotations"),
            NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
        );
        assert_eq!(dir, PathBuf::from("/data/annotations/20261017"));
    }
}
