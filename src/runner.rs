//! High-level runner API for the annotation report.
//!
//! This module wires the pipeline stages together: fetch project data from
//! CVAT, compute the statistics table, persist today's snapshot, compare with
//! the previous one, download changed annotations and email the summary.
//!
//! This is the primary API for external users and for the CLI.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use tracing::{info, warn};

use crate::config::ReportConfig;
use crate::cvat::{AnnotationSource, CvatClient, CvatClientArgsBuilder, fetch_project_data};
use crate::delta::{Delta, compute_delta};
use crate::report::{
    Mailer, ReportContext, SmtpMailer, day_annotations_dir, download_delta_annotations,
    render_report,
};
use crate::snapshot::{LocalSnapshotStore, Snapshot, SnapshotStore};
use crate::stats::{compute_task_stats, label_counts};

/// Arguments for a report run
#[derive(Debug, Clone)]
pub struct ReportArgs {
    pub config: ReportConfig,
    /// Local time the run is attributed to; dates folders and filenames
    pub run_at: NaiveDateTime,
    /// Compute and compare only: no snapshot, downloads or email
    pub dry_run: bool,
    pub quiet: bool,
}

/// Summary of a completed report run
#[derive(Debug)]
pub struct ReportResult {
    pub run_date: NaiveDate,
    pub tasks_reported: usize,
    pub previous_snapshot: Option<NaiveDate>,
    pub delta: Delta,
    pub snapshot_path: Option<PathBuf>,
    pub downloaded_files: Vec<String>,
    pub email_sent: bool,
    pub duration: Duration,
}

/// Run the daily report against the configured CVAT server and SMTP relay
///
/// # Example
///
/// ```no_run
/// use annotation_report::config::ReportConfig;
/// use annotation_report::runner::{ReportArgs, run_report};
///
/// # async fn example() -> anyhow::Result<()> {
/// let args = ReportArgs {
///     config: ReportConfig::load("config.yaml")?,
///     run_at: chrono::Local::now().naive_local(),
///     dry_run: false,
///     quiet: true,
/// };
///
/// let result = run_report(args).await?;
/// println!("{} new, {} updated", result.delta.new_tasks.len(), result.delta.updated_tasks.len());
/// # Ok(())
/// # }
/// ```
pub async fn run_report(args: ReportArgs) -> Result<ReportResult> {
    let client_args = CvatClientArgsBuilder::from_params(&args.config.cvat).build()?;
    let source = CvatClient::new(client_args)?;

    let home_dir = std::env::var_os("HOME").map(PathBuf::from);
    let store = LocalSnapshotStore::new(args.config.proj_dir.clone()).with_fallback_dir(home_dir);

    let mailer = SmtpMailer::new(args.config.email_params.clone());

    run_report_with(args, &source, &store, &mailer).await
}

/// Run the report with explicit collaborators
pub async fn run_report_with(
    args: ReportArgs,
    source: &dyn AnnotationSource,
    store: &dyn SnapshotStore,
    mailer: &dyn Mailer,
) -> Result<ReportResult> {
    let start_time = Instant::now();
    let ReportArgs {
        config,
        run_at,
        dry_run,
        quiet,
    } = args;
    let run_date = run_at.date();
    let cvat = &config.cvat;
    info!(
        "Starting annotation report for '{}' on {}",
        cvat.project_name, run_date
    );

    // 1. Fetch
    let data = fetch_project_data(source, cvat, quiet).await?;

    // 2. Compute
    let today = Snapshot::new(run_date, compute_task_stats(&data));
    let labels = label_counts(&data.labels_per_task);
    info!("Computed statistics for {} annotated tasks", today.rows.len());

    // 3. Persist
    let snapshot_path = if dry_run {
        None
    } else {
        Some(
            store
                .save(&cvat.project_name, &today, run_at)
                .await
                .context("Failed to save today's snapshot")?,
        )
    };

    // 4. Compare; an unreadable history is the same as no history
    let previous = store.load_previous(run_date).await.unwrap_or_else(|e| {
        warn!("Ignoring unreadable previous snapshot: {:#}", e);
        None
    });
    let delta = compute_delta(&today, previous.as_ref(), &cvat.skipped_task_ids());

    let mut result = ReportResult {
        run_date,
        tasks_reported: today.rows.len(),
        previous_snapshot: previous.as_ref().map(|s| s.date),
        delta,
        snapshot_path,
        downloaded_files: Vec::new(),
        email_sent: false,
        duration: Duration::ZERO,
    };

    let Some(csv_path) = result.snapshot_path.clone() else {
        info!("Dry run: skipping downloads and email");
        result.duration = start_time.elapsed();
        return Ok(result);
    };

    // 5. Download
    result.downloaded_files = download_delta_annotations(
        source,
        &result.delta,
        &config.annotations_dir,
        run_date,
        &cvat.annotation_format,
    )
    .await?;

    // 6. Email
    let download_dir = day_annotations_dir(&config.annotations_dir, run_date);
    let email = render_report(&ReportContext {
        project_name: &cvat.project_name,
        date: run_date,
        delta: &result.delta,
        downloaded_files: &result.downloaded_files,
        download_dir: &download_dir,
        csv_path: &csv_path,
        label_counts: &labels,
    });
    mailer.send(&email).await?;
    result.email_sent = true;

    result.duration = start_time.elapsed();
    info!("Report finished in {:.2}s", result.duration.as_secs_f64());
    Ok(result)
}
