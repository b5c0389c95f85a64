use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::{DATE_FOLDER_FORMAT, SNAPSHOT_MARKER, SNAPSHOT_TIME_FORMAT};
use crate::stats::TaskStats;

/// Statistics table of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub date: NaiveDate,
    pub rows: Vec<TaskStats>,
}

impl Snapshot {
    pub fn new(date: NaiveDate, rows: Vec<TaskStats>) -> Self {
        Self { date, rows }
    }

    /// Encode rows as CSV with a header line
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in &self.rows {
            writer
                .serialize(row)
                .with_context(|| format!("Failed to encode task {}", row.task_id))?;
        }
        writer.into_inner().context("Failed to flush CSV writer")
    }

    /// Decode a snapshot CSV, rejecting duplicate task ids
    pub fn from_csv(date: NaiveDate, data: &[u8]) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(data);
        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for (index, record) in reader.deserialize::<TaskStats>().enumerate() {
            let row = record.with_context(|| format!("Invalid snapshot row {}", index + 1))?;
            if !seen.insert(row.task_id) {
                anyhow::bail!("Task {} appears more than once in snapshot", row.task_id);
            }
            rows.push(row);
        }
        Ok(Self { date, rows })
    }
}

/// Trait for snapshot persistence
///
/// One snapshot is stored per run; stored snapshots are never modified.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot, returning where it was written
    async fn save(
        &self,
        project_name: &str,
        snapshot: &Snapshot,
        saved_at: NaiveDateTime,
    ) -> Result<PathBuf>;

    /// Read the most recent snapshot dated strictly before `before`
    ///
    /// `Ok(None)` means no earlier snapshot exists.
    async fn load_previous(&self, before: NaiveDate) -> Result<Option<Snapshot>>;
}

/// Local filesystem implementation of SnapshotStore
///
/// Directory structure:
///   {base_dir}/{YYYYMMDD}/{project}_annotation_stats_{YYYYMMDD_HHMM}.csv
pub struct LocalSnapshotStore {
    base_dir: PathBuf,
    fallback_dir: Option<PathBuf>,
}

impl LocalSnapshotStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            fallback_dir: None,
        }
    }

    /// Directory used when the dated folder cannot be written
    pub fn with_fallback_dir(mut self, fallback_dir: Option<PathBuf>) -> Self {
        self.fallback_dir = fallback_dir;
        self
    }

    fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.base_dir.join(date.format(DATE_FOLDER_FORMAT).to_string())
    }

    fn file_name(project_name: &str, saved_at: NaiveDateTime) -> String {
        format!(
            "{}{}{}.csv",
            project_name,
            SNAPSHOT_MARKER,
            saved_at.format(SNAPSHOT_TIME_FORMAT)
        )
    }

    /// Latest dated folder before `before`, if any
    async fn previous_day_dir(&self, before: NaiveDate) -> Result<Option<(NaiveDate, PathBuf)>> {
        let mut entries = match fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to list snapshot directory {}", self.base_dir.display())
                });
            }
        };

        let mut latest: Option<(NaiveDate, PathBuf)> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("Failed to read snapshot directory entry")?
        {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(date) = parse_day_folder(&entry.file_name().to_string_lossy()) else {
                continue;
            };
            if date < before && latest.as_ref().is_none_or(|(d, _)| date > *d) {
                latest = Some((date, entry.path()));
            }
        }
        Ok(latest)
    }
}

/// Parse a folder name of exactly eight digits as a date
fn parse_day_folder(name: &str) -> Option<NaiveDate> {
    if name.len() != 8 || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(name, DATE_FOLDER_FORMAT).ok()
}

/// Latest snapshot CSV within a day folder
async fn latest_snapshot_file(day_dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(day_dir)
        .await
        .with_context(|| format!("Failed to list {}", day_dir.display()))?;

    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.contains(SNAPSHOT_MARKER) && name.ends_with(".csv") {
            candidates.push(name);
        }
    }
    // Filenames embed the save time, so the lexicographic maximum is the latest
    candidates.sort();
    Ok(candidates.pop().map(|name| day_dir.join(name)))
}

async fn write_file(dir: &Path, file_name: &str, data: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    let path = dir.join(file_name);
    fs::write(&path, data)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[async_trait::async_trait]
impl SnapshotStore for LocalSnapshotStore {
    async fn save(
        &self,
        project_name: &str,
        snapshot: &Snapshot,
        saved_at: NaiveDateTime,
    ) -> Result<PathBuf> {
        let data = snapshot.to_csv()?;
        let file_name = Self::file_name(project_name, saved_at);

        match write_file(&self.day_dir(snapshot.date), &file_name, &data).await {
            Ok(path) => {
                info!("Saved stats to {}", path.display());
                Ok(path)
            }
            Err(primary) => {
                let Some(fallback_dir) = &self.fallback_dir else {
                    return Err(primary);
                };
                warn!("Primary snapshot location failed: {:#}", primary);
                let path = write_file(fallback_dir, &file_name, &data)
                    .await
                    .context("Fallback snapshot location also failed")?;
                warn!("Saved stats to fallback location {}", path.display());
                Ok(path)
            }
        }
    }

    async fn load_previous(&self, before: NaiveDate) -> Result<Option<Snapshot>> {
        let Some((date, day_dir)) = self.previous_day_dir(before).await? else {
            debug!("No snapshot folder before {}", before);
            return Ok(None);
        };

        let Some(path) = latest_snapshot_file(&day_dir).await? else {
            warn!("No annotation stats CSV found in {}", day_dir.display());
            return Ok(None);
        };

        info!("Previous snapshot: {}", path.display());
        let data = fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let snapshot = Snapshot::from_csv(date, &data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::task_stats::tests::stats;
    use tempfile::TempDir;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(date: NaiveDate, h: u32, min: u32) -> NaiveDateTime {
        date.and_hms_opt(h, min, 0).unwrap()
    }

    #[test]
    fn test_csv_header_matches_column_names() {
        let snapshot = Snapshot::new(day(2026, 10, 16), vec![stats(1, 10, 20)]);
        let csv = String::from_utf8(snapshot.to_csv().unwrap()).unwrap();
        let header = csv.lines().next().unwrap();
        assert_eq!(
            header.split(',').collect::<Vec<_>>(),
            vec![
                "task_id",
                "job_id",
                "task_name",
                "frames",
                "assignee",
                "frames_annotated",
                "unique_obj_annotated",
                "total_obj_annotated",
                "last_modified",
            ]
        );
    }

    #[test]
    fn test_csv_unassigned_is_empty_field() {
        let mut row = stats(4, 1, 1);
        row.assignee = None;
        let snapshot = Snapshot::new(day(2026, 10, 16), vec![row.clone()]);
        let data = snapshot.to_csv().unwrap();

        let parsed = Snapshot::from_csv(snapshot.date, &data).unwrap();
        assert_eq!(parsed.rows, vec![row]);
    }

    #[test]
    fn test_from_csv_rejects_duplicate_task_ids() {
        let snapshot = Snapshot::new(day(2026, 10, 16), vec![stats(1, 10, 20), stats(1, 11, 21)]);
        let data = snapshot.to_csv().unwrap();
        assert!(Snapshot::from_csv(snapshot.date, &data).is_err());
    }

    #[test]
    fn test_from_csv_rejects_malformed_rows() {
        let data = b"task_id,task_name\nnot-a-number,foo\n";
        assert!(Snapshot::from_csv(day(2026, 10, 16), data).is_err());
    }

    #[test]
    fn test_parse_day_folder() {
        assert_eq!(parse_day_folder("20261016"), Some(day(2026, 10, 16)));
        assert_eq!(parse_day_folder("2026101"), None);
        assert_eq!(parse_day_folder("2026-10-16"), None);
        assert_eq!(parse_day_folder("20261399"), None);
    }

    #[tokio::test]
    async fn test_save_writes_dated_file() {
        let dir = TempDir::new().unwrap();
        let store = LocalSnapshotStore::new(dir.path().to_path_buf());
        let date = day(2026, 10, 17);
        let snapshot = Snapshot::new(date, vec![stats(1, 10, 20)]);

        let path = store.save("EUS", &snapshot, at(date, 7, 5)).await.unwrap();
        assert_eq!(
            path,
            dir.path()
                .join("20261017")
                .join("EUS_annotation_stats_20261017_0705.csv")
        );
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_save_falls_back_when_primary_fails() {
        let dir = TempDir::new().unwrap();
        // A regular file where the base directory should be makes the primary write fail
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();
        let fallback = dir.path().join("home");

        let store = LocalSnapshotStore::new(blocked).with_fallback_dir(Some(fallback.clone()));
        let date = day(2026, 10, 17);
        let path = store
            .save("EUS", &Snapshot::new(date, vec![]), at(date, 8, 0))
            .await
            .unwrap();
        assert_eq!(path, fallback.join("EUS_annotation_stats_20261017_0800.csv"));
    }

    #[tokio::test]
    async fn test_save_without_fallback_propagates() {
        let dir = TempDir::new().unwrap();
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();

        let store = LocalSnapshotStore::new(blocked);
        let date = day(2026, 10, 17);
        assert!(
            store
                .save("EUS", &Snapshot::new(date, vec![]), at(date, 8, 0))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_load_previous_picks_latest_earlier_day() {
        let dir = TempDir::new().unwrap();
        let store = LocalSnapshotStore::new(dir.path().to_path_buf());

        let history = [
            (day(2026, 10, 14), 1),
            (day(2026, 10, 16), 2),
            (day(2026, 10, 17), 3),
        ];
        for (date, task_id) in history {
            let snapshot = Snapshot::new(date, vec![stats(task_id, 5, 5)]);
            store.save("EUS", &snapshot, at(date, 9, 0)).await.unwrap();
        }
        std::fs::create_dir(dir.path().join("archive")).unwrap();

        let previous = store.load_previous(day(2026, 10, 17)).await.unwrap().unwrap();
        assert_eq!(previous.date, day(2026, 10, 16));
        assert_eq!(previous.rows[0].task_id, 2);
    }

    #[tokio::test]
    async fn test_load_previous_uses_latest_file_of_the_day() {
        let dir = TempDir::new().unwrap();
        let store = LocalSnapshotStore::new(dir.path().to_path_buf());
        let date = day(2026, 10, 16);

        store
            .save("EUS", &Snapshot::new(date, vec![stats(1, 1, 1)]), at(date, 8, 0))
            .await
            .unwrap();
        store
            .save("EUS", &Snapshot::new(date, vec![stats(1, 9, 9)]), at(date, 17, 30))
            .await
            .unwrap();

        let previous = store.load_previous(day(2026, 10, 17)).await.unwrap().unwrap();
        assert_eq!(previous.rows[0].annotated_frame_count, 9);
    }

    #[tokio::test]
    async fn test_load_previous_without_history() {
        let dir = TempDir::new().unwrap();
        let store = LocalSnapshotStore::new(dir.path().join("missing"));
        assert!(store.load_previous(day(2026, 10, 17)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_previous_folder_without_csv() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("20261016")).unwrap();
        std::fs::write(dir.path().join("20261016").join("notes.txt"), b"hi").unwrap();

        let store = LocalSnapshotStore::new(dir.path().to_path_buf());
        assert!(store.load_previous(day(2026, 10, 17)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_previous_malformed_is_error() {
        let dir = TempDir::new().unwrap();
        let day_dir = dir.path().join("20261016");
        std::fs::create_dir(&day_dir).unwrap();
        std::fs::write(day_dir.join("EUS_annotation_stats_20261016_0900.csv"), b"garbage\n1,2,3\n")
            .unwrap();

        let store = LocalSnapshotStore::new(dir.path().to_path_buf());
        assert!(store.load_previous(day(2026, 10, 17)).await.is_err());
    }
}
