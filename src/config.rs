//! Configuration for the annotation report
//!
//! This module centralizes the tunable constants used throughout the
//! application together with the YAML configuration file that describes a
//! single reporting project.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// CVAT API Configuration
// ============================================================================

/// Page size used when listing tasks and jobs
pub const TASK_PAGE_SIZE: u32 = 100;

/// Page size used when listing project labels
pub const LABEL_PAGE_SIZE: u32 = 500;

/// Timeout for individual CVAT API requests
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Delay between polls of a pending dataset export request
pub const EXPORT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Number of polls before a dataset export is considered stuck (10 minutes)
pub const EXPORT_MAX_POLLS: u32 = 300;

// ============================================================================
// Snapshot Configuration
// ============================================================================

/// Marker every snapshot filename carries, used to find the prior snapshot
pub const SNAPSHOT_MARKER: &str = "_annotation_stats_";

/// Date format of the per-day snapshot and annotation folders
pub const DATE_FOLDER_FORMAT: &str = "%Y%m%d";

/// Date-time format embedded in snapshot filenames
pub const SNAPSHOT_TIME_FORMAT: &str = "%Y%m%d_%H%M";

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

// ============================================================================
// Report Configuration File
// ============================================================================

/// Connection and project parameters for the CVAT server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvatParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Export format name as CVAT lists it, e.g. "Datumaro 1.0"
    pub annotation_format: String,
    pub project_id: u64,
    pub project_name: String,
    #[serde(default)]
    pub task_ids_to_skip: Vec<u64>,
}

impl CvatParams {
    /// Task ids excluded from fetching and comparison
    pub fn skipped_task_ids(&self) -> HashSet<u64> {
        self.task_ids_to_skip.iter().copied().collect()
    }
}

/// SMTP delivery parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailParams {
    pub smtp_server: String,
    pub port: u16,
    pub sender: String,
    pub destination: String,
    #[serde(default)]
    pub cc: Vec<String>,
    pub username: String,
    pub password: String,
}

impl EmailParams {
    /// Destination followed by every cc address
    pub fn recipients(&self) -> Vec<&str> {
        std::iter::once(self.destination.as_str())
            .chain(self.cc.iter().map(String::as_str))
            .collect()
    }
}

/// Complete configuration of one reporting project
///
/// Loaded once at startup and passed by reference to every stage of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Parent directory of the dated snapshot folders
    pub proj_dir: PathBuf,
    /// Parent directory of the dated annotation archive folders
    pub annotations_dir: PathBuf,
    pub cvat: CvatParams,
    pub email_params: EmailParams,
}

impl ReportConfig {
    /// Read and validate a YAML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Invalid configuration file {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ReportConfig =
            serde_yaml::from_str(yaml).context("Failed to parse configuration YAML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("cvat.host", &self.cvat.host),
            ("cvat.project_name", &self.cvat.project_name),
            ("cvat.annotation_format", &self.cvat.annotation_format),
            ("email_params.smtp_server", &self.email_params.smtp_server),
            ("email_params.sender", &self.email_params.sender),
            ("email_params.destination", &self.email_params.destination),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                anyhow::bail!("Configuration field '{}' must not be empty", name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE_YAML: &str = r#"
proj_dir: /data/reports
annotations_dir: /data/annotations
cvat:
  host: http://cvat.internal
  port: 8080
  username: reporter
  password: secret
  annotation_format: Datumaro 1.0
  project_id: 7
  project_name: EUS
  task_ids_to_skip: [3, 11]
email_params:
  smtp_server: smtp.example.com
  port: 587
  sender: reports@example.com
  destination: team@example.com
  cc:
    - lead@example.com
    - qa@example.com
  username: reports
  password: hunter2
"#;

    #[test]
    fn test_parse_full_config() {
        let config = ReportConfig::from_yaml(SAMPLE_YAML).unwrap();
        assert_eq!(config.proj_dir, PathBuf::from("/data/reports"));
        assert_eq!(config.cvat.port, 8080);
        assert_eq!(config.cvat.project_id, 7);
        assert_eq!(config.cvat.skipped_task_ids(), HashSet::from([3, 11]));
        assert_eq!(
            config.email_params.recipients(),
            vec!["team@example.com", "lead@example.com", "qa@example.com"]
        );
    }

    #[test]
    fn test_optional_lists_default_to_empty() {
        let yaml = SAMPLE_YAML
            .replace("  task_ids_to_skip: [3, 11]\n", "")
            .replace(
                "  cc:\n    - lead@example.com\n    - qa@example.com\n",
                "",
            );
        let config = ReportConfig::from_yaml(&yaml).unwrap();
        assert!(config.cvat.task_ids_to_skip.is_empty());
        assert!(config.email_params.cc.is_empty());
        assert_eq!(config.email_params.recipients(), vec!["team@example.com"]);
    }

    #[test]
    fn test_empty_required_field_rejected() {
        let yaml = SAMPLE_YAML.replace("project_name: EUS", "project_name: \"\"");
        let err = ReportConfig::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("cvat.project_name"));
    }

    #[test]
    fn test_missing_section_rejected() {
        let yaml = "proj_dir: /tmp\nannotations_dir: /tmp\n";
        assert!(ReportConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = ReportConfig::load("/nonexistent/config.yaml").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read configuration file"));
    }
}
