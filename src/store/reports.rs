use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::domain::{Report, TestId};
use crate::error::StoreError;

/// Destination of finished reports.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Persists the report of `test_id`, replacing any earlier one.
    ///
    /// # Errors
    ///
    /// Returns an error when the report cannot be written.
    async fn persist_report(&self, test_id: &TestId, report: &Report) -> Result<(), StoreError>;

    /// Removes the report of `test_id`. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing report cannot be removed.
    async fn remove_report(&self, test_id: &TestId) -> Result<bool, StoreError>;
}

/// Writes `report_<test_id>.json` into a directory.
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    dir: PathBuf,
}

impl JsonReportSink {
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn report_path(&self, test_id: &TestId) -> PathBuf {
        self.dir.join(format!("report_{}.json", test_id))
    }
}

#[async_trait]
impl ReportSink for JsonReportSink {
    async fn persist_report(&self, test_id: &TestId, report: &Report) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StoreError::Io {
                context: "create reports directory",
                path: self.dir.clone(),
                source,
            })?;

        let body = serde_json::to_vec_pretty(report).map_err(|source| StoreError::Encode {
            context: "report",
            source,
        })?;
        let path = self.report_path(test_id);
        let staging = self.dir.join(format!(".report_{}.json.tmp", test_id));
        tokio::fs::write(&staging, body)
            .await
            .map_err(|source| StoreError::Io {
                context: "write report",
                path: staging.clone(),
                source,
            })?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|source| StoreError::Io {
                context: "publish report",
                path: path.clone(),
                source,
            })?;

        info!("Report for {} written to {}.", test_id, path.display());
        Ok(())
    }

    async fn remove_report(&self, test_id: &TestId) -> Result<bool, StoreError> {
        let path = self.report_path(test_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Removed report {}.", path.display());
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io {
                context: "remove report",
                path,
                source,
            }),
        }
    }
}

/// Reads a report artifact back.
///
/// # Errors
///
/// Returns an error when the file cannot be read or is not a report.
pub async fn read_report_file(path: &Path) -> Result<Report, StoreError> {
    let content = tokio::fs::read(path)
        .await
        .map_err(|source| StoreError::Io {
            context: "read report",
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_slice(&content).map_err(|err| StoreError::Corrupt {
        context: "report",
        detail: format!("{}: {}", path.display(), err),
    })
}
