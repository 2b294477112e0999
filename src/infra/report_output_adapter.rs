use crate::app::ports::ReportOutputPort;
use crate::error::Result;
use crate::pipeline::validation::QualityReport;
use std::path::{Path, PathBuf};
use tracing::info;

/// Writes the quality report as pretty-printed JSON, replacing any previous report.
pub struct FileReportOutputAdapter {
    file_path: PathBuf,
}

impl FileReportOutputAdapter {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        Self { file_path: file_path.as_ref().to_path_buf() }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

#[async_trait::async_trait]
impl ReportOutputPort for FileReportOutputAdapter {
    async fn write_report(&self, report: &QualityReport) -> Result<()> {
        if let Some(dir) = self.file_path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&self.file_path, json).await?;
        info!("Wrote quality report to {}", self.file_path.display());
        Ok(())
    }
}
