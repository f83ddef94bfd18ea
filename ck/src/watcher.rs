//! Source watcher
//!
//! Polls a model file and resubmits it to the kernel whenever its content
//! changes. A new submission supersedes whatever pass is still in flight, so
//! rapid edits only ever produce results for the latest content.

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use tracing::{debug, error, info};

use crate::domain::{Parameters, SourceFile};
use crate::pipeline::KernelHandle;

/// Default interval between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Watches one source file and drives compute passes on change
pub struct SourceWatcher {
    handle: KernelHandle,
    path: PathBuf,
    filename: String,
    overrides: Parameters,
    interval: Duration,
    last_content: Option<Vec<u8>>,
}

impl SourceWatcher {
    /// `path` is read from disk; `filename` is the name engines see
    pub fn new(handle: KernelHandle, path: PathBuf, filename: impl Into<String>, overrides: Parameters) -> Self {
        Self {
            handle,
            path,
            filename: filename.into(),
            overrides,
            interval: DEFAULT_POLL_INTERVAL,
            last_content: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Read the file and submit it if it differs from the last submission
    ///
    /// Returns true when a compute was submitted.
    pub async fn check_once(&mut self) -> Result<bool> {
        debug!(path = %self.path.display(), "SourceWatcher::check_once: called");
        let content = tokio::fs::read(&self.path)
            .await
            .context(format!("Failed to read {}", self.path.display()))?;

        if self.last_content.as_deref() == Some(content.as_slice()) {
            debug!("SourceWatcher::check_once: unchanged");
            return Ok(false);
        }

        info!(filename = %self.filename, bytes = content.len(), "Source changed, submitting compute");
        let file = SourceFile::new(self.filename.clone(), content.clone());
        self.handle.compute(file, self.overrides.clone()).await?;
        self.last_content = Some(content);
        Ok(true)
    }

    /// Poll until the kernel stops
    pub async fn run(mut self) -> Result<()> {
        info!(
            path = %self.path.display(),
            interval_ms = self.interval.as_millis() as u64,
            "SourceWatcher started"
        );

        loop {
            if self.handle.is_closed() {
                info!("Kernel stopped, watcher exiting");
                return Ok(());
            }

            if let Err(e) = self.check_once().await {
                error!(error = %e, "Error checking source file");
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}
