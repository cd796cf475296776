//! Job phase, counters and results.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use crate::error::VfsError;

/// How files travel to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    Copy,
    /// Remote to local copy.
    Download,
    /// Copy, then delete the source.
    Move,
}

impl TransferMode {
    fn verb(self) -> &'static str {
        match self {
            Self::Copy => "Copying",
            Self::Download => "Downloading",
            Self::Move => "Moving",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Pending,
    /// Self-update warm phase.
    Preparing,
    Transferring,
    Finished(JobOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    CompletedWithErrors,
    Interrupted,
    Failed,
}

impl JobOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "Completed",
            Self::CompletedWithErrors => "Completed with errors",
            Self::Interrupted => "Interrupted",
            Self::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobError {
    pub locator: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub outcome: JobOutcome,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub bytes_transferred: u64,
    pub errors: Vec<JobError>,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.outcome == JobOutcome::Completed
    }
}

/// Live progress, readable from any thread while the worker updates it.
#[derive(Debug)]
pub struct JobProgress {
    mode: TransferMode,
    phase: Mutex<JobPhase>,
    current_file: Mutex<Option<String>>,
    errors: Mutex<Vec<JobError>>,
    files_total: AtomicUsize,
    files_done: AtomicUsize,
    files_skipped: AtomicUsize,
    bytes_done: AtomicU64,
}

impl JobProgress {
    pub fn new(mode: TransferMode) -> Self {
        Self {
            mode,
            phase: Mutex::new(JobPhase::Pending),
            current_file: Mutex::new(None),
            errors: Mutex::new(Vec::new()),
            files_total: AtomicUsize::new(0),
            files_done: AtomicUsize::new(0),
            files_skipped: AtomicUsize::new(0),
            bytes_done: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    pub fn phase(&self) -> JobPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_phase(&self, phase: JobPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    pub fn current_file(&self) -> Option<String> {
        self.current_file
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn set_current_file(&self, name: &str) {
        *self.current_file.lock().unwrap_or_else(|e| e.into_inner()) = Some(name.to_string());
    }

    pub(crate) fn add_files_total(&self, count: usize) {
        self.files_total.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn file_done(&self) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn file_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes(&self, bytes: u64) {
        self.bytes_done.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self, locator: impl ToString, error: &VfsError) {
        let locator = locator.to_string();
        tracing::warn!("Job error on {}: {}", locator, error);
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(JobError {
                locator,
                message: error.to_string(),
            });
    }

    pub fn files_total(&self) -> usize {
        self.files_total.load(Ordering::Relaxed)
    }

    pub fn files_done(&self) -> usize {
        self.files_done.load(Ordering::Relaxed)
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Human-readable status, e.g. `Copying report.pdf (3/10)`.
    pub fn status_string(&self) -> String {
        match self.phase() {
            JobPhase::Pending => "Waiting...".to_string(),
            JobPhase::Preparing => "Preparing install...".to_string(),
            JobPhase::Transferring => {
                let done = self.files_done() + self.files_skipped.load(Ordering::Relaxed);
                let total = self.files_total();
                match self.current_file() {
                    Some(name) => format!(
                        "{} {} ({}/{})",
                        self.mode.verb(),
                        name,
                        (done + 1).min(total.max(1)),
                        total
                    ),
                    None => format!("{}...", self.mode.verb()),
                }
            }
            JobPhase::Finished(outcome) => outcome.as_str().to_string(),
        }
    }

    /// Seals the progress with `outcome` and builds the result.
    pub(crate) fn finish(&self, outcome: JobOutcome) -> JobResult {
        let errors = self
            .errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let outcome = match outcome {
            JobOutcome::Completed if !errors.is_empty() => JobOutcome::CompletedWithErrors,
            other => other,
        };
        self.set_phase(JobPhase::Finished(outcome));
        JobResult {
            outcome,
            files_processed: self.files_done(),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_done(),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_follows_phase() {
        let progress = JobProgress::new(TransferMode::Download);
        assert_eq!(progress.status_string(), "Waiting...");

        progress.set_phase(JobPhase::Preparing);
        assert_eq!(progress.status_string(), "Preparing install...");

        progress.set_phase(JobPhase::Transferring);
        progress.add_files_total(3);
        assert_eq!(progress.status_string(), "Downloading...");
        progress.set_current_file("muc.jar");
        assert_eq!(progress.status_string(), "Downloading muc.jar (1/3)");
        progress.file_done();
        assert_eq!(progress.status_string(), "Downloading muc.jar (2/3)");
    }

    #[test]
    fn errors_turn_completion_into_completed_with_errors() {
        let progress = JobProgress::new(TransferMode::Copy);
        progress.record_error("file:///a", &VfsError::not_found("file:///a"));
        let result = progress.finish(JobOutcome::Completed);
        assert_eq!(result.outcome, JobOutcome::CompletedWithErrors);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(progress.status_string(), "Completed with errors");

        let interrupted = JobProgress::new(TransferMode::Move).finish(JobOutcome::Interrupted);
        assert_eq!(interrupted.outcome, JobOutcome::Interrupted);
    }
}
