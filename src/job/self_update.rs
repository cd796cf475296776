//! Replaces the installed application archive with a downloaded one.
//!
//! The job is a forced download-and-overwrite of the installed archive. Before
//! the archive is touched, every preloadable entry of the installed archive is
//! handed to a [`ResourceLoader`] so the running process keeps what it still
//! needs once the file on disk changes. A fatal load failure stops the job
//! before anything is written.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::error::{VfsError, VfsResult};
use crate::platform::Relauncher;
use crate::vfs::archive::archive_locator_for;
use crate::vfs::{read_all, FileRef, ProtocolRegistry};

use super::cancel::CancellationToken;
use super::copy::{CollisionPolicy, CopyJob, FileSet};
use super::progress::{JobOutcome, JobPhase, JobProgress, JobResult, TransferMode};
use super::Job;

const DEFAULT_PRELOAD_EXTENSION: &str = "class";

#[derive(Error, Debug)]
pub enum LoadError {
    /// The entry cannot be resolved (missing dependency); it is skipped.
    #[error("unresolved: {0}")]
    Unresolved(String),

    /// Loading cannot go on; the update is aborted.
    #[error("{0}")]
    Fatal(String),
}

/// Receives the archive entries to keep resident, by dotted resource name
/// (`com/example/Main.class` is `com.example.Main`).
pub trait ResourceLoader: Send + Sync {
    fn load(&self, name: &str, data: &[u8]) -> Result<(), LoadError>;
}

/// Keeps loaded entries in memory.
#[derive(Debug, Default)]
pub struct ResidentCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl ResidentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }
}

impl ResourceLoader for ResidentCache {
    fn load(&self, name: &str, data: &[u8]) -> Result<(), LoadError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), data.to_vec());
        Ok(())
    }
}

pub struct SelfUpdateJob {
    installed: FileRef,
    registry: Arc<ProtocolRegistry>,
    relauncher: Arc<dyn Relauncher>,
    loader: Arc<dyn ResourceLoader>,
    preload_extension: String,
    copy: CopyJob,
}

impl std::fmt::Debug for SelfUpdateJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfUpdateJob")
            .field("installed", &self.installed.locator().to_string())
            .field("preload_extension", &self.preload_extension)
            .finish()
    }
}

impl SelfUpdateJob {
    /// `source` is the new archive, `installed` the archive it replaces.
    pub fn new(
        source: FileRef,
        installed: FileRef,
        registry: Arc<ProtocolRegistry>,
        relauncher: Arc<dyn Relauncher>,
    ) -> VfsResult<Self> {
        let folder = installed
            .parent()
            .ok_or_else(|| VfsError::not_a_directory(installed.locator()))?;
        let copy = CopyJob::new(
            FileSet::new(source.parent(), vec![source]),
            folder,
            Some(installed.name()),
            TransferMode::Download,
            CollisionPolicy::Overwrite,
        );

        Ok(Self {
            installed,
            registry,
            relauncher,
            loader: Arc::new(ResidentCache::new()),
            preload_extension: DEFAULT_PRELOAD_EXTENSION.to_string(),
            copy,
        })
    }

    pub fn with_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_preload_extension(mut self, extension: impl Into<String>) -> Self {
        self.preload_extension = extension.into();
        self
    }

    pub fn execute(&self) -> JobResult {
        let progress = self.copy.progress();
        progress.set_phase(JobPhase::Preparing);

        if let Err(e) = self.preload() {
            progress.record_error(self.installed.locator(), &e);
            return progress.finish(JobOutcome::Interrupted);
        }
        if self.copy.cancellation().is_cancelled() {
            return progress.finish(JobOutcome::Interrupted);
        }

        let result = self.copy.execute();
        if result.outcome == JobOutcome::Completed {
            if let Some(path) = self.installed.local_path() {
                if let Err(e) = self.relauncher.relaunch(&path) {
                    tracing::error!("Failed to relaunch {}: {}", path.display(), e);
                }
            }
            self.relauncher.shutdown();
        }
        result
    }

    /// Loads every preloadable entry of the installed archive.
    fn preload(&self) -> VfsResult<()> {
        let path = self.installed.local_path().ok_or_else(|| VfsError::ClassLoad {
            resource: self.installed.locator().to_string(),
            reason: "installed archive is not on a local filesystem".to_string(),
        })?;
        let root_locator = archive_locator_for(&path);
        let root = self.registry.get_file(&root_locator).map_err(|e| class_load(&root_locator, e))?;
        let entries = root.ls().map_err(|e| class_load(&root_locator, e))?;

        let skip = root_locator.segments().len();
        let mut stack = vec![entries.into_iter()];
        let mut loaded = 0usize;

        while let Some(iter) = stack.last_mut() {
            let Some(entry) = iter.next() else {
                stack.pop();
                continue;
            };
            if self.copy.cancellation().is_cancelled() {
                return Err(VfsError::Cancelled);
            }

            let is_dir = entry.attributes().map(|a| a.is_dir()).unwrap_or(false);
            if is_dir {
                match entry.ls() {
                    Ok(children) => stack.push(children.into_iter()),
                    Err(e) => tracing::warn!("Cannot list {}: {}", entry.locator(), e),
                }
                continue;
            }

            let wanted = entry
                .locator()
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case(&self.preload_extension))
                .unwrap_or(false);
            if !wanted {
                continue;
            }

            let name = resource_name(&entry.locator().segments()[skip..]);
            let data = match read_all(entry.as_ref()) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!("Skipping unreadable {}: {}", name, e);
                    continue;
                }
            };
            match self.loader.load(&name, &data) {
                Ok(()) => loaded += 1,
                Err(LoadError::Unresolved(reason)) => {
                    tracing::debug!("Skipping {}: {}", name, reason);
                }
                Err(LoadError::Fatal(reason)) => {
                    return Err(VfsError::ClassLoad {
                        resource: name,
                        reason,
                    })
                }
            }
        }

        tracing::info!("Preloaded {} entries from {}", loaded, path.display());
        Ok(())
    }
}

impl Job for SelfUpdateJob {
    fn progress(&self) -> Arc<JobProgress> {
        self.copy.progress()
    }

    fn cancellation(&self) -> CancellationToken {
        self.copy.cancellation()
    }

    fn execute(&self) -> JobResult {
        SelfUpdateJob::execute(self)
    }
}

fn class_load(locator: impl ToString, error: VfsError) -> VfsError {
    VfsError::ClassLoad {
        resource: locator.to_string(),
        reason: error.to_string(),
    }
}

/// Inner path segments joined with dots, without the file extension.
fn resource_name(segments: &[String]) -> String {
    let mut parts: Vec<&str> = segments.iter().map(String::as_str).collect();
    if let Some(last) = parts.last_mut() {
        if let Some((stem, _)) = last.rsplit_once('.') {
            if !stem.is_empty() {
                *last = stem;
            }
        }
    }
    parts.join(".")
}
