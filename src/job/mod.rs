//! Background file jobs: copy, download, move and self-update.
//!
//! A job runs to completion on one worker thread. Progress is shared through
//! [`JobProgress`] and the job is stopped cooperatively through its
//! [`CancellationToken`], checked between files.

mod cancel;
mod copy;
mod progress;
mod self_update;

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::{VfsError, VfsResult};

pub use cancel::CancellationToken;
pub use copy::{CollisionAction, CollisionPolicy, CollisionResolver, CopyJob, FileSet};
pub use progress::{JobError, JobOutcome, JobPhase, JobProgress, JobResult, TransferMode};
pub use self_update::{LoadError, ResidentCache, ResourceLoader, SelfUpdateJob};

pub trait Job: Send + 'static {
    fn progress(&self) -> Arc<JobProgress>;

    fn cancellation(&self) -> CancellationToken;

    /// Runs the job on the calling thread.
    fn execute(&self) -> JobResult;
}

/// A job running on its own thread.
#[derive(Debug)]
pub struct JobHandle {
    progress: Arc<JobProgress>,
    cancel: CancellationToken,
    thread: JoinHandle<JobResult>,
}

impl JobHandle {
    pub fn spawn<J: Job>(job: J) -> VfsResult<Self> {
        let progress = job.progress();
        let cancel = job.cancellation();
        let name = format!("{:?}-job", progress.mode()).to_lowercase();

        let thread = std::thread::Builder::new()
            .name(name)
            .spawn(move || job.execute())
            .map_err(|e| VfsError::access("job", e))?;

        Ok(Self {
            progress,
            cancel,
            thread,
        })
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> &Arc<JobProgress> {
        &self.progress
    }

    pub fn status_string(&self) -> String {
        self.progress.status_string()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the job. A job that panicked is reported as failed.
    pub fn join(self) -> JobResult {
        match self.thread.join() {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("Job thread panicked");
                self.progress.finish(JobOutcome::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{AbstractFile, FileRef, MemoryFileSystem};

    struct Panicking {
        progress: Arc<JobProgress>,
    }

    impl Job for Panicking {
        fn progress(&self) -> Arc<JobProgress> {
            Arc::clone(&self.progress)
        }

        fn cancellation(&self) -> CancellationToken {
            CancellationToken::new()
        }

        fn execute(&self) -> JobResult {
            panic!("boom");
        }
    }

    #[test]
    fn spawned_copy_runs_to_completion() {
        let src = MemoryFileSystem::new("src");
        for i in 0..20 {
            src.write_file(&format!("batch/file{}.txt", i), vec![b'x'; 1000]).unwrap();
        }
        let dst = MemoryFileSystem::new("dst");
        let batch: FileRef = Arc::new(src.file("batch"));

        let job = CopyJob::new(
            FileSet::single(batch),
            dst.root(),
            None,
            TransferMode::Copy,
            CollisionPolicy::Overwrite,
        );
        let handle = JobHandle::spawn(job).unwrap();
        let result = handle.join();

        assert_eq!(result.outcome, JobOutcome::Completed);
        assert_eq!(result.files_processed, 20);
        assert_eq!(result.bytes_transferred, 20_000);
        assert_eq!(dst.root().child("batch").unwrap().ls().unwrap().len(), 20);
    }

    #[test]
    fn cancelled_handle_reports_interrupted() {
        let src = MemoryFileSystem::new("src");
        src.write_file("a.txt", "a").unwrap();
        let dst = MemoryFileSystem::new("dst");
        let job = CopyJob::new(
            FileSet::new(None, vec![Arc::new(src.file("a.txt")) as FileRef]),
            dst.root(),
            None,
            TransferMode::Copy,
            CollisionPolicy::Overwrite,
        );
        job.cancellation().cancel();

        let handle = JobHandle::spawn(job).unwrap();
        handle.cancel();
        let result = handle.join();
        assert_eq!(result.outcome, JobOutcome::Interrupted);
        assert!(!dst.exists("a.txt"));
    }

    #[test]
    fn panicking_job_is_reported_as_failed() {
        let job = Panicking {
            progress: Arc::new(JobProgress::new(TransferMode::Copy)),
        };
        let handle = JobHandle::spawn(job).unwrap();
        let progress = Arc::clone(handle.progress());
        assert_eq!(handle.join().outcome, JobOutcome::Failed);
        assert_eq!(progress.status_string(), "Failed");
    }
}
