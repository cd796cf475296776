//! Copy, download and move jobs.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{VfsError, VfsResult};
use crate::vfs::{AbstractFile, FileRef};

use super::cancel::CancellationToken;
use super::progress::{JobOutcome, JobPhase, JobProgress, JobResult, TransferMode};
use super::Job;

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Files to transfer, optionally with the folder they were selected in.
#[derive(Debug, Clone, Default)]
pub struct FileSet {
    pub base_folder: Option<FileRef>,
    pub files: Vec<FileRef>,
}

impl FileSet {
    pub fn new(base_folder: Option<FileRef>, files: Vec<FileRef>) -> Self {
        Self { base_folder, files }
    }

    pub fn single(file: FileRef) -> Self {
        Self {
            base_folder: file.parent(),
            files: vec![file],
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// What to do when the destination already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionPolicy {
    Overwrite,
    /// Overwrite only when the destination is older than the source.
    OverwriteIfOlder,
    Skip,
    /// Write under the first free `name (n).ext`.
    Rename,
    /// Defer to the job's [`CollisionResolver`].
    Ask,
    /// Append the part of the source the destination is missing.
    Resume,
}

/// Decision returned by a [`CollisionResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionAction {
    Overwrite,
    Skip,
    Rename,
    Resume,
    /// Stop the whole job.
    Cancel,
}

/// Asked for a decision when the policy is [`CollisionPolicy::Ask`].
pub trait CollisionResolver: Send + Sync {
    fn resolve(&self, source: &dyn AbstractFile, destination: &dyn AbstractFile) -> CollisionAction;
}

/// Copies a [`FileSet`] into a destination folder.
///
/// Folders are copied recursively and merged into existing ones. Errors on a
/// single file or subtree are recorded and the job goes on; failing to reach
/// the destination folder fails the job.
pub struct CopyJob {
    files: FileSet,
    destination_folder: FileRef,
    destination_name: Option<String>,
    mode: TransferMode,
    policy: CollisionPolicy,
    resolver: Option<Arc<dyn CollisionResolver>>,
    buffer_size: usize,
    progress: Arc<JobProgress>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for CopyJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyJob")
            .field("files", &self.files.len())
            .field("destination", &self.destination_folder.locator().to_string())
            .field("mode", &self.mode)
            .field("policy", &self.policy)
            .finish()
    }
}

enum Decision {
    Write,
    Replace,
    Append,
    Skip,
}

impl CopyJob {
    /// `destination_name` renames the file when the set holds a single file.
    pub fn new(
        files: FileSet,
        destination_folder: FileRef,
        destination_name: Option<String>,
        mode: TransferMode,
        policy: CollisionPolicy,
    ) -> Self {
        Self {
            files,
            destination_folder,
            destination_name,
            mode,
            policy,
            resolver: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            progress: Arc::new(JobProgress::new(mode)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn CollisionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    pub fn destination_folder(&self) -> &FileRef {
        &self.destination_folder
    }

    /// Transfers every file. Runs on the calling thread.
    pub fn execute(&self) -> JobResult {
        self.progress.set_phase(JobPhase::Transferring);
        self.progress.add_files_total(self.files.len());

        if !self.destination_folder.exists() {
            if let Err(e) = self.destination_folder.mkdir() {
                self.progress.record_error(self.destination_folder.locator(), &e);
                return self.progress.finish(JobOutcome::Failed);
            }
        } else if !self.destination_folder.is_browsable() {
            let error = VfsError::not_a_directory(self.destination_folder.locator());
            self.progress.record_error(self.destination_folder.locator(), &error);
            return self.progress.finish(JobOutcome::Failed);
        }

        let rename_single = self.files.len() == 1;
        for file in &self.files.files {
            if self.cancel.is_cancelled() {
                return self.progress.finish(JobOutcome::Interrupted);
            }
            let name = match (&self.destination_name, rename_single) {
                (Some(name), true) => name.clone(),
                _ => file.name(),
            };
            match self.transfer(file, &self.destination_folder, &name) {
                Ok(_) => {}
                Err(VfsError::Cancelled) => return self.progress.finish(JobOutcome::Interrupted),
                Err(e) => self.progress.record_error(file.locator(), &e),
            }
        }

        let outcome = if self.cancel.is_cancelled() {
            JobOutcome::Interrupted
        } else {
            JobOutcome::Completed
        };
        self.progress.finish(outcome)
    }

    /// Transfers one file or folder. Returns whether all of `source` made it
    /// across; a skipped file or a failure anywhere below a folder is `false`.
    fn transfer(&self, source: &FileRef, folder: &FileRef, name: &str) -> VfsResult<bool> {
        if self.cancel.is_cancelled() {
            return Err(VfsError::Cancelled);
        }
        if source.attributes()?.is_dir() {
            return self.transfer_folder(source, folder, name);
        }

        self.progress.set_current_file(name);
        let target = folder.child(name)?;
        let (target, decision) = if target.exists() {
            self.on_collision(source, folder, target)?
        } else {
            (target, Decision::Write)
        };

        match decision {
            Decision::Skip => {
                tracing::debug!("Skipping {}", source.locator());
                self.progress.file_skipped();
                return Ok(false);
            }
            Decision::Write => {
                if self.mode == TransferMode::Move && source.rename_to(target.as_ref()).is_ok() {
                    self.progress.add_bytes(source_size(target.as_ref()));
                    self.progress.file_done();
                    return Ok(true);
                }
                let reader = source.open_read()?;
                let mut writer = target.open_write()?;
                self.pump(source.as_ref(), reader, 0, writer.as_mut(), target.as_ref())?;
            }
            Decision::Replace => self.replace(source, folder, &target)?,
            Decision::Append => {
                let existing = target.size();
                let reader = source.open_read()?;
                let mut writer = target.open_append()?;
                self.pump(source.as_ref(), reader, existing, writer.as_mut(), target.as_ref())?;
            }
        }

        if self.mode == TransferMode::Move {
            source.delete()?;
        }
        self.progress.file_done();
        Ok(true)
    }

    fn transfer_folder(&self, source: &FileRef, folder: &FileRef, name: &str) -> VfsResult<bool> {
        let target = folder.child(name)?;
        if target.locator().starts_with(source.locator()) {
            return Err(VfsError::unsupported(
                "copying a folder into itself",
                target.locator(),
            ));
        }
        if target.exists() {
            if !target.is_browsable() {
                return Err(VfsError::AlreadyExists(target.locator().to_string()));
            }
        } else {
            if self.mode == TransferMode::Move && source.rename_to(target.as_ref()).is_ok() {
                return Ok(true);
            }
            target.mkdir()?;
        }

        let children = source.ls()?;
        self.progress.add_files_total(
            children
                .iter()
                .filter(|child| !child.is_browsable())
                .count(),
        );

        let mut complete = true;
        for child in &children {
            match self.transfer(child, &target, &child.name()) {
                Ok(moved) => complete &= moved,
                Err(VfsError::Cancelled) => return Err(VfsError::Cancelled),
                Err(e) => {
                    self.progress.record_error(child.locator(), &e);
                    complete = false;
                }
            }
        }

        // A moved folder is removed only once everything below it made it across.
        if self.mode == TransferMode::Move && complete {
            source.delete()?;
        }
        Ok(complete)
    }

    fn on_collision(
        &self,
        source: &FileRef,
        folder: &FileRef,
        target: FileRef,
    ) -> VfsResult<(FileRef, Decision)> {
        let action = match self.policy {
            CollisionPolicy::Overwrite => CollisionAction::Overwrite,
            CollisionPolicy::Skip => CollisionAction::Skip,
            CollisionPolicy::Rename => CollisionAction::Rename,
            CollisionPolicy::Resume => CollisionAction::Resume,
            CollisionPolicy::OverwriteIfOlder => {
                if modified(target.as_ref()) < modified(source.as_ref()) {
                    CollisionAction::Overwrite
                } else {
                    CollisionAction::Skip
                }
            }
            CollisionPolicy::Ask => match &self.resolver {
                Some(resolver) => resolver.resolve(source.as_ref(), target.as_ref()),
                None => {
                    return Err(VfsError::Collision {
                        source_locator: source.locator().to_string(),
                        destination: target.locator().to_string(),
                    })
                }
            },
        };

        match action {
            CollisionAction::Overwrite => Ok((target, Decision::Replace)),
            CollisionAction::Skip => Ok((target, Decision::Skip)),
            CollisionAction::Rename => {
                let renamed = free_name(folder, &target.name())?;
                Ok((renamed, Decision::Write))
            }
            CollisionAction::Resume => {
                if target.size() >= source.size() {
                    Ok((target, Decision::Skip))
                } else {
                    Ok((target, Decision::Append))
                }
            }
            CollisionAction::Cancel => {
                self.cancel.cancel();
                Err(VfsError::Cancelled)
            }
        }
    }

    /// Writes to a temporary sibling, then renames it over `target`.
    fn replace(&self, source: &FileRef, folder: &FileRef, target: &FileRef) -> VfsResult<()> {
        let reader = source.open_read()?;
        let temp = folder.child(&format!(
            "{}.tmp-{}",
            target.name(),
            uuid::Uuid::new_v4()
        ))?;

        let written = temp.open_write().and_then(|mut writer| {
            self.pump(source.as_ref(), reader, 0, writer.as_mut(), temp.as_ref())
        });
        if let Err(e) = written {
            let _ = temp.delete();
            return Err(e);
        }

        if let Err(e) = temp.rename_to(target.as_ref()) {
            let _ = temp.delete();
            return Err(e);
        }
        Ok(())
    }

    /// Streams `source` into `writer`, skipping the first `offset` bytes.
    fn pump(
        &self,
        source: &dyn AbstractFile,
        mut reader: Box<dyn Read + Send>,
        offset: u64,
        writer: &mut dyn Write,
        target: &dyn AbstractFile,
    ) -> VfsResult<()> {
        if offset > 0 {
            io::copy(&mut reader.by_ref().take(offset), &mut io::sink())
                .map_err(|e| VfsError::access(source.locator(), e))?;
        }

        let mut buffer = vec![0u8; self.buffer_size];
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(VfsError::access(source.locator(), e)),
            };
            writer
                .write_all(&buffer[..read])
                .map_err(|e| VfsError::access(target.locator(), e))?;
            self.progress.add_bytes(read as u64);
        }
        writer
            .flush()
            .map_err(|e| VfsError::access(target.locator(), e))
    }
}

impl Job for CopyJob {
    fn progress(&self) -> Arc<JobProgress> {
        Arc::clone(&self.progress)
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn execute(&self) -> JobResult {
        CopyJob::execute(self)
    }
}

fn modified(file: &dyn AbstractFile) -> SystemTime {
    file.attributes()
        .ok()
        .and_then(|attrs| attrs.modified)
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn source_size(file: &dyn AbstractFile) -> u64 {
    file.attributes().map(|attrs| attrs.size).unwrap_or(0)
}

/// First `stem (n).ext` in `folder` that does not exist yet.
fn free_name(folder: &FileRef, name: &str) -> VfsResult<FileRef> {
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    let mut n = 1u64;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        let file = folder.child(&candidate)?;
        if !file.exists() {
            return Ok(file);
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{LocalFile, MemoryFileSystem};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn copy(
        files: Vec<FileRef>,
        destination: FileRef,
        mode: TransferMode,
        policy: CollisionPolicy,
    ) -> CopyJob {
        CopyJob::new(FileSet::new(None, files), destination, None, mode, policy)
    }

    fn mem(fs: &Arc<MemoryFileSystem>, path: &str) -> FileRef {
        Arc::new(fs.file(path))
    }

    fn local(path: impl AsRef<std::path::Path>) -> FileRef {
        Arc::new(LocalFile::new(path))
    }

    #[test]
    fn copies_files_and_folders_recursively() {
        let src = MemoryFileSystem::new("src");
        src.write_file("docs/a.txt", "alpha").unwrap();
        src.write_file("docs/sub/b.txt", "beta").unwrap();
        src.write_file("top.txt", "top").unwrap();
        let dst = MemoryFileSystem::new("dst");

        let job = copy(
            vec![mem(&src, "docs"), mem(&src, "top.txt")],
            dst.root(),
            TransferMode::Copy,
            CollisionPolicy::Overwrite,
        );
        let result = job.execute();
        assert_eq!(result.outcome, JobOutcome::Completed);
        assert_eq!(result.files_processed, 3);
        assert_eq!(result.bytes_transferred, 12);
        assert_eq!(dst.contents("docs/sub/b.txt").unwrap(), b"beta");
        assert_eq!(dst.contents("top.txt").unwrap(), b"top");
        assert!(src.exists("docs/a.txt"));
    }

    #[test]
    fn downloads_from_memory_to_local_disk() {
        let remote = MemoryFileSystem::new("remote");
        remote.write_file("pub/release.bin", vec![7u8; 200_000]).unwrap();
        let temp = TempDir::new().unwrap();

        let job = CopyJob::new(
            FileSet::single(mem(&remote, "pub/release.bin")),
            local(temp.path()),
            Some("local.bin".to_string()),
            TransferMode::Download,
            CollisionPolicy::Overwrite,
        )
        .with_buffer_size(4096);
        let result = job.execute();
        assert!(result.is_success());
        assert_eq!(std::fs::read(temp.path().join("local.bin")).unwrap().len(), 200_000);
    }

    #[test]
    fn overwrite_replaces_through_temp_sibling() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), "new content").unwrap();
        let dest_dir = temp.path().join("dest");
        std::fs::create_dir(&dest_dir).unwrap();
        std::fs::write(dest_dir.join("a.txt"), "old").unwrap();

        let job = copy(
            vec![local(temp.path().join("a.txt"))],
            local(&dest_dir),
            TransferMode::Copy,
            CollisionPolicy::Overwrite,
        );
        assert!(job.execute().is_success());
        assert_eq!(std::fs::read_to_string(dest_dir.join("a.txt")).unwrap(), "new content");
        // No temp file left behind.
        assert_eq!(std::fs::read_dir(&dest_dir).unwrap().count(), 1);
    }

    #[test]
    fn skip_and_rename_policies() {
        let src = MemoryFileSystem::new("src");
        src.write_file("a.txt", "fresh").unwrap();
        let dst = MemoryFileSystem::new("dst");
        dst.write_file("a.txt", "kept").unwrap();
        dst.write_file("a (1).txt", "taken").unwrap();

        let skip = copy(vec![mem(&src, "a.txt")], dst.root(), TransferMode::Copy, CollisionPolicy::Skip);
        let result = skip.execute();
        assert_eq!(result.files_skipped, 1);
        assert_eq!(dst.contents("a.txt").unwrap(), b"kept");

        let rename = copy(vec![mem(&src, "a.txt")], dst.root(), TransferMode::Copy, CollisionPolicy::Rename);
        assert!(rename.execute().is_success());
        assert_eq!(dst.contents("a.txt").unwrap(), b"kept");
        assert_eq!(dst.contents("a (2).txt").unwrap(), b"fresh");
    }

    #[test]
    fn overwrite_if_older_compares_timestamps() {
        let src = MemoryFileSystem::new("src");
        src.write_file("new.txt", "newer source").unwrap();
        src.write_file("old.txt", "older source").unwrap();
        let dst = MemoryFileSystem::new("dst");
        dst.write_file("new.txt", "stale").unwrap();
        dst.write_file("old.txt", "current").unwrap();

        let base = SystemTime::now();
        src.set_modified("new.txt", base).unwrap();
        dst.set_modified("new.txt", base - Duration::from_secs(60)).unwrap();
        src.set_modified("old.txt", base - Duration::from_secs(60)).unwrap();
        dst.set_modified("old.txt", base).unwrap();

        let job = copy(
            vec![mem(&src, "new.txt"), mem(&src, "old.txt")],
            dst.root(),
            TransferMode::Copy,
            CollisionPolicy::OverwriteIfOlder,
        );
        let result = job.execute();
        assert_eq!(result.files_processed, 1);
        assert_eq!(result.files_skipped, 1);
        assert_eq!(dst.contents("new.txt").unwrap(), b"newer source");
        assert_eq!(dst.contents("old.txt").unwrap(), b"current");
    }

    #[test]
    fn resume_appends_only_the_missing_tail() {
        let src = MemoryFileSystem::new("src");
        src.write_file("big.bin", "0123456789").unwrap();
        let dst = MemoryFileSystem::new("dst");
        dst.write_file("big.bin", "0123").unwrap();

        let job = copy(vec![mem(&src, "big.bin")], dst.root(), TransferMode::Download, CollisionPolicy::Resume);
        let result = job.execute();
        assert!(result.is_success());
        assert_eq!(result.bytes_transferred, 6);
        assert_eq!(dst.contents("big.bin").unwrap(), b"0123456789");

        // Already complete: nothing to do.
        let again = copy(vec![mem(&src, "big.bin")], dst.root(), TransferMode::Download, CollisionPolicy::Resume);
        assert_eq!(again.execute().files_skipped, 1);
    }

    #[test]
    fn ask_without_resolver_fails_that_file_only() {
        let src = MemoryFileSystem::new("src");
        src.write_file("clash.txt", "src").unwrap();
        src.write_file("free.txt", "free").unwrap();
        let dst = MemoryFileSystem::new("dst");
        dst.write_file("clash.txt", "dst").unwrap();

        let job = copy(
            vec![mem(&src, "clash.txt"), mem(&src, "free.txt")],
            dst.root(),
            TransferMode::Copy,
            CollisionPolicy::Ask,
        );
        let result = job.execute();
        assert_eq!(result.outcome, JobOutcome::CompletedWithErrors);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("already exists"));
        assert_eq!(dst.contents("clash.txt").unwrap(), b"dst");
        assert_eq!(dst.contents("free.txt").unwrap(), b"free");
    }

    struct Scripted {
        answers: Mutex<Vec<CollisionAction>>,
        asked: Mutex<Vec<String>>,
    }

    impl CollisionResolver for Scripted {
        fn resolve(&self, source: &dyn AbstractFile, _destination: &dyn AbstractFile) -> CollisionAction {
            self.asked.lock().unwrap().push(source.name());
            self.answers.lock().unwrap().remove(0)
        }
    }

    #[test]
    fn ask_delegates_to_resolver_and_cancel_interrupts() {
        let src = MemoryFileSystem::new("src");
        src.write_file("a.txt", "A").unwrap();
        src.write_file("b.txt", "B").unwrap();
        src.write_file("c.txt", "C").unwrap();
        let dst = MemoryFileSystem::new("dst");
        dst.write_file("a.txt", "old a").unwrap();
        dst.write_file("b.txt", "old b").unwrap();
        dst.write_file("c.txt", "old c").unwrap();

        let resolver = Arc::new(Scripted {
            answers: Mutex::new(vec![CollisionAction::Overwrite, CollisionAction::Cancel]),
            asked: Mutex::new(Vec::new()),
        });
        let job = copy(
            vec![mem(&src, "a.txt"), mem(&src, "b.txt"), mem(&src, "c.txt")],
            dst.root(),
            TransferMode::Copy,
            CollisionPolicy::Ask,
        )
        .with_resolver(resolver.clone());

        let result = job.execute();
        assert_eq!(result.outcome, JobOutcome::Interrupted);
        assert_eq!(*resolver.asked.lock().unwrap(), vec!["a.txt", "b.txt"]);
        assert_eq!(dst.contents("a.txt").unwrap(), b"A");
        assert_eq!(dst.contents("b.txt").unwrap(), b"old b");
        assert_eq!(dst.contents("c.txt").unwrap(), b"old c");
    }

    #[test]
    fn move_deletes_sources() {
        let temp = TempDir::new().unwrap();
        let src_dir = temp.path().join("src");
        std::fs::create_dir_all(src_dir.join("nested")).unwrap();
        std::fs::write(src_dir.join("nested/n.txt"), "n").unwrap();
        std::fs::write(src_dir.join("f.txt"), "f").unwrap();

        let remote = MemoryFileSystem::new("remote");
        remote.write_file("r.txt", "r").unwrap();

        let dest = temp.path().join("dest");
        let job = copy(
            vec![
                local(src_dir.join("nested")),
                local(src_dir.join("f.txt")),
                mem(&remote, "r.txt"),
            ],
            local(&dest),
            TransferMode::Move,
            CollisionPolicy::Overwrite,
        );
        let result = job.execute();
        assert!(result.is_success(), "{:?}", result.errors);
        assert!(dest.join("nested/n.txt").is_file());
        assert!(dest.join("f.txt").is_file());
        assert_eq!(std::fs::read_to_string(dest.join("r.txt")).unwrap(), "r");
        assert!(!src_dir.join("nested").exists());
        assert!(!src_dir.join("f.txt").exists());
        assert!(!remote.exists("r.txt"));
    }

    #[test]
    fn move_keeps_folders_holding_files_that_failed_deep_down() {
        let src = MemoryFileSystem::new("src");
        src.write_file("a/top.txt", "top").unwrap();
        src.write_file("a/b/good.txt", "good").unwrap();
        src.write_file("a/b/bad.txt", "bad").unwrap();
        src.set_unreadable("a/b/bad.txt", true).unwrap();
        let dst = MemoryFileSystem::new("dst");

        let job = copy(vec![mem(&src, "a")], dst.root(), TransferMode::Move, CollisionPolicy::Overwrite);
        let result = job.execute();
        assert_eq!(result.outcome, JobOutcome::CompletedWithErrors);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].locator, "mem://src/a/b/bad.txt");

        assert!(src.exists("a/b/bad.txt"));
        assert!(!src.exists("a/b/good.txt"));
        assert!(!src.exists("a/top.txt"));
        assert_eq!(dst.contents("a/b/good.txt").unwrap(), b"good");
        assert_eq!(dst.contents("a/top.txt").unwrap(), b"top");
    }

    #[test]
    fn move_keeps_folders_holding_skipped_files() {
        let src = MemoryFileSystem::new("src");
        src.write_file("docs/sub/kept.txt", "source").unwrap();
        let dst = MemoryFileSystem::new("dst");
        dst.write_file("docs/sub/kept.txt", "existing").unwrap();

        let job = copy(vec![mem(&src, "docs")], dst.root(), TransferMode::Move, CollisionPolicy::Skip);
        assert!(job.execute().is_success());
        assert_eq!(src.contents("docs/sub/kept.txt").unwrap(), b"source");
        assert_eq!(dst.contents("docs/sub/kept.txt").unwrap(), b"existing");
    }

    #[test]
    fn folder_cannot_be_copied_into_itself() {
        let fs = MemoryFileSystem::new("self");
        fs.write_file("a/one.txt", "1").unwrap();
        fs.create_dir("a/sub").unwrap();
        fs.write_file("other.txt", "o").unwrap();
        let entries_before = fs.len();

        for (mode, destination) in [(TransferMode::Copy, "a/sub"), (TransferMode::Move, "a")] {
            let job = copy(
                vec![mem(&fs, "a"), mem(&fs, "other.txt")],
                mem(&fs, destination),
                mode,
                CollisionPolicy::Skip,
            );
            let result = job.execute();
            assert_eq!(result.outcome, JobOutcome::CompletedWithErrors);
            assert_eq!(result.errors.len(), 1);
            assert_eq!(result.errors[0].locator, "mem://self/a");
            assert!(result.errors[0].message.contains("into itself"));
            assert!(!fs.exists("a/sub/a"));
            assert!(!fs.exists("a/a"));
            assert!(fs.exists("a/one.txt"));
        }
        assert!(fs.exists("a/sub/other.txt"));
        assert!(!fs.exists("other.txt"));
        // a/sub/other.txt was copied, other.txt moved to a/other.txt.
        assert_eq!(fs.len(), entries_before + 1);
    }

    #[test]
    fn folders_merge_into_existing_ones() {
        let src = MemoryFileSystem::new("src");
        src.write_file("photos/new.jpg", "n").unwrap();
        let dst = MemoryFileSystem::new("dst");
        dst.write_file("photos/existing.jpg", "e").unwrap();

        let job = copy(vec![mem(&src, "photos")], dst.root(), TransferMode::Copy, CollisionPolicy::Skip);
        assert!(job.execute().is_success());
        assert!(dst.exists("photos/new.jpg"));
        assert!(dst.exists("photos/existing.jpg"));
    }

    #[test]
    fn unreadable_source_is_recorded_and_others_proceed() {
        let src = MemoryFileSystem::new("src");
        src.write_file("bad.txt", "x").unwrap();
        src.write_file("good.txt", "y").unwrap();
        src.set_unreadable("bad.txt", true).unwrap();
        let dst = MemoryFileSystem::new("dst");

        let job = copy(
            vec![mem(&src, "bad.txt"), mem(&src, "good.txt")],
            dst.root(),
            TransferMode::Copy,
            CollisionPolicy::Overwrite,
        );
        let result = job.execute();
        assert_eq!(result.outcome, JobOutcome::CompletedWithErrors);
        assert_eq!(result.errors[0].locator, "mem://src/bad.txt");
        assert!(!dst.exists("bad.txt"));
        assert!(dst.exists("good.txt"));
    }

    #[test]
    fn cancelled_before_start_is_interrupted() {
        let src = MemoryFileSystem::new("src");
        src.write_file("a.txt", "a").unwrap();
        let dst = MemoryFileSystem::new("dst");
        let job = copy(vec![mem(&src, "a.txt")], dst.root(), TransferMode::Copy, CollisionPolicy::Overwrite);
        job.cancellation().cancel();
        assert_eq!(job.execute().outcome, JobOutcome::Interrupted);
        assert!(!dst.exists("a.txt"));
    }

    #[test]
    fn unreachable_destination_fails_the_job() {
        let src = MemoryFileSystem::new("src");
        src.write_file("a.txt", "a").unwrap();
        src.write_file("plain.txt", "p").unwrap();
        let job = copy(
            vec![mem(&src, "a.txt")],
            mem(&src, "plain.txt"),
            TransferMode::Copy,
            CollisionPolicy::Overwrite,
        );
        assert_eq!(job.execute().outcome, JobOutcome::Failed);
    }
}
