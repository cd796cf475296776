//! Virtual filesystem.
//!
//! Every resource the core can address is exposed as an [`AbstractFile`]
//! handle, shared as a [`FileRef`]. Handles are produced by a
//! [`ProtocolProvider`] chosen by the locator scheme in the
//! [`ProtocolRegistry`].
//!
//! - [`LocalFile`] - real filesystem (`file://`)
//! - [`ArchiveFile`] - zip/jar entries (`zip://`)
//! - [`MemoryFile`] - in-memory trees (`mem://`), also used for remote-like resources in tests
//! - [`BookmarkRoot`] - the user's bookmarks (`bookmark://`)
//! - [`crate::search::SearchFile`] - search results (`find://`)
//!
//! Providers never touch storage while building a handle; the handle's own
//! operations do the I/O.

pub mod archive;
pub mod bookmark;
pub mod local;
pub mod memory;
mod registry;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;

use crate::error::{VfsError, VfsResult};
use crate::locator::ResourceLocator;

pub use archive::{ArchiveFile, ArchiveProvider, ARCHIVE_SCHEME};
pub use bookmark::{Bookmark, BookmarkProvider, BookmarkRoot, BookmarkStore, BOOKMARK_SCHEME};
pub use local::{LocalFile, LocalProvider};
pub use memory::{MemoryFile, MemoryFileSystem, MemoryProvider, MEMORY_SCHEME};
pub use registry::{ProtocolProvider, ProtocolRegistry};

/// Shared handle; several panels and jobs may hold the same file.
pub type FileRef = Arc<dyn AbstractFile>;

/// Extra, provider-specific values passed at resolution time.
pub type InstantiationParams = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileAttributes {
    pub kind: FileKind,
    pub size: u64,
    #[serde(skip)]
    pub modified: Option<SystemTime>,
    pub hidden: bool,
    pub symlink: bool,
    pub permissions: Option<String>,
}

impl FileAttributes {
    pub fn file(size: u64) -> Self {
        Self {
            kind: FileKind::File,
            size,
            modified: None,
            hidden: false,
            symlink: false,
            permissions: None,
        }
    }

    pub fn directory() -> Self {
        Self {
            kind: FileKind::Directory,
            ..Self::file(0)
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Milliseconds since the epoch, 0 when unknown.
    pub fn modified_millis(&self) -> u64 {
        self.modified
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// What a handle supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub list: bool,
    pub read: bool,
    pub write: bool,
    pub attributes: bool,
}

impl Capabilities {
    pub const ALL: Self = Self {
        list: true,
        read: true,
        write: true,
        attributes: true,
    };

    pub const READ_ONLY: Self = Self {
        list: true,
        read: true,
        write: false,
        attributes: true,
    };

    pub const LIST_ONLY: Self = Self {
        list: true,
        read: false,
        write: false,
        attributes: true,
    };
}

/// Uniform operations over any backing store.
///
/// Mutating operations default to [`VfsError::Unsupported`].
pub trait AbstractFile: Send + Sync + fmt::Debug + 'static {
    fn locator(&self) -> &ResourceLocator;

    fn name(&self) -> String {
        let locator = self.locator();
        locator
            .filename()
            .or_else(|| locator.authority())
            .unwrap_or("")
            .to_string()
    }

    fn capabilities(&self) -> Capabilities;

    fn attributes(&self) -> VfsResult<FileAttributes>;

    /// True if the handle has children that `ls` can list.
    fn is_browsable(&self) -> bool;

    fn exists(&self) -> bool {
        self.attributes().is_ok()
    }

    fn size(&self) -> u64 {
        self.attributes().map(|a| a.size).unwrap_or(0)
    }

    /// The enclosing folder, built from the locator. Never owned by the child.
    fn parent(&self) -> Option<FileRef>;

    fn ls(&self) -> VfsResult<Vec<FileRef>>;

    /// Handle for a direct child, whether or not it exists yet.
    fn child(&self, _name: &str) -> VfsResult<FileRef> {
        Err(VfsError::unsupported("child lookup", self.locator()))
    }

    fn open_read(&self) -> VfsResult<Box<dyn Read + Send>>;

    /// Opens for writing, truncating existing content.
    fn open_write(&self) -> VfsResult<Box<dyn Write + Send>> {
        Err(VfsError::unsupported("write", self.locator()))
    }

    fn open_append(&self) -> VfsResult<Box<dyn Write + Send>> {
        Err(VfsError::unsupported("append", self.locator()))
    }

    fn mkdir(&self) -> VfsResult<()> {
        Err(VfsError::unsupported("mkdir", self.locator()))
    }

    /// Deletes the resource; folders are deleted with their content.
    fn delete(&self) -> VfsResult<()> {
        Err(VfsError::unsupported("delete", self.locator()))
    }

    /// Moves this resource over `destination` within the same store.
    fn rename_to(&self, _destination: &dyn AbstractFile) -> VfsResult<()> {
        Err(VfsError::unsupported("rename", self.locator()))
    }

    /// Path on the local disk, for handles backed by one.
    fn local_path(&self) -> Option<PathBuf> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Reads the whole resource into memory.
pub fn read_all(file: &dyn AbstractFile) -> VfsResult<Vec<u8>> {
    let mut reader = file.open_read()?;
    let mut data = Vec::new();
    reader
        .read_to_end(&mut data)
        .map_err(|e| VfsError::access(file.locator(), e))?;
    Ok(data)
}

/// Orders folders first, then by case-insensitive name.
pub(crate) fn sort_listing(entries: &mut [FileRef]) {
    entries.sort_by_cached_key(|entry| (!entry.is_browsable(), entry.name().to_lowercase()));
}
