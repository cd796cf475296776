//! Zip and jar archives browsed as folders (`zip:///path/app.jar/inner/path`).
//!
//! The locator path is split at the first segment with an archive extension:
//! everything up to it names the archive on the local disk, the rest names an
//! entry inside. Splitting is purely textual; the archive is opened when a
//! handle first needs its index.

use std::any::Any;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;

use dashmap::DashMap;
use zip::ZipArchive;

use crate::error::{VfsError, VfsResult};
use crate::locator::ResourceLocator;

use super::local::LocalFile;
use super::{
    sort_listing, AbstractFile, Capabilities, FileAttributes, FileRef, InstantiationParams,
    ProtocolProvider, ProtocolRegistry,
};

pub const ARCHIVE_SCHEME: &str = "zip";

const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "jar"];

pub fn is_archive_name(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ARCHIVE_EXTENSIONS
            .iter()
            .any(|candidate| ext.eq_ignore_ascii_case(candidate)),
        _ => false,
    }
}

/// `zip://` locator of the root of the archive at `path`.
pub fn archive_locator_for(path: &Path) -> ResourceLocator {
    let local = ResourceLocator::from_path(path);
    let mut locator = ResourceLocator::from_parts(ARCHIVE_SCHEME, None, "/")
        .unwrap_or_else(|_| local.clone());
    for segment in local.segments() {
        locator = locator.child(segment);
    }
    locator
}

#[derive(Debug, Clone)]
struct IndexEntry {
    is_dir: bool,
    size: u64,
    /// Name inside the zip; `None` for folders implied by deeper entries.
    zip_name: Option<String>,
}

/// Entries of one archive keyed by `/`-joined inner path, root included.
#[derive(Debug, Default)]
pub struct ArchiveIndex {
    entries: BTreeMap<String, IndexEntry>,
    /// Folder key to the keys directly inside it, in key order.
    children: BTreeMap<String, Vec<String>>,
}

impl ArchiveIndex {
    fn load(path: &Path) -> io::Result<Self> {
        let file = fs::File::open(path)?;
        let mut archive = ZipArchive::new(file).map_err(zip_to_io)?;

        let mut entries = BTreeMap::new();
        entries.insert(
            String::new(),
            IndexEntry {
                is_dir: true,
                size: 0,
                zip_name: None,
            },
        );

        for i in 0..archive.len() {
            let file = archive.by_index(i).map_err(zip_to_io)?;
            let raw = file.name().to_string();
            let key = normalize_entry(&raw);
            if key.is_empty() {
                continue;
            }

            let mut parent = parent_key(&key);
            while let Some(dir) = parent {
                entries.entry(dir.to_string()).or_insert(IndexEntry {
                    is_dir: true,
                    size: 0,
                    zip_name: None,
                });
                parent = parent_key(dir);
            }

            let is_dir = file.is_dir() || raw.ends_with('/');
            entries.insert(
                key,
                IndexEntry {
                    is_dir,
                    size: if is_dir { 0 } else { file.size() },
                    zip_name: Some(raw),
                },
            );
        }

        let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for key in entries.keys() {
            if let Some(parent) = parent_key(key) {
                children.entry(parent.to_string()).or_default().push(key.clone());
            }
        }

        Ok(Self { entries, children })
    }

    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.entries.get(key)
    }

    fn children<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.children
            .get(key)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }
}

fn normalize_entry(raw: &str) -> String {
    raw.split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect::<Vec<_>>()
        .join("/")
}

fn parent_key(key: &str) -> Option<&str> {
    if key.is_empty() {
        return None;
    }
    Some(key.rsplit_once('/').map(|(parent, _)| parent).unwrap_or(""))
}

fn zip_to_io(error: zip::result::ZipError) -> io::Error {
    match error {
        zip::result::ZipError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
}

/// One open archive, shared by every handle into it. The index and the open
/// reader are reloaded when the archive's size or modification time changes.
pub struct ArchiveHandle {
    path: PathBuf,
    index: Mutex<Option<(Stamp, Arc<ArchiveIndex>)>>,
    reader: Mutex<Option<(Stamp, ZipArchive<fs::File>)>>,
}

impl std::fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveHandle")
            .field("path", &self.path)
            .finish()
    }
}

impl ArchiveHandle {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            index: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stamp(&self) -> io::Result<Stamp> {
        let metadata = fs::metadata(&self.path)?;
        Ok(Stamp {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }

    pub fn index(&self) -> io::Result<Arc<ArchiveIndex>> {
        let stamp = self.stamp()?;
        let mut cached = self.index.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((cached_stamp, index)) = cached.as_ref() {
            if *cached_stamp == stamp {
                return Ok(Arc::clone(index));
            }
            tracing::debug!("Archive {} changed, reloading index", self.path.display());
        }
        let index = Arc::new(ArchiveIndex::load(&self.path)?);
        *cached = Some((stamp, Arc::clone(&index)));
        Ok(index)
    }

    fn read_entry(&self, zip_name: &str) -> io::Result<Vec<u8>> {
        let stamp = self.stamp()?;
        let mut reader = self.reader.lock().unwrap_or_else(|e| e.into_inner());
        let fresh = matches!(reader.as_ref(), Some((cached, _)) if *cached == stamp);
        if !fresh {
            let file = fs::File::open(&self.path)?;
            *reader = Some((stamp, ZipArchive::new(file).map_err(zip_to_io)?));
        }
        let (_, archive) = reader
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "archive is not open"))?;
        let mut entry = archive.by_name(zip_name).map_err(zip_to_io)?;
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        Ok(data)
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveFile {
    handle: Arc<ArchiveHandle>,
    locator: ResourceLocator,
    /// `/`-joined path inside the archive, empty for the archive root.
    inner: String,
}

impl ArchiveFile {
    pub fn is_archive_root(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn archive_path(&self) -> &Path {
        self.handle.path()
    }

    /// Path of this entry inside the archive.
    pub fn entry_path(&self) -> &str {
        &self.inner
    }

    fn at(&self, inner: &str) -> ArchiveFile {
        let mut locator = archive_locator_for(&self.handle.path);
        if !inner.is_empty() {
            locator = locator.child(inner);
        }
        ArchiveFile {
            handle: Arc::clone(&self.handle),
            locator,
            inner: inner.to_string(),
        }
    }

    fn index(&self) -> VfsResult<Arc<ArchiveIndex>> {
        self.handle
            .index()
            .map_err(|e| VfsError::from_io(&self.locator, e))
    }
}

impl AbstractFile for ArchiveFile {
    fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ_ONLY
    }

    fn attributes(&self) -> VfsResult<FileAttributes> {
        let metadata =
            fs::metadata(&self.handle.path).map_err(|e| VfsError::from_io(&self.locator, e))?;
        if self.is_archive_root() {
            let mut attrs = FileAttributes::file(metadata.len());
            attrs.modified = metadata.modified().ok();
            return Ok(attrs);
        }

        let index = self.index()?;
        let entry = index
            .get(&self.inner)
            .ok_or_else(|| VfsError::not_found(&self.locator))?;
        let mut attrs = if entry.is_dir {
            FileAttributes::directory()
        } else {
            FileAttributes::file(entry.size)
        };
        attrs.modified = metadata.modified().ok();
        attrs.hidden = self
            .locator
            .filename()
            .map(|n| n.starts_with('.'))
            .unwrap_or(false);
        Ok(attrs)
    }

    fn is_browsable(&self) -> bool {
        if self.is_archive_root() {
            return self.handle.path.is_file();
        }
        self.handle
            .index()
            .ok()
            .and_then(|index| index.get(&self.inner).map(|e| e.is_dir))
            .unwrap_or(false)
    }

    fn parent(&self) -> Option<FileRef> {
        match parent_key(&self.inner) {
            Some(parent) => Some(Arc::new(self.at(parent))),
            // Leaving the archive lands in the folder that holds it.
            None => self
                .handle
                .path
                .parent()
                .map(|dir| Arc::new(LocalFile::new(dir)) as FileRef),
        }
    }

    fn ls(&self) -> VfsResult<Vec<FileRef>> {
        let index = self.index()?;
        match index.get(&self.inner) {
            Some(entry) if entry.is_dir => {}
            Some(_) => return Err(VfsError::not_a_directory(&self.locator)),
            None => return Err(VfsError::not_found(&self.locator)),
        }
        let mut children: Vec<FileRef> = index
            .children(&self.inner)
            .map(|key| Arc::new(self.at(key)) as FileRef)
            .collect();
        sort_listing(&mut children);
        Ok(children)
    }

    fn child(&self, name: &str) -> VfsResult<FileRef> {
        let inner = normalize_entry(&format!("{}/{}", self.inner, name));
        Ok(Arc::new(self.at(&inner)))
    }

    fn open_read(&self) -> VfsResult<Box<dyn Read + Send>> {
        if self.is_archive_root() {
            let file = fs::File::open(&self.handle.path)
                .map_err(|e| VfsError::from_io(&self.locator, e))?;
            return Ok(Box::new(file));
        }

        let index = self.index()?;
        let entry = index
            .get(&self.inner)
            .ok_or_else(|| VfsError::not_found(&self.locator))?;
        if entry.is_dir {
            return Err(VfsError::unsupported("read of a folder", &self.locator));
        }
        let zip_name = entry
            .zip_name
            .as_deref()
            .ok_or_else(|| VfsError::not_found(&self.locator))?;
        let data = self
            .handle
            .read_entry(zip_name)
            .map_err(|e| VfsError::access(&self.locator, e))?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn local_path(&self) -> Option<PathBuf> {
        if self.is_archive_root() {
            Some(self.handle.path.clone())
        } else {
            None
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Provider for `zip://` locators. Handles are cached weakly per archive so
/// that every file inside one archive shares a single index.
#[derive(Debug, Clone, Default)]
pub struct ArchiveProvider {
    handles: Arc<DashMap<PathBuf, Weak<ArchiveHandle>>>,
}

impl ArchiveProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, path: PathBuf) -> Arc<ArchiveHandle> {
        if let Some(existing) = self.handles.get(&path).and_then(|weak| weak.upgrade()) {
            return existing;
        }
        let handle = Arc::new(ArchiveHandle::new(path.clone()));
        self.handles.retain(|_, weak| weak.strong_count() > 0);
        self.handles.insert(path, Arc::downgrade(&handle));
        handle
    }
}

impl ProtocolProvider for ArchiveProvider {
    fn get_file(
        &self,
        locator: &ResourceLocator,
        _params: &InstantiationParams,
        _registry: &Arc<ProtocolRegistry>,
    ) -> VfsResult<FileRef> {
        let segments = locator.segments();
        let split = segments
            .iter()
            .position(|segment| is_archive_name(segment))
            .ok_or_else(|| VfsError::malformed(locator.to_string(), "no archive in path"))?;

        let mut archive_path = PathBuf::from("/");
        for segment in &segments[..=split] {
            archive_path.push(segment);
        }
        let inner = segments[split + 1..].join("/");

        Ok(Arc::new(ArchiveFile {
            handle: self.handle(archive_path),
            locator: locator.without_query(),
            inner,
        }))
    }
}
