//! In-memory filesystems (`mem://<name>/path`).
//!
//! Each named filesystem is a flat map from `/`-joined paths to entries, the
//! root (`""`) always present. Used for scratch space and to stand in for
//! remote stores in tests. Nodes can be flagged unreadable to reproduce
//! permission failures regardless of the user running the process.

use std::any::Any;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use dashmap::DashMap;

use crate::error::{VfsError, VfsResult};
use crate::locator::ResourceLocator;

use super::{
    sort_listing, AbstractFile, Capabilities, FileAttributes, FileRef, InstantiationParams,
    ProtocolProvider, ProtocolRegistry,
};

pub const MEMORY_SCHEME: &str = "mem";

#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8> },
    Directory,
}

#[derive(Debug, Clone)]
struct Node {
    entry: Entry,
    modified: SystemTime,
    unreadable: bool,
}

impl Node {
    fn directory() -> Self {
        Self {
            entry: Entry::Directory,
            modified: SystemTime::now(),
            unreadable: false,
        }
    }

    fn file(data: Vec<u8>) -> Self {
        Self {
            entry: Entry::File { data },
            modified: SystemTime::now(),
            unreadable: false,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.entry, Entry::Directory)
    }
}

#[derive(Debug)]
pub struct MemoryFileSystem {
    name: String,
    entries: RwLock<BTreeMap<String, Node>>,
}

impl MemoryFileSystem {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let mut entries = BTreeMap::new();
        entries.insert(String::new(), Node::directory());
        Arc::new(Self {
            name: name.into(),
            entries: RwLock::new(entries),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Node>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Node>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    fn locator_for(&self, key: &str) -> ResourceLocator {
        ResourceLocator::from_parts(MEMORY_SCHEME, Some(&self.name), key)
            .unwrap_or_else(|_| ResourceLocator::from_path(std::path::Path::new(key)))
    }

    /// Handle for `path`, which need not exist.
    pub fn file(self: &Arc<Self>, path: &str) -> MemoryFile {
        let locator = self.locator_for(path);
        MemoryFile {
            fs: Arc::clone(self),
            key: locator.segments().join("/"),
            locator,
        }
    }

    pub fn root(self: &Arc<Self>) -> FileRef {
        Arc::new(self.file(""))
    }

    /// Creates or replaces a file, creating missing parent folders.
    pub fn write_file(&self, path: &str, data: impl Into<Vec<u8>>) -> VfsResult<()> {
        let key = normalize(path);
        let mut entries = self.write();
        ensure_parents(&mut entries, &key);
        if entries.get(&key).map(Node::is_dir).unwrap_or(false) {
            return Err(VfsError::AlreadyExists(self.locator_for(&key).to_string()));
        }
        entries.insert(key, Node::file(data.into()));
        Ok(())
    }

    /// Creates a folder and its missing parents.
    pub fn create_dir(&self, path: &str) -> VfsResult<()> {
        let key = normalize(path);
        let mut entries = self.write();
        ensure_parents(&mut entries, &key);
        entries.entry(key).or_insert_with(Node::directory);
        Ok(())
    }

    /// Makes a node fail on `ls` or `open_read`.
    pub fn set_unreadable(&self, path: &str, unreadable: bool) -> VfsResult<()> {
        let key = normalize(path);
        let mut entries = self.write();
        let node = entries
            .get_mut(&key)
            .ok_or_else(|| VfsError::not_found(self.locator_for(&key)))?;
        node.unreadable = unreadable;
        Ok(())
    }

    pub fn set_modified(&self, path: &str, modified: SystemTime) -> VfsResult<()> {
        let key = normalize(path);
        let mut entries = self.write();
        let node = entries
            .get_mut(&key)
            .ok_or_else(|| VfsError::not_found(self.locator_for(&key)))?;
        node.modified = modified;
        Ok(())
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        match &self.read().get(&normalize(path))?.entry {
            Entry::File { data } => Some(data.clone()),
            Entry::Directory => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.read().contains_key(&normalize(path))
    }

    /// Number of nodes, root excluded.
    pub fn len(&self) -> usize {
        self.read().len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn parent_key(key: &str) -> Option<&str> {
    if key.is_empty() {
        return None;
    }
    Some(key.rsplit_once('/').map(|(parent, _)| parent).unwrap_or(""))
}

fn ensure_parents(entries: &mut BTreeMap<String, Node>, key: &str) {
    let mut current = parent_key(key);
    while let Some(parent) = current {
        entries
            .entry(parent.to_string())
            .or_insert_with(Node::directory);
        current = parent_key(parent);
    }
}

fn is_within(key: &str, ancestor: &str) -> bool {
    key == ancestor
        || ancestor.is_empty()
        || (key.starts_with(ancestor) && key.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

#[derive(Debug, Clone)]
pub struct MemoryFile {
    fs: Arc<MemoryFileSystem>,
    locator: ResourceLocator,
    key: String,
}

impl MemoryFile {
    pub fn filesystem(&self) -> &Arc<MemoryFileSystem> {
        &self.fs
    }

    fn sibling(&self, locator: ResourceLocator) -> MemoryFile {
        MemoryFile {
            fs: Arc::clone(&self.fs),
            key: locator.segments().join("/"),
            locator,
        }
    }

    fn permission_denied(&self) -> VfsError {
        VfsError::access(
            &self.locator,
            io::Error::new(io::ErrorKind::PermissionDenied, "node is unreadable"),
        )
    }
}

impl AbstractFile for MemoryFile {
    fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    fn attributes(&self) -> VfsResult<FileAttributes> {
        let entries = self.fs.read();
        let node = entries
            .get(&self.key)
            .ok_or_else(|| VfsError::not_found(&self.locator))?;
        let mut attrs = match &node.entry {
            Entry::File { data } => FileAttributes::file(data.len() as u64),
            Entry::Directory => FileAttributes::directory(),
        };
        attrs.modified = Some(node.modified);
        attrs.hidden = self
            .locator
            .filename()
            .map(|n| n.starts_with('.'))
            .unwrap_or(false);
        Ok(attrs)
    }

    fn is_browsable(&self) -> bool {
        self.fs
            .read()
            .get(&self.key)
            .map(Node::is_dir)
            .unwrap_or(false)
    }

    fn exists(&self) -> bool {
        self.fs.read().contains_key(&self.key)
    }

    fn parent(&self) -> Option<FileRef> {
        let parent = self.locator.parent()?;
        Some(Arc::new(self.sibling(parent)))
    }

    fn ls(&self) -> VfsResult<Vec<FileRef>> {
        let names: Vec<String> = {
            let entries = self.fs.read();
            let node = entries
                .get(&self.key)
                .ok_or_else(|| VfsError::not_found(&self.locator))?;
            if !node.is_dir() {
                return Err(VfsError::not_a_directory(&self.locator));
            }
            if node.unreadable {
                return Err(self.permission_denied());
            }
            entries
                .keys()
                .filter(|key| parent_key(key) == Some(self.key.as_str()))
                .filter_map(|key| key.rsplit('/').next().map(str::to_string))
                .collect()
        };

        let mut children: Vec<FileRef> = names
            .iter()
            .map(|name| Arc::new(self.sibling(self.locator.child(name))) as FileRef)
            .collect();
        sort_listing(&mut children);
        Ok(children)
    }

    fn child(&self, name: &str) -> VfsResult<FileRef> {
        Ok(Arc::new(self.sibling(self.locator.child(name))))
    }

    fn open_read(&self) -> VfsResult<Box<dyn Read + Send>> {
        let entries = self.fs.read();
        let node = entries
            .get(&self.key)
            .ok_or_else(|| VfsError::not_found(&self.locator))?;
        if node.unreadable {
            return Err(self.permission_denied());
        }
        match &node.entry {
            Entry::File { data } => Ok(Box::new(Cursor::new(data.clone()))),
            Entry::Directory => Err(VfsError::unsupported("read of a folder", &self.locator)),
        }
    }

    fn open_write(&self) -> VfsResult<Box<dyn Write + Send>> {
        self.open_writer(true)
    }

    fn open_append(&self) -> VfsResult<Box<dyn Write + Send>> {
        self.open_writer(false)
    }

    fn mkdir(&self) -> VfsResult<()> {
        let mut entries = self.fs.write();
        if entries.contains_key(&self.key) {
            return Err(VfsError::AlreadyExists(self.locator.to_string()));
        }
        ensure_parents(&mut entries, &self.key);
        entries.insert(self.key.clone(), Node::directory());
        Ok(())
    }

    fn delete(&self) -> VfsResult<()> {
        if self.key.is_empty() {
            return Err(VfsError::unsupported("delete of the root", &self.locator));
        }
        let mut entries = self.fs.write();
        if !entries.contains_key(&self.key) {
            return Err(VfsError::not_found(&self.locator));
        }
        entries.retain(|key, _| !is_within(key, &self.key));
        Ok(())
    }

    fn rename_to(&self, destination: &dyn AbstractFile) -> VfsResult<()> {
        let target = destination
            .as_any()
            .downcast_ref::<MemoryFile>()
            .filter(|target| Arc::ptr_eq(&target.fs, &self.fs))
            .ok_or_else(|| VfsError::unsupported("rename across stores", destination.locator()))?;
        if self.key.is_empty() || is_within(&target.key, &self.key) {
            return Err(VfsError::unsupported("rename into itself", &self.locator));
        }

        let mut entries = self.fs.write();
        if !entries.contains_key(&self.key) {
            return Err(VfsError::not_found(&self.locator));
        }
        entries.retain(|key, _| !is_within(key, &target.key));
        ensure_parents(&mut entries, &target.key);

        let moved: Vec<String> = entries
            .keys()
            .filter(|key| is_within(key, &self.key))
            .cloned()
            .collect();
        for key in moved {
            if let Some(node) = entries.remove(&key) {
                let renamed = format!("{}{}", target.key, &key[self.key.len()..]);
                entries.insert(renamed, node);
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl MemoryFile {
    fn open_writer(&self, truncate: bool) -> VfsResult<Box<dyn Write + Send>> {
        let mut entries = self.fs.write();
        match parent_key(&self.key).and_then(|parent| entries.get(parent)) {
            Some(parent) if parent.is_dir() => {}
            Some(_) => return Err(VfsError::not_a_directory(&self.locator)),
            None => return Err(VfsError::not_found(&self.locator)),
        }
        match entries.get_mut(&self.key) {
            Some(node) if node.is_dir() => {
                return Err(VfsError::unsupported("write of a folder", &self.locator))
            }
            Some(node) => {
                if truncate {
                    node.entry = Entry::File { data: Vec::new() };
                }
                node.modified = SystemTime::now();
            }
            None => {
                entries.insert(self.key.clone(), Node::file(Vec::new()));
            }
        }
        Ok(Box::new(MemoryWriter {
            fs: Arc::clone(&self.fs),
            key: self.key.clone(),
        }))
    }
}

/// Appends straight into the node on every write.
struct MemoryWriter {
    fs: Arc<MemoryFileSystem>,
    key: String,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut entries = self.fs.write();
        match entries.get_mut(&self.key) {
            Some(Node {
                entry: Entry::File { data },
                modified,
                ..
            }) => {
                data.extend_from_slice(buf);
                *modified = SystemTime::now();
                Ok(buf.len())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} was removed while writing", self.key),
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Provider for `mem://` locators. Filesystems are created on first use and
/// shared by every clone of the provider.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    filesystems: Arc<DashMap<String, Arc<MemoryFileSystem>>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The filesystem called `name`, created empty if unknown.
    pub fn filesystem(&self, name: &str) -> Arc<MemoryFileSystem> {
        Arc::clone(
            self.filesystems
                .entry(name.to_string())
                .or_insert_with(|| MemoryFileSystem::new(name))
                .value(),
        )
    }

    pub fn mount(&self, fs: Arc<MemoryFileSystem>) {
        self.filesystems.insert(fs.name().to_string(), fs);
    }
}

impl ProtocolProvider for MemoryProvider {
    fn get_file(
        &self,
        locator: &ResourceLocator,
        _params: &InstantiationParams,
        _registry: &Arc<ProtocolRegistry>,
    ) -> VfsResult<FileRef> {
        let fs = self.filesystem(locator.authority().unwrap_or(""));
        Ok(Arc::new(fs.file(&locator.path())))
    }
}
