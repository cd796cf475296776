//! Bookmarks (`bookmark://`).
//!
//! `bookmark://` is a folder listing every bookmark in insertion order;
//! `bookmark://<name>` resolves straight to the bookmarked location.

use std::any::Any;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::ConfigurationStore;
use crate::error::{VfsError, VfsResult};
use crate::locator::ResourceLocator;

use super::{
    AbstractFile, Capabilities, FileAttributes, FileRef, InstantiationParams, ProtocolProvider,
    ProtocolRegistry,
};

pub const BOOKMARK_SCHEME: &str = "bookmark";

const COUNT_VARIABLE: &str = "bookmarks.count";

fn name_variable(index: usize) -> String {
    format!("bookmarks.bookmark_{}.name", index)
}

fn location_variable(index: usize) -> String {
    format!("bookmarks.bookmark_{}.location", index)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    pub name: String,
    pub location: ResourceLocator,
}

#[derive(Debug, Default)]
pub struct BookmarkStore {
    bookmarks: Mutex<Vec<Bookmark>>,
}

impl BookmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Bookmark>> {
        self.bookmarks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a bookmark, replacing the location of an existing one with the
    /// same name in place.
    pub fn add(&self, name: &str, location: ResourceLocator) {
        let mut bookmarks = self.lock();
        match bookmarks.iter_mut().find(|b| b.name == name) {
            Some(existing) => existing.location = location,
            None => bookmarks.push(Bookmark {
                name: name.to_string(),
                location,
            }),
        }
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut bookmarks = self.lock();
        let before = bookmarks.len();
        bookmarks.retain(|b| b.name != name);
        bookmarks.len() != before
    }

    pub fn get(&self, name: &str) -> Option<Bookmark> {
        self.lock().iter().find(|b| b.name == name).cloned()
    }

    pub fn list(&self) -> Vec<Bookmark> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Replaces the bookmarks with those in `store`. Entries with a missing
    /// name or an unparsable location are skipped.
    pub fn load(&self, store: &dyn ConfigurationStore) {
        let count = store
            .get_integer_variable(COUNT_VARIABLE)
            .filter(|c| *c > 0)
            .unwrap_or(0) as usize;

        let mut loaded = Vec::with_capacity(count);
        for i in 0..count {
            let Some(name) = store.get_variable(&name_variable(i)) else {
                continue;
            };
            let Some(raw) = store.get_variable(&location_variable(i)) else {
                continue;
            };
            match ResourceLocator::parse(&raw) {
                Ok(location) => loaded.push(Bookmark { name, location }),
                Err(e) => tracing::warn!("Skipping bookmark {}: {}", name, e),
            }
        }

        tracing::debug!("Loaded {} bookmarks", loaded.len());
        *self.lock() = loaded;
    }

    /// Writes every bookmark and clears slots left over from a longer list.
    pub fn flush(&self, store: &dyn ConfigurationStore) {
        let bookmarks = self.list();
        let previous = store
            .get_integer_variable(COUNT_VARIABLE)
            .filter(|c| *c > 0)
            .unwrap_or(0) as usize;

        for (i, bookmark) in bookmarks.iter().enumerate() {
            store.set_variable(&name_variable(i), &bookmark.name);
            store.set_variable(&location_variable(i), &bookmark.location.to_string());
        }
        for i in bookmarks.len()..previous {
            store.remove_variable(&name_variable(i));
            store.remove_variable(&location_variable(i));
        }
        store.set_variable(COUNT_VARIABLE, &bookmarks.len().to_string());
    }
}

/// Folder listing all bookmarks.
#[derive(Debug)]
pub struct BookmarkRoot {
    locator: ResourceLocator,
    store: Arc<BookmarkStore>,
    registry: Arc<ProtocolRegistry>,
}

impl AbstractFile for BookmarkRoot {
    fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    fn name(&self) -> String {
        "Bookmarks".to_string()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::LIST_ONLY
    }

    fn attributes(&self) -> VfsResult<FileAttributes> {
        Ok(FileAttributes::directory())
    }

    fn is_browsable(&self) -> bool {
        true
    }

    fn parent(&self) -> Option<FileRef> {
        None
    }

    /// Bookmark targets in insertion order; unresolvable ones are left out.
    fn ls(&self) -> VfsResult<Vec<FileRef>> {
        let mut targets = Vec::new();
        for bookmark in self.store.list() {
            match self.registry.get_file(&bookmark.location) {
                Ok(file) => targets.push(file),
                Err(e) => tracing::warn!("Cannot resolve bookmark {}: {}", bookmark.name, e),
            }
        }
        Ok(targets)
    }

    fn child(&self, name: &str) -> VfsResult<FileRef> {
        let bookmark = self
            .store
            .get(name)
            .ok_or_else(|| VfsError::not_found(self.locator.child(name)))?;
        self.registry.get_file(&bookmark.location)
    }

    fn open_read(&self) -> VfsResult<Box<dyn Read + Send>> {
        Err(VfsError::unsupported("read of a folder", &self.locator))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone)]
pub struct BookmarkProvider {
    store: Arc<BookmarkStore>,
}

impl BookmarkProvider {
    pub fn new(store: Arc<BookmarkStore>) -> Self {
        Self { store }
    }
}

impl ProtocolProvider for BookmarkProvider {
    fn get_file(
        &self,
        locator: &ResourceLocator,
        _params: &InstantiationParams,
        registry: &Arc<ProtocolRegistry>,
    ) -> VfsResult<FileRef> {
        let name = locator
            .authority()
            .or_else(|| locator.segments().first().map(String::as_str));

        match name {
            None => Ok(Arc::new(BookmarkRoot {
                locator: locator.without_query(),
                store: Arc::clone(&self.store),
                registry: Arc::clone(registry),
            })),
            Some(name) => {
                let bookmark = self
                    .store
                    .get(name)
                    .ok_or_else(|| VfsError::not_found(locator))?;
                registry.get_file(&bookmark.location)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, CoreConfig};

    fn setup() -> (Arc<BookmarkStore>, Arc<ProtocolRegistry>) {
        let store = Arc::new(BookmarkStore::new());
        let registry = ProtocolRegistry::with_default_providers(&CoreConfig::default());
        registry.register(BOOKMARK_SCHEME, BookmarkProvider::new(Arc::clone(&store)));
        (store, registry)
    }

    #[test]
    fn root_lists_bookmarks_in_order() {
        let (store, registry) = setup();
        store.add("logs", ResourceLocator::parse("file:///var/log").unwrap());
        store.add("scratch", ResourceLocator::parse("mem://scratch/").unwrap());
        store.add("etc", ResourceLocator::parse("file:///etc").unwrap());

        let root = registry.resolve_str("bookmark://").unwrap();
        assert!(root.is_browsable());
        let listed: Vec<String> = root
            .ls()
            .unwrap()
            .iter()
            .map(|f| f.locator().to_string())
            .collect();
        assert_eq!(listed, vec!["file:///var/log", "mem://scratch", "file:///etc"]);
    }

    #[test]
    fn named_bookmark_resolves_to_target() {
        let (store, registry) = setup();
        store.add("logs", ResourceLocator::parse("file:///var/log").unwrap());

        let file = registry.resolve_str("bookmark://logs").unwrap();
        assert_eq!(file.locator().to_string(), "file:///var/log");
        assert!(matches!(
            registry.resolve_str("bookmark://nope"),
            Err(VfsError::NotFound(_))
        ));
    }

    #[test]
    fn unresolvable_targets_are_left_out() {
        let (store, registry) = setup();
        store.add("remote", ResourceLocator::parse("sftp://host/home").unwrap());
        store.add("tmp", ResourceLocator::parse("file:///tmp").unwrap());
        let listed = registry.resolve_str("bookmark://").unwrap().ls().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].locator().to_string(), "file:///tmp");
    }

    #[test]
    fn add_with_same_name_replaces_in_place() {
        let store = BookmarkStore::new();
        store.add("a", ResourceLocator::parse("file:///a").unwrap());
        store.add("b", ResourceLocator::parse("file:///b").unwrap());
        store.add("a", ResourceLocator::parse("file:///c").unwrap());
        let names: Vec<String> = store.list().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(store.get("a").unwrap().location.path(), "/c");
        assert!(store.remove("a"));
        assert!(!store.remove("a"));
    }

    #[test]
    fn flush_and_load_through_configuration() {
        let conf = Configuration::new();
        let store = BookmarkStore::new();
        store.add("one", ResourceLocator::parse("file:///1").unwrap());
        store.add("two", ResourceLocator::parse("find:///src?pattern=*.rs").unwrap());
        store.add("three", ResourceLocator::parse("file:///3").unwrap());
        store.flush(&conf);

        store.remove("three");
        store.flush(&conf);
        assert_eq!(conf.get_variable("bookmarks.count").as_deref(), Some("2"));
        assert_eq!(conf.get_variable("bookmarks.bookmark_2.name"), None);

        conf.set_variable("bookmarks.bookmark_1.location", "not a locator");
        let reloaded = BookmarkStore::new();
        reloaded.load(&conf);
        let names: Vec<String> = reloaded.list().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["one"]);
    }
}
