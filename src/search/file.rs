//! Virtual folder whose children are the results of a running search.

use std::any::Any;
use std::collections::HashSet;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::config::CoreConfig;
use crate::error::{VfsError, VfsResult};
use crate::job::CancellationToken;
use crate::locator::ResourceLocator;
use crate::vfs::archive::{archive_locator_for, is_archive_name};
use crate::vfs::{
    AbstractFile, Capabilities, FileAttributes, FileRef, ProtocolRegistry,
};

use super::matcher::FileMatcher;
use super::options::SearchOptions;

const EVENT_CAPACITY: usize = 1024;

/// Lifecycle of a search: Idle → Running → Completed | Cancelled | Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl SearchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub enum SearchEvent {
    Started,
    Found(FileRef),
    /// A folder or file could not be searched; the traversal goes on.
    Error { locator: String, message: String },
    Finished(SearchState),
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchError {
    pub locator: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchStatus {
    pub state: SearchState,
    pub matches: usize,
    pub scanned_folders: usize,
    pub scanned_files: usize,
    pub errors: usize,
    /// Stopped early because `max_results` was reached.
    pub truncated: bool,
    pub failure: Option<String>,
}

/// State shared between a search handle and its worker thread.
#[derive(Debug)]
struct SearchShared {
    state: watch::Sender<SearchState>,
    children: Mutex<Vec<FileRef>>,
    errors: Mutex<Vec<SearchError>>,
    failure: Mutex<Option<String>>,
    events: broadcast::Sender<SearchEvent>,
    cancel: CancellationToken,
    scanned_folders: AtomicUsize,
    scanned_files: AtomicUsize,
    truncated: AtomicBool,
}

impl SearchShared {
    fn new() -> Self {
        let (state, _) = watch::channel(SearchState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state,
            children: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            events,
            cancel: CancellationToken::new(),
            scanned_folders: AtomicUsize::new(0),
            scanned_files: AtomicUsize::new(0),
            truncated: AtomicBool::new(false),
        }
    }

    fn state(&self) -> SearchState {
        *self.state.borrow()
    }

    /// Moves `from` → `to`; false if the search was elsewhere.
    fn transition(&self, from: SearchState, to: SearchState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn emit(&self, event: SearchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn record_error(&self, locator: &ResourceLocator, error: &VfsError) {
        tracing::warn!("Search skipped {}: {}", locator, error);
        let entry = SearchError {
            locator: locator.to_string(),
            message: error.to_string(),
        };
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
        self.emit(SearchEvent::Error {
            locator: entry.locator,
            message: entry.message,
        });
    }

    /// Appends a match and returns the new match count.
    fn push_match(&self, file: FileRef) -> usize {
        let count = {
            let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
            children.push(Arc::clone(&file));
            children.len()
        };
        self.emit(SearchEvent::Found(file));
        count
    }

    fn finish(&self, state: SearchState) {
        if self.transition(SearchState::Running, state) {
            tracing::debug!("Search finished: {}", state.as_str());
            self.emit(SearchEvent::Finished(state));
        }
    }
}

/// Browsable node over a search. Children are the matching files themselves,
/// appended in discovery order while the search runs and frozen once it stops.
#[derive(Debug, Clone)]
pub struct SearchFile {
    locator: ResourceLocator,
    root: ResourceLocator,
    options: SearchOptions,
    matcher: FileMatcher,
    config: CoreConfig,
    registry: Arc<ProtocolRegistry>,
    shared: Arc<SearchShared>,
}

impl SearchFile {
    pub(crate) fn new(
        locator: ResourceLocator,
        root: ResourceLocator,
        options: SearchOptions,
        config: CoreConfig,
        registry: Arc<ProtocolRegistry>,
    ) -> VfsResult<Self> {
        let matcher = FileMatcher::new(&options, config.max_content_scan_size)?;
        Ok(Self {
            locator,
            root,
            options,
            matcher,
            config,
            registry,
            shared: Arc::new(SearchShared::new()),
        })
    }

    pub fn root(&self) -> &ResourceLocator {
        &self.root
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    pub fn state(&self) -> SearchState {
        self.shared.state()
    }

    /// Starts the worker. Returns false if the search already left Idle.
    pub fn start(&self) -> VfsResult<bool> {
        if !self.shared.transition(SearchState::Idle, SearchState::Running) {
            return Ok(false);
        }

        let worker = SearchWorker {
            root: self.root.clone(),
            options: self.options.clone(),
            matcher: self.matcher.clone(),
            follow_symlinks: self.config.follow_symlinks,
            registry: Arc::clone(&self.registry),
            shared: Arc::clone(&self.shared),
        };

        tracing::info!("Starting search of {} for {}", self.root, self.options.pattern);
        let spawned = thread::Builder::new()
            .name("search".to_string())
            .spawn(move || worker.run());

        if let Err(e) = spawned {
            *self.shared.failure.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.to_string());
            self.shared.finish(SearchState::Failed);
            return Err(VfsError::access(&self.locator, e));
        }
        Ok(true)
    }

    /// Requests cancellation. An idle search is cancelled without ever running.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
        if self.shared.transition(SearchState::Idle, SearchState::Cancelled) {
            self.shared.emit(SearchEvent::Finished(SearchState::Cancelled));
        }
    }

    /// Waits for a terminal state, starting the search if it is still idle.
    pub async fn wait(&self) -> VfsResult<SearchState> {
        self.start()?;
        let mut receiver = self.shared.state.subscribe();
        let state = match receiver.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.shared.state(),
        };
        Ok(state)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SearchEvent> {
        self.shared.events.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<SearchState> {
        self.shared.state.subscribe()
    }

    /// Matches found so far, in discovery order.
    pub fn children(&self) -> Vec<FileRef> {
        self.shared
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn search_errors(&self) -> Vec<SearchError> {
        self.shared
            .errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn has_errors(&self) -> bool {
        !self
            .shared
            .errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    pub fn status(&self) -> SearchStatus {
        SearchStatus {
            state: self.state(),
            matches: self
                .shared
                .children
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
            scanned_folders: self.shared.scanned_folders.load(Ordering::Relaxed),
            scanned_files: self.shared.scanned_files.load(Ordering::Relaxed),
            errors: self
                .shared
                .errors
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
            truncated: self.shared.truncated.load(Ordering::Relaxed),
            failure: self
                .shared
                .failure
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}

impl AbstractFile for SearchFile {
    fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    fn name(&self) -> String {
        format!("{} in {}", self.options.pattern, self.root)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::LIST_ONLY
    }

    /// A folder for as long as the search root exists.
    fn attributes(&self) -> VfsResult<FileAttributes> {
        let root = self.registry.get_file(&self.root)?;
        let mut attrs = root.attributes()?;
        attrs.kind = crate::vfs::FileKind::Directory;
        attrs.size = 0;
        Ok(attrs)
    }

    fn is_browsable(&self) -> bool {
        true
    }

    fn parent(&self) -> Option<FileRef> {
        self.registry.get_file(&self.root).ok()
    }

    /// Starts the search on first call, then returns the matches so far.
    fn ls(&self) -> VfsResult<Vec<FileRef>> {
        if self.state() == SearchState::Idle {
            self.start()?;
        }
        Ok(self.children())
    }

    fn child(&self, name: &str) -> VfsResult<FileRef> {
        self.children()
            .into_iter()
            .find(|file| file.name() == name)
            .ok_or_else(|| VfsError::not_found(self.locator.child(name)))
    }

    fn open_read(&self) -> VfsResult<Box<dyn Read + Send>> {
        Err(VfsError::unsupported("read of search results", &self.locator))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct SearchWorker {
    root: ResourceLocator,
    options: SearchOptions,
    matcher: FileMatcher,
    follow_symlinks: bool,
    registry: Arc<ProtocolRegistry>,
    shared: Arc<SearchShared>,
}

/// Outcome of visiting one entry.
enum Visit {
    Continue,
    Descend(Vec<FileRef>),
    Stop,
}

impl SearchWorker {
    fn run(self) {
        self.shared.emit(SearchEvent::Started);

        let listing = self
            .registry
            .get_file(&self.root)
            .and_then(|root| root.ls());
        let listing = match listing {
            Ok(listing) => listing,
            Err(e) => {
                tracing::warn!("Search root {} is not accessible: {}", self.root, e);
                *self.shared.failure.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.to_string());
                self.shared.finish(SearchState::Failed);
                return;
            }
        };
        self.shared.scanned_folders.fetch_add(1, Ordering::Relaxed);

        let final_state = self.walk(listing);
        self.shared.finish(final_state);
    }

    /// Depth-first over the root's listing; each stack frame is one folder.
    fn walk(&self, listing: Vec<FileRef>) -> SearchState {
        let mut visited: HashSet<ResourceLocator> = HashSet::new();
        visited.insert(self.root.clone());
        let mut stack: Vec<(std::vec::IntoIter<FileRef>, usize)> = vec![(listing.into_iter(), 0)];

        loop {
            if self.shared.cancel.is_cancelled() {
                return SearchState::Cancelled;
            }

            let (entry, level) = match stack.last_mut() {
                None => return SearchState::Completed,
                Some((entries, level)) => match entries.next() {
                    Some(entry) => (entry, *level),
                    None => {
                        stack.pop();
                        continue;
                    }
                },
            };

            if !visited.insert(entry.locator().clone()) {
                continue;
            }

            match self.visit(&entry, level) {
                Visit::Continue => {}
                Visit::Descend(children) => stack.push((children.into_iter(), level + 1)),
                Visit::Stop => return SearchState::Completed,
            }
        }
    }

    fn visit(&self, entry: &FileRef, level: usize) -> Visit {
        let attrs = match entry.attributes() {
            Ok(attrs) => attrs,
            Err(e) => {
                self.shared.record_error(entry.locator(), &e);
                return Visit::Continue;
            }
        };
        if attrs.hidden && !self.options.hidden {
            return Visit::Continue;
        }

        let is_dir = attrs.is_dir();
        if is_dir {
            self.shared.scanned_folders.fetch_add(1, Ordering::Relaxed);
        } else {
            self.shared.scanned_files.fetch_add(1, Ordering::Relaxed);
        }

        if self.is_match(entry, &attrs) {
            let count = self.shared.push_match(Arc::clone(entry));
            if count >= self.options.max_results {
                tracing::info!("Search reached {} results, stopping", count);
                self.shared.truncated.store(true, Ordering::Relaxed);
                return Visit::Stop;
            }
        }

        let may_descend = self.options.subfolders
            && self.options.depth.map(|max| level < max).unwrap_or(true);
        if !may_descend {
            return Visit::Continue;
        }

        let folder = if is_dir {
            if attrs.symlink && !self.follow_symlinks {
                return Visit::Continue;
            }
            Arc::clone(entry)
        } else if self.options.archives && is_archive_name(&entry.name()) {
            match self.open_archive(entry) {
                Some(archive) => archive,
                None => return Visit::Continue,
            }
        } else {
            return Visit::Continue;
        };

        match folder.ls() {
            Ok(children) => Visit::Descend(children),
            Err(e) => {
                self.shared.record_error(folder.locator(), &e);
                Visit::Continue
            }
        }
    }

    fn is_match(&self, entry: &FileRef, attrs: &FileAttributes) -> bool {
        if attrs.is_dir() && (!self.options.folders || self.matcher.has_content_predicate()) {
            return false;
        }
        if !self.matcher.matches_name(&entry.name()) {
            return false;
        }
        match self.matcher.matches_content(entry.as_ref(), attrs.size) {
            Ok(matched) => matched,
            Err(e) => {
                self.shared.record_error(entry.locator(), &e);
                false
            }
        }
    }

    /// Archive browsing works for archives on the local disk only.
    fn open_archive(&self, entry: &FileRef) -> Option<FileRef> {
        let path = entry.local_path()?;
        match self.registry.get_file(&archive_locator_for(&path)) {
            Ok(archive) => Some(archive),
            Err(e) => {
                tracing::debug!("Not descending into {}: {}", entry.locator(), e);
                None
            }
        }
    }
}
