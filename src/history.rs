//! Global location history: the most recently visited locations across all
//! panels, persisted in the session snapshot.

use std::sync::{Arc, Mutex};

use indexmap::IndexSet;

use crate::config::ConfigurationStore;
use crate::locator::ResourceLocator;
use crate::vfs::{FileRef, ProtocolRegistry};

pub const DEFAULT_CAPACITY: usize = 100;

const COUNT_VARIABLE: &str = "history.recent_locations_count";
const LOCATION_VARIABLE_PREFIX: &str = "history.recent_location_";

fn location_variable(index: usize) -> String {
    format!("{}{}", LOCATION_VARIABLE_PREFIX, index)
}

/// Notified whenever a panel moves to a new location.
pub trait LocationObserver: Send + Sync {
    fn location_changed(&self, locator: &ResourceLocator);
}

/// Recently visited locations, oldest first, without duplicates.
///
/// Revisiting a location moves it to the end; once the capacity is reached the
/// oldest location is dropped.
#[derive(Debug)]
pub struct GlobalLocationHistory {
    locations: Mutex<IndexSet<ResourceLocator>>,
    capacity: usize,
}

impl Default for GlobalLocationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl GlobalLocationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            locations: Mutex::new(IndexSet::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record_visit(&self, locator: &ResourceLocator) {
        let mut locations = self.lock();
        locations.shift_remove(locator);
        locations.insert(locator.clone());
        while locations.len() > self.capacity {
            locations.shift_remove_index(0);
        }
    }

    /// Snapshot of the recorded locations, oldest first.
    pub fn locations(&self) -> Vec<ResourceLocator> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Resolves every recorded location. Locations that no longer resolve are
    /// logged and left out.
    pub fn history(&self, registry: &Arc<ProtocolRegistry>) -> Vec<FileRef> {
        self.locations()
            .iter()
            .filter_map(|locator| match registry.get_file(locator) {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::warn!("Dropping history entry {}: {}", locator, e);
                    None
                }
            })
            .collect()
    }

    /// Replaces the history with the locations saved in `store`. Entries that
    /// fail to parse are skipped.
    pub fn load(&self, store: &dyn ConfigurationStore) {
        let count = store
            .get_integer_variable(COUNT_VARIABLE)
            .filter(|count| *count > 0)
            .unwrap_or(0) as usize;

        let mut loaded = IndexSet::new();
        for i in 0..count {
            let Some(value) = store.get_variable(&location_variable(i)) else {
                continue;
            };
            match ResourceLocator::parse(&value) {
                Ok(locator) => {
                    loaded.shift_remove(&locator);
                    loaded.insert(locator);
                }
                Err(e) => tracing::debug!("Skipping saved location {:?}: {}", value, e),
            }
        }
        while loaded.len() > self.capacity {
            loaded.shift_remove_index(0);
        }

        tracing::debug!("Loaded {} history locations", loaded.len());
        *self.lock() = loaded;
    }

    /// Writes the history to `store`, removing entries left over from a longer
    /// previous history.
    pub fn flush(&self, store: &dyn ConfigurationStore) {
        let locations = self.locations();

        let previous = store
            .get_integer_variable(COUNT_VARIABLE)
            .filter(|count| *count > 0)
            .unwrap_or(0) as usize;
        for i in locations.len()..previous {
            store.remove_variable(&location_variable(i));
        }

        store.set_variable(COUNT_VARIABLE, &locations.len().to_string());
        for (i, locator) in locations.iter().enumerate() {
            store.set_variable(&location_variable(i), &locator.to_string());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexSet<ResourceLocator>> {
        self.locations.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LocationObserver for GlobalLocationHistory {
    fn location_changed(&self, locator: &ResourceLocator) {
        self.record_visit(locator);
    }
}
