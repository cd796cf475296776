//! Configuration: a dotted-variable store persisted as JSON, and the tunables
//! the filesystem core reads from it.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};

use crate::error::{VfsError, VfsResult};
use crate::platform;

const PREFERENCES_FILENAME: &str = "preferences.json";
const SNAPSHOT_FILENAME: &str = "snapshot.json";

pub const HISTORY_CAPACITY_VARIABLE: &str = "vfs.history_capacity";
pub const MAX_SEARCH_RESULTS_VARIABLE: &str = "vfs.search.max_results";
pub const MAX_CONTENT_SCAN_SIZE_VARIABLE: &str = "vfs.search.max_content_scan_size";
pub const FOLLOW_SYMLINKS_VARIABLE: &str = "vfs.search.follow_symlinks";
pub const COPY_BUFFER_SIZE_VARIABLE: &str = "vfs.copy.buffer_size";
pub const PRELOAD_EXTENSION_VARIABLE: &str = "vfs.update.preload_extension";

/// Variable access used by the core; the storage format stays behind it.
pub trait ConfigurationStore: Send + Sync {
    fn get_variable(&self, name: &str) -> Option<String>;

    fn set_variable(&self, name: &str, value: &str);

    /// Removes a variable, returning its previous value.
    fn remove_variable(&self, name: &str) -> Option<String>;

    /// Value parsed as an integer; `None` when unset or not a number.
    fn get_integer_variable(&self, name: &str) -> Option<i64> {
        self.get_variable(name)
            .and_then(|value| value.trim().parse().ok())
    }
}

/// Tree of string variables addressed by dotted names (`history.recent_location_0`).
#[derive(Debug, Default)]
pub struct Configuration {
    tree: Mutex<Map<String, Value>>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration file. A missing file yields an empty configuration.
    pub fn load(path: &Path) -> VfsResult<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No configuration file found at {}", path.display());
                return Ok(Self::new());
            }
            Err(e) => return Err(VfsError::access(path.display(), e)),
        };

        match serde_json::from_str::<Value>(&data) {
            Ok(Value::Object(tree)) => {
                tracing::debug!("Loaded configuration file: {}", path.display());
                Ok(Self {
                    tree: Mutex::new(tree),
                })
            }
            Ok(_) => Err(VfsError::Config(format!(
                "{} does not contain a JSON object",
                path.display()
            ))),
            Err(e) => Err(VfsError::Config(format!("{}: {}", path.display(), e))),
        }
    }

    /// Writes the configuration next to `path` first, then renames it into place.
    pub fn save(&self, path: &Path) -> VfsResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| VfsError::access(parent.display(), e))?;
        }

        let data = {
            let tree = self.lock();
            serde_json::to_string_pretty(&*tree)
                .map_err(|e| VfsError::Config(e.to_string()))?
        };

        let temp_path = platform::sibling_with_suffix(path, &format!("tmp-{}", uuid::Uuid::new_v4()));
        std::fs::write(&temp_path, data).map_err(|e| VfsError::access(temp_path.display(), e))?;
        if let Err(e) = std::fs::rename(&temp_path, path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(VfsError::access(path.display(), e));
        }

        tracing::debug!("Wrote configuration file: {}", path.display());
        Ok(())
    }

    /// Value of `name`; when unset, `default` is stored and returned.
    pub fn get_variable_or(&self, name: &str, default: &str) -> String {
        match self.get_variable(name) {
            Some(value) => value,
            None => {
                self.set_variable(name, default);
                default.to_string()
            }
        }
    }

    /// True if the variable has a non-blank value.
    pub fn is_variable_set(&self, name: &str) -> bool {
        self.get_variable(name)
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false)
    }

    /// All variables as `(dotted name, value)` pairs, depth-first.
    pub fn variables(&self) -> Vec<(String, String)> {
        let tree = self.lock();
        let mut out = Vec::new();
        flatten("", &tree, &mut out);
        out
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Map<String, Value>> {
        // Values are plain strings; a panic mid-update cannot leave them half-written.
        self.tree.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConfigurationStore for Configuration {
    fn get_variable(&self, name: &str) -> Option<String> {
        let tree = self.lock();
        let (path, leaf) = split_name(name)?;
        let mut node = &*tree;
        for part in path {
            node = node.get(part)?.as_object()?;
        }
        node.get(leaf)?.as_str().map(str::to_string)
    }

    fn set_variable(&self, name: &str, value: &str) {
        let Some((path, leaf)) = split_name(name) else {
            return;
        };
        let mut tree = self.lock();
        let mut node = &mut *tree;
        for part in path {
            let entry = node
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            node = match entry {
                Value::Object(map) => map,
                _ => return,
            };
        }
        node.insert(leaf.to_string(), Value::String(value.to_string()));
    }

    fn remove_variable(&self, name: &str) -> Option<String> {
        let (path, leaf) = split_name(name)?;
        let mut tree = self.lock();
        remove_leaf(&mut tree, &path, leaf)
    }
}

fn split_name(name: &str) -> Option<(Vec<&str>, &str)> {
    let mut parts: Vec<&str> = name.split('.').filter(|p| !p.is_empty()).collect();
    let leaf = parts.pop()?;
    Some((parts, leaf))
}

/// Removes a leaf and prunes the folders it leaves empty.
fn remove_leaf(node: &mut Map<String, Value>, path: &[&str], leaf: &str) -> Option<String> {
    match path.split_first() {
        None => match node.remove(leaf)? {
            Value::String(value) => Some(value),
            other => {
                node.insert(leaf.to_string(), other);
                None
            }
        },
        Some((head, rest)) => {
            let child = node.get_mut(*head)?.as_object_mut()?;
            let removed = remove_leaf(child, rest, leaf);
            if child.is_empty() {
                node.remove(*head);
            }
            removed
        }
    }
}

fn flatten(prefix: &str, node: &Map<String, Value>, out: &mut Vec<(String, String)>) {
    for (key, value) in node {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(child) => flatten(&name, child, out),
            Value::String(s) => out.push((name, s.clone())),
            other => out.push((name, other.to_string())),
        }
    }
}

/// Location of the user preferences file.
pub fn preferences_path() -> PathBuf {
    platform::config_dir().join(PREFERENCES_FILENAME)
}

/// Location of the session snapshot file (history, bookmarks).
pub fn snapshot_path() -> PathBuf {
    platform::config_dir().join(SNAPSHOT_FILENAME)
}

/// Tunables of the filesystem core
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Maximum number of locations kept by the global history
    pub history_capacity: usize,

    /// Maximum matches a search collects before it stops (truncated)
    pub max_search_results: usize,

    /// Largest file whose content a search scans (bytes)
    pub max_content_scan_size: u64,

    /// Whether searches descend into symlinked folders
    pub follow_symlinks: bool,

    /// Buffer size used by copy jobs (bytes)
    pub copy_buffer_size: usize,

    /// Extension of the archive entries the self-update job keeps resident
    pub preload_extension: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            max_search_results: 10_000,
            max_content_scan_size: 50 * 1024 * 1024,
            follow_symlinks: false,
            copy_buffer_size: 64 * 1024,
            preload_extension: "class".to_string(),
        }
    }
}

impl CoreConfig {
    /// Defaults overridden by whatever the store defines.
    pub fn from_store(store: &dyn ConfigurationStore) -> Self {
        let defaults = Self::default();
        let positive = |name: &str| {
            store
                .get_integer_variable(name)
                .filter(|value| *value > 0)
        };

        Self {
            history_capacity: positive(HISTORY_CAPACITY_VARIABLE)
                .map(|v| v as usize)
                .unwrap_or(defaults.history_capacity),
            max_search_results: positive(MAX_SEARCH_RESULTS_VARIABLE)
                .map(|v| v as usize)
                .unwrap_or(defaults.max_search_results),
            max_content_scan_size: positive(MAX_CONTENT_SCAN_SIZE_VARIABLE)
                .map(|v| v as u64)
                .unwrap_or(defaults.max_content_scan_size),
            follow_symlinks: store
                .get_variable(FOLLOW_SYMLINKS_VARIABLE)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.follow_symlinks),
            copy_buffer_size: positive(COPY_BUFFER_SIZE_VARIABLE)
                .map(|v| v as usize)
                .unwrap_or(defaults.copy_buffer_size),
            preload_extension: store
                .get_variable(PRELOAD_EXTENSION_VARIABLE)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.preload_extension),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn dotted_variables_nest() {
        let conf = Configuration::new();
        conf.set_variable("history.recent_location_0", "file:///tmp");
        conf.set_variable("history.recent_locations_count", "1");

        assert_eq!(
            conf.get_variable("history.recent_location_0").as_deref(),
            Some("file:///tmp")
        );
        assert_eq!(conf.get_integer_variable("history.recent_locations_count"), Some(1));
        assert_eq!(conf.get_variable("history"), None);
        assert_eq!(conf.get_variable("history.missing"), None);
    }

    #[test]
    fn integer_variables_reject_garbage() {
        let conf = Configuration::new();
        conf.set_variable("a.b", "twelve");
        assert_eq!(conf.get_integer_variable("a.b"), None);
        assert_eq!(conf.get_integer_variable("a.c"), None);
    }

    #[test]
    fn default_is_stored_when_missing() {
        let conf = Configuration::new();
        assert_eq!(conf.get_variable_or("ui.theme", "dark"), "dark");
        assert_eq!(conf.get_variable("ui.theme").as_deref(), Some("dark"));
        assert_eq!(conf.get_variable_or("ui.theme", "light"), "dark");
        assert!(conf.is_variable_set("ui.theme"));
        conf.set_variable("ui.font", "   ");
        assert!(!conf.is_variable_set("ui.font"));
    }

    #[test]
    fn removing_last_leaf_prunes_parents() {
        let conf = Configuration::new();
        conf.set_variable("a.b.c", "1");
        assert_eq!(conf.remove_variable("a.b.c").as_deref(), Some("1"));
        assert!(conf.variables().is_empty());
        assert_eq!(conf.remove_variable("a.b.c"), None);
    }

    #[test]
    fn saves_and_loads_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("snapshot.json");

        let conf = Configuration::new();
        conf.set_variable("history.recent_location_0", "file:///a");
        conf.set_variable("bookmarks.count", "0");
        conf.save(&path).unwrap();

        let loaded = Configuration::load(&path).unwrap();
        assert_eq!(loaded.variables(), conf.variables());
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn missing_file_loads_empty_and_garbage_fails() {
        let temp = TempDir::new().unwrap();
        let missing = Configuration::load(&temp.path().join("none.json")).unwrap();
        assert!(missing.variables().is_empty());

        let bad = temp.path().join("bad.json");
        std::fs::write(&bad, "[1, 2]").unwrap();
        assert!(matches!(Configuration::load(&bad), Err(VfsError::Config(_))));
    }

    #[test]
    fn core_config_reads_overrides() {
        let conf = Configuration::new();
        conf.set_variable(HISTORY_CAPACITY_VARIABLE, "5");
        conf.set_variable(MAX_SEARCH_RESULTS_VARIABLE, "-3");
        conf.set_variable(FOLLOW_SYMLINKS_VARIABLE, "true");

        let core = CoreConfig::from_store(&conf);
        assert_eq!(core.history_capacity, 5);
        assert_eq!(core.max_search_results, CoreConfig::default().max_search_results);
        assert!(core.follow_symlinks);
        assert_eq!(core.preload_extension, "class");
    }
}
