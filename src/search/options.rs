//! Search options carried in the `find://` locator query.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::CoreConfig;
use crate::error::{VfsError, VfsResult};
use crate::locator::{ResourceLocator, FILE_SCHEME};
use crate::vfs::InstantiationParams;

pub const PATTERN_OPTION: &str = "pattern";
pub const CASE_SENSITIVE_OPTION: &str = "case_sensitive";
pub const CONTENT_OPTION: &str = "content";
pub const CONTENT_CASE_SENSITIVE_OPTION: &str = "content_case_sensitive";
pub const DEPTH_OPTION: &str = "depth";
pub const SUBFOLDERS_OPTION: &str = "subfolders";
pub const HIDDEN_OPTION: &str = "hidden";
pub const ARCHIVES_OPTION: &str = "archives";
pub const FOLDERS_OPTION: &str = "folders";
pub const MAX_RESULTS_OPTION: &str = "max_results";
/// Escaped locator of a non-local search root.
pub const ROOT_OPTION: &str = "root";

const KNOWN_OPTIONS: &[&str] = &[
    PATTERN_OPTION,
    CASE_SENSITIVE_OPTION,
    CONTENT_OPTION,
    CONTENT_CASE_SENSITIVE_OPTION,
    DEPTH_OPTION,
    SUBFOLDERS_OPTION,
    HIDDEN_OPTION,
    ARCHIVES_OPTION,
    FOLDERS_OPTION,
    MAX_RESULTS_OPTION,
    ROOT_OPTION,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchOptions {
    pub pattern: String,
    pub case_sensitive: bool,
    pub content: Option<String>,
    pub content_case_sensitive: bool,
    /// Deepest level descended into; 0 keeps the search to the root's children.
    pub depth: Option<usize>,
    pub subfolders: bool,
    pub hidden: bool,
    pub archives: bool,
    pub folders: bool,
    pub max_results: usize,
    /// Query keys with no meaning to the search itself.
    pub extra: BTreeMap<String, String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            pattern: "*".to_string(),
            case_sensitive: false,
            content: None,
            content_case_sensitive: false,
            depth: None,
            subfolders: true,
            hidden: true,
            archives: false,
            folders: true,
            max_results: CoreConfig::default().max_search_results,
            extra: BTreeMap::new(),
        }
    }
}

impl SearchOptions {
    /// Reads options from the locator query, falling back to `params`, then to
    /// the defaults.
    pub fn from_locator(
        locator: &ResourceLocator,
        params: &InstantiationParams,
        config: &CoreConfig,
    ) -> VfsResult<Self> {
        let lookup = |key: &str| -> Option<&str> {
            locator
                .query_param(key)
                .or_else(|| params.get(key).map(String::as_str))
        };

        let mut options = Self {
            max_results: config.max_search_results,
            ..Self::default()
        };

        if let Some(pattern) = lookup(PATTERN_OPTION) {
            if pattern.is_empty() {
                return Err(VfsError::invalid_query(PATTERN_OPTION, pattern, "empty pattern"));
            }
            options.pattern = pattern.to_string();
        }
        if let Some(value) = lookup(CASE_SENSITIVE_OPTION) {
            options.case_sensitive = parse_bool(CASE_SENSITIVE_OPTION, value)?;
        }
        if let Some(content) = lookup(CONTENT_OPTION) {
            options.content = Some(content.to_string()).filter(|c| !c.is_empty());
        }
        if let Some(value) = lookup(CONTENT_CASE_SENSITIVE_OPTION) {
            options.content_case_sensitive = parse_bool(CONTENT_CASE_SENSITIVE_OPTION, value)?;
        }
        if let Some(value) = lookup(DEPTH_OPTION) {
            options.depth = Some(parse_count(DEPTH_OPTION, value)?);
        }
        if let Some(value) = lookup(SUBFOLDERS_OPTION) {
            options.subfolders = parse_bool(SUBFOLDERS_OPTION, value)?;
        }
        if let Some(value) = lookup(HIDDEN_OPTION) {
            options.hidden = parse_bool(HIDDEN_OPTION, value)?;
        }
        if let Some(value) = lookup(ARCHIVES_OPTION) {
            options.archives = parse_bool(ARCHIVES_OPTION, value)?;
        }
        if let Some(value) = lookup(FOLDERS_OPTION) {
            options.folders = parse_bool(FOLDERS_OPTION, value)?;
        }
        if let Some(value) = lookup(MAX_RESULTS_OPTION) {
            let max = parse_count(MAX_RESULTS_OPTION, value)?;
            if max == 0 {
                return Err(VfsError::invalid_query(MAX_RESULTS_OPTION, value, "must be positive"));
            }
            options.max_results = max;
        }

        options.extra = locator
            .query()
            .iter()
            .filter(|(key, _)| !KNOWN_OPTIONS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(options)
    }
}

/// Folder a `find://` locator searches.
///
/// `root=` selects any locator; otherwise the authority and path name a local
/// folder, so `find://home/user` searches `/home/user`.
pub fn search_root(locator: &ResourceLocator) -> VfsResult<ResourceLocator> {
    if let Some(raw) = locator.query_param(ROOT_OPTION) {
        return ResourceLocator::parse(raw)
            .map_err(|e| VfsError::invalid_query(ROOT_OPTION, raw, e.to_string()));
    }

    let mut path = String::new();
    if let Some(authority) = locator.authority() {
        path.push('/');
        path.push_str(authority);
    }
    path.push_str(&locator.path());
    ResourceLocator::from_parts(FILE_SCHEME, None, &path)
}

fn parse_bool(key: &str, value: &str) -> VfsResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(VfsError::invalid_query(key, value, "expected true or false")),
    }
}

fn parse_count(key: &str, value: &str) -> VfsResult<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| VfsError::invalid_query(key, value, "expected a non-negative integer"))
}
