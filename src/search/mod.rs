//! File search exposed as a browsable folder (`find://`).
//!
//! `find://home/user?pattern=*.txt&content=TODO` resolves to a [`SearchFile`]
//! searching `/home/user`. Nothing runs until the folder is listed or
//! started; a worker thread then walks the tree depth-first and appends
//! matches as it finds them.

mod file;
mod matcher;
mod options;


use std::sync::Arc;

use crate::config::CoreConfig;
use crate::error::VfsResult;
use crate::locator::ResourceLocator;
use crate::vfs::{FileRef, InstantiationParams, ProtocolProvider, ProtocolRegistry};

pub use file::{SearchError, SearchEvent, SearchFile, SearchState, SearchStatus};
pub use matcher::FileMatcher;
pub use options::{search_root, SearchOptions};

pub const SEARCH_SCHEME: &str = "find";

#[derive(Debug, Clone)]
pub struct SearchProvider {
    config: CoreConfig,
}

impl SearchProvider {
    pub fn new(config: CoreConfig) -> Self {
        Self { config }
    }
}

impl ProtocolProvider for SearchProvider {
    /// Validates the options and builds an idle search; invalid options are
    /// reported here rather than when the search runs.
    fn get_file(
        &self,
        locator: &ResourceLocator,
        params: &InstantiationParams,
        registry: &Arc<ProtocolRegistry>,
    ) -> VfsResult<FileRef> {
        let options = SearchOptions::from_locator(locator, params, &self.config)?;
        let root = search_root(locator)?;
        let search = SearchFile::new(
            locator.clone(),
            root,
            options,
            self.config.clone(),
            Arc::clone(registry),
        )?;
        Ok(Arc::new(search))
    }
}
