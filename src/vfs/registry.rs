//! Scheme → provider dispatch.

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::CoreConfig;
use crate::error::{VfsError, VfsResult};
use crate::locator::{ResourceLocator, FILE_SCHEME};
use crate::search::{SearchProvider, SEARCH_SCHEME};

use super::archive::{ArchiveProvider, ARCHIVE_SCHEME};
use super::local::LocalProvider;
use super::memory::{MemoryProvider, MEMORY_SCHEME};
use super::{FileRef, InstantiationParams};

/// Turns a locator of one scheme into a file handle.
///
/// Implementations must not perform I/O here; the handle does it lazily.
pub trait ProtocolProvider: Send + Sync {
    fn get_file(
        &self,
        locator: &ResourceLocator,
        params: &InstantiationParams,
        registry: &Arc<ProtocolRegistry>,
    ) -> VfsResult<FileRef>;
}

/// One provider per scheme. Registering a scheme twice replaces the earlier
/// provider.
#[derive(Default)]
pub struct ProtocolRegistry {
    providers: DashMap<String, Arc<dyn ProtocolProvider>>,
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `file`, `zip`, `mem` and `find` providers.
    pub fn with_default_providers(config: &CoreConfig) -> Arc<Self> {
        let registry = Self::new();
        registry.register(FILE_SCHEME, LocalProvider);
        registry.register(ARCHIVE_SCHEME, ArchiveProvider::new());
        registry.register(MEMORY_SCHEME, MemoryProvider::new());
        registry.register(SEARCH_SCHEME, SearchProvider::new(config.clone()));
        Arc::new(registry)
    }

    /// Registers `provider` for `scheme`, returning the provider it replaced.
    pub fn register(
        &self,
        scheme: &str,
        provider: impl ProtocolProvider + 'static,
    ) -> Option<Arc<dyn ProtocolProvider>> {
        self.register_arc(scheme, Arc::new(provider))
    }

    pub fn register_arc(
        &self,
        scheme: &str,
        provider: Arc<dyn ProtocolProvider>,
    ) -> Option<Arc<dyn ProtocolProvider>> {
        let scheme = scheme.to_ascii_lowercase();
        let replaced = self.providers.insert(scheme.clone(), provider);
        if replaced.is_some() {
            tracing::debug!("Replaced protocol provider for scheme {}", scheme);
        }
        replaced
    }

    pub fn unregister(&self, scheme: &str) -> bool {
        self.providers.remove(&scheme.to_ascii_lowercase()).is_some()
    }

    pub fn is_registered(&self, scheme: &str) -> bool {
        self.providers.contains_key(&scheme.to_ascii_lowercase())
    }

    pub fn provider(&self, scheme: &str) -> Option<Arc<dyn ProtocolProvider>> {
        self.providers
            .get(&scheme.to_ascii_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        schemes.sort();
        schemes
    }

    /// Resolves a locator through the provider of its scheme.
    pub fn resolve(
        self: &Arc<Self>,
        locator: &ResourceLocator,
        params: &InstantiationParams,
    ) -> VfsResult<FileRef> {
        // Clone the provider out so no map shard stays locked while it runs.
        let provider = self
            .provider(locator.scheme())
            .ok_or_else(|| VfsError::UnknownScheme(locator.scheme().to_string()))?;
        provider.get_file(locator, params, self)
    }

    pub fn get_file(self: &Arc<Self>, locator: &ResourceLocator) -> VfsResult<FileRef> {
        self.resolve(locator, &InstantiationParams::new())
    }

    /// Parses then resolves.
    pub fn resolve_str(self: &Arc<Self>, locator: &str) -> VfsResult<FileRef> {
        let locator = ResourceLocator::parse(locator)?;
        self.get_file(&locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{AbstractFile, LocalFile};

    struct FixedProvider(&'static str);

    impl ProtocolProvider for FixedProvider {
        fn get_file(
            &self,
            _locator: &ResourceLocator,
            _params: &InstantiationParams,
            _registry: &Arc<ProtocolRegistry>,
        ) -> VfsResult<FileRef> {
            Ok(Arc::new(LocalFile::new(self.0)))
        }
    }

    #[test]
    fn unknown_scheme_is_reported() {
        let registry = ProtocolRegistry::with_default_providers(&CoreConfig::default());
        for scheme in ["ftp", "smb", "sftp", "webdav", "s3"] {
            let locator = ResourceLocator::parse(&format!("{}://host/a", scheme)).unwrap();
            match registry.get_file(&locator) {
                Err(VfsError::UnknownScheme(s)) => assert_eq!(s, scheme),
                other => panic!("expected UnknownScheme, got {:?}", other),
            }
        }
    }

    #[test]
    fn last_registration_wins() {
        let registry = Arc::new(ProtocolRegistry::new());
        assert!(registry.register("demo", FixedProvider("/first")).is_none());
        assert!(registry.register("DEMO", FixedProvider("/second")).is_some());

        let file = registry.resolve_str("demo:///anything").unwrap();
        assert_eq!(file.locator().path(), "/second");
        assert_eq!(registry.schemes(), vec!["demo".to_string()]);
    }

    #[test]
    fn resolution_does_not_touch_storage() {
        let registry = ProtocolRegistry::with_default_providers(&CoreConfig::default());
        for locator in [
            "file:///definitely/not/here.txt",
            "zip:///definitely/not/here.zip/a/b.class",
            "find:///definitely/not/here?pattern=*.txt",
        ] {
            let file = registry.resolve_str(locator).unwrap();
            assert!(!file.exists(), "{} should resolve lazily", locator);
        }
    }

    #[test]
    fn malformed_locator_fails_before_dispatch() {
        let registry = ProtocolRegistry::with_default_providers(&CoreConfig::default());
        assert!(matches!(
            registry.resolve_str("not a locator"),
            Err(VfsError::MalformedLocator { .. })
        ));
    }

    #[test]
    fn unregister_removes_scheme() {
        let registry = ProtocolRegistry::with_default_providers(&CoreConfig::default());
        assert!(registry.is_registered("zip"));
        assert!(registry.unregister("zip"));
        assert!(!registry.is_registered("zip"));
        assert!(matches!(
            registry.resolve_str("zip:///a.zip"),
            Err(VfsError::UnknownScheme(_))
        ));
    }
}
