//! Filesystem core of a dual-pane file manager.
//!
//! Resources are addressed by [`ResourceLocator`]s (`file:///home/user`,
//! `zip:///tmp/app.jar/META-INF`, `find://home?pattern=*.rs`) and resolved by
//! the [`ProtocolRegistry`] into [`FileRef`] handles. Background jobs copy,
//! move and download files between any of them; the global history remembers
//! where the user has been.

pub mod config;
pub mod error;
pub mod history;
pub mod job;
pub mod locator;
pub mod platform;
pub mod search;
pub mod vfs;

pub use config::{Configuration, ConfigurationStore, CoreConfig};
pub use error::{VfsError, VfsResult};
pub use history::{GlobalLocationHistory, LocationObserver};
pub use locator::ResourceLocator;
pub use vfs::{AbstractFile, FileRef, ProtocolProvider, ProtocolRegistry};
