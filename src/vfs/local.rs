//! Local filesystem files (`file://`).

use std::any::Any;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{VfsError, VfsResult};
use crate::locator::ResourceLocator;
use crate::platform;

use super::{
    sort_listing, AbstractFile, Capabilities, FileAttributes, FileKind, FileRef,
    InstantiationParams, ProtocolProvider, ProtocolRegistry,
};

#[derive(Debug, Clone)]
pub struct LocalFile {
    locator: ResourceLocator,
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let locator = ResourceLocator::from_path(path.as_ref());
        let path = locator
            .to_local_path()
            .unwrap_or_else(|| path.as_ref().to_path_buf());
        Self { locator, path }
    }

    pub fn from_locator(locator: &ResourceLocator) -> VfsResult<Self> {
        match locator.authority() {
            None | Some("localhost") => {}
            Some(_) => return Err(VfsError::unsupported("remote host", locator)),
        }
        let path = locator
            .to_local_path()
            .ok_or_else(|| VfsError::unsupported("local path", locator))?;
        Ok(Self {
            locator: locator.without_query(),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AbstractFile for LocalFile {
    fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    fn name(&self) -> String {
        self.locator.filename().unwrap_or("/").to_string()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    fn attributes(&self) -> VfsResult<FileAttributes> {
        let link_metadata =
            fs::symlink_metadata(&self.path).map_err(|e| VfsError::from_io(&self.locator, e))?;
        let symlink = link_metadata.file_type().is_symlink();
        // A dangling link still has attributes of its own.
        let metadata = fs::metadata(&self.path).unwrap_or(link_metadata);

        let kind = if metadata.is_dir() {
            FileKind::Directory
        } else {
            FileKind::File
        };

        Ok(FileAttributes {
            kind,
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified: metadata.modified().ok(),
            hidden: platform::is_hidden(&self.path),
            symlink,
            permissions: Some(platform::format_permissions(&metadata)),
        })
    }

    fn is_browsable(&self) -> bool {
        self.path.is_dir()
    }

    fn exists(&self) -> bool {
        fs::symlink_metadata(&self.path).is_ok()
    }

    fn parent(&self) -> Option<FileRef> {
        let parent = self.locator.parent()?;
        let path = parent.to_local_path()?;
        Some(Arc::new(LocalFile {
            locator: parent,
            path,
        }))
    }

    fn ls(&self) -> VfsResult<Vec<FileRef>> {
        if !self.path.is_dir() {
            if !self.path.exists() {
                return Err(VfsError::not_found(&self.locator));
            }
            return Err(VfsError::not_a_directory(&self.locator));
        }

        let read_dir = fs::read_dir(&self.path).map_err(|e| VfsError::access(&self.locator, e))?;
        let mut entries: Vec<FileRef> = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| VfsError::access(&self.locator, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            entries.push(Arc::new(LocalFile {
                locator: self.locator.child(&name),
                path: entry.path(),
            }));
        }
        sort_listing(&mut entries);
        Ok(entries)
    }

    fn child(&self, name: &str) -> VfsResult<FileRef> {
        let locator = self.locator.child(name);
        let path = locator
            .to_local_path()
            .ok_or_else(|| VfsError::unsupported("local path", &locator))?;
        Ok(Arc::new(LocalFile { locator, path }))
    }

    fn open_read(&self) -> VfsResult<Box<dyn Read + Send>> {
        if self.path.is_dir() {
            return Err(VfsError::unsupported("read of a folder", &self.locator));
        }
        let file = fs::File::open(&self.path).map_err(|e| VfsError::from_io(&self.locator, e))?;
        Ok(Box::new(file))
    }

    fn open_write(&self) -> VfsResult<Box<dyn Write + Send>> {
        let file = fs::File::create(&self.path).map_err(|e| VfsError::from_io(&self.locator, e))?;
        Ok(Box::new(file))
    }

    fn open_append(&self) -> VfsResult<Box<dyn Write + Send>> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| VfsError::from_io(&self.locator, e))?;
        Ok(Box::new(file))
    }

    fn mkdir(&self) -> VfsResult<()> {
        if self.path.exists() {
            return Err(VfsError::AlreadyExists(self.locator.to_string()));
        }
        fs::create_dir_all(&self.path).map_err(|e| VfsError::access(&self.locator, e))
    }

    fn delete(&self) -> VfsResult<()> {
        let metadata =
            fs::symlink_metadata(&self.path).map_err(|e| VfsError::from_io(&self.locator, e))?;
        let result = if metadata.is_dir() {
            fs::remove_dir_all(&self.path)
        } else {
            fs::remove_file(&self.path)
        };
        result.map_err(|e| VfsError::access(&self.locator, e))
    }

    fn rename_to(&self, destination: &dyn AbstractFile) -> VfsResult<()> {
        let target = destination
            .local_path()
            .ok_or_else(|| VfsError::unsupported("rename across stores", destination.locator()))?;
        fs::rename(&self.path, &target).map_err(|e| VfsError::access(&self.locator, e))
    }

    fn local_path(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Provider for `file://` locators. Only the local host is reachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalProvider;

impl ProtocolProvider for LocalProvider {
    fn get_file(
        &self,
        locator: &ResourceLocator,
        _params: &InstantiationParams,
        _registry: &Arc<ProtocolRegistry>,
    ) -> VfsResult<FileRef> {
        Ok(Arc::new(LocalFile::from_locator(locator)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::read_all;

    #[test]
    fn lists_folders_first_then_by_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("A.txt"), "a").unwrap();
        fs::create_dir(dir.path().join("zdir")).unwrap();

        let root = LocalFile::new(dir.path());
        let names: Vec<String> = root.ls().unwrap().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["zdir", "A.txt", "b.txt"]);
    }

    #[test]
    fn attributes_report_kind_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("data.bin");
        fs::write(&file_path, [0u8; 42]).unwrap();

        let file = LocalFile::new(&file_path);
        let attrs = file.attributes().unwrap();
        assert_eq!(attrs.kind, FileKind::File);
        assert_eq!(attrs.size, 42);
        assert!(attrs.modified.is_some());
        assert!(!file.is_browsable());

        let folder = LocalFile::new(dir.path());
        assert!(folder.attributes().unwrap().is_dir());
        assert!(folder.is_browsable());
    }

    #[test]
    fn missing_file_maps_to_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let file = LocalFile::new(dir.path().join("nope"));
        assert!(!file.exists());
        assert!(matches!(file.attributes(), Err(VfsError::NotFound(_))));
        assert!(matches!(file.ls(), Err(VfsError::NotFound(_))));
    }

    #[test]
    fn ls_on_a_file_is_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "x").unwrap();
        assert!(matches!(
            LocalFile::new(&path).ls(),
            Err(VfsError::NotADirectory(_))
        ));
    }

    #[test]
    fn write_append_read() {
        let dir = tempfile::tempdir().unwrap();
        let root = LocalFile::new(dir.path());
        let file = root.child("notes.txt").unwrap();

        file.open_write().unwrap().write_all(b"hello").unwrap();
        file.open_append().unwrap().write_all(b" world").unwrap();
        assert_eq!(read_all(file.as_ref()).unwrap(), b"hello world");
    }

    #[test]
    fn rename_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let root = LocalFile::new(dir.path());
        let sub = root.child("sub").unwrap();
        sub.mkdir().unwrap();
        assert!(matches!(sub.mkdir(), Err(VfsError::AlreadyExists(_))));

        let from = sub.child("a.txt").unwrap();
        from.open_write().unwrap().write_all(b"a").unwrap();
        let to = root.child("b.txt").unwrap();
        from.rename_to(to.as_ref()).unwrap();
        assert!(!from.exists());
        assert!(to.exists());

        sub.delete().unwrap();
        assert!(!sub.exists());
    }

    #[test]
    fn parent_is_derived_from_locator() {
        let file = LocalFile::new("/var/log/syslog");
        let parent = file.parent().unwrap();
        assert_eq!(parent.locator().to_string(), "file:///var/log");
        assert!(LocalFile::new("/").parent().is_none());
    }

    #[test]
    fn remote_authority_is_rejected() {
        let locator = ResourceLocator::parse("file://server/share/x").unwrap();
        assert!(matches!(
            LocalFile::from_locator(&locator),
            Err(VfsError::Unsupported { .. })
        ));
        let local = ResourceLocator::parse("file://localhost/tmp").unwrap();
        assert_eq!(
            LocalFile::from_locator(&local).unwrap().path(),
            Path::new("/tmp")
        );
    }
}
