//! Platform helpers: hidden files, permission strings, config location and
//! the relaunch strategy used after a self-update.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Per-user configuration directory.
pub fn config_dir() -> PathBuf {
    dirs_next::config_dir()
        .or_else(dirs_next::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mucommander")
}

#[cfg(unix)]
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(windows)]
pub fn is_hidden(path: &Path) -> bool {
    use std::os::windows::fs::MetadataExt;
    if let Ok(metadata) = path.metadata() {
        const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
        return metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0;
    }
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(unix)]
pub fn format_permissions(metadata: &std::fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;

    let mode = metadata.permissions().mode();
    format_mode(mode)
}

#[cfg(windows)]
pub fn format_permissions(metadata: &std::fs::Metadata) -> String {
    let readonly = metadata.permissions().readonly();
    if readonly { "r--" } else { "rw-" }.to_string()
}

/// `rwxr-x---` style rendering of the low nine mode bits.
pub fn format_mode(mode: u32) -> String {
    let user = format_rwx((mode >> 6) & 0o7);
    let group = format_rwx((mode >> 3) & 0o7);
    let other = format_rwx(mode & 0o7);

    format!("{}{}{}", user, group, other)
}

fn format_rwx(bits: u32) -> String {
    format!(
        "{}{}{}",
        if bits & 4 != 0 { "r" } else { "-" },
        if bits & 2 != 0 { "w" } else { "-" },
        if bits & 1 != 0 { "x" } else { "-" },
    )
}

/// `name.suffix` next to `path`.
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut file_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| OsString::from("file"));
    file_name.push(".");
    file_name.push(suffix);
    path.with_file_name(file_name)
}

/// Starts a new application instance and ends the current one after the
/// installed archive has been replaced.
pub trait Relauncher: Send + Sync {
    fn relaunch(&self, installed_archive: &Path) -> std::io::Result<()>;

    /// Ends the current instance. Called even when `relaunch` failed.
    fn shutdown(&self);
}

/// Relaunches through the OS: the enclosing `.app` bundle on macOS, a
/// launcher executable next to the archive on Windows, the current executable
/// elsewhere.
#[derive(Debug, Clone)]
pub struct ProcessRelauncher {
    launcher_name: String,
}

impl ProcessRelauncher {
    pub fn new(launcher_name: impl Into<String>) -> Self {
        Self {
            launcher_name: launcher_name.into(),
        }
    }

    fn relaunch_command(&self, installed_archive: &Path) -> std::io::Result<Command> {
        if cfg!(target_os = "macos") {
            if let Some(app) = enclosing_app_bundle(installed_archive) {
                let app = app.display().to_string();
                let mut command = Command::new("/bin/sh");
                // open -W waits for the running bundle to exit before reopening it
                command
                    .arg("-c")
                    .arg(format!("open -W \"{}\" && open \"{}\"", app, app));
                return Ok(command);
            }
        }

        if cfg!(windows) {
            if let Some(parent) = installed_archive.parent() {
                let launcher = parent.join(format!("{}.exe", self.launcher_name));
                if launcher.is_file() {
                    return Ok(Command::new(launcher));
                }
            }
        }

        let exe = std::env::current_exe()?;
        let mut command = Command::new(exe);
        command.args(std::env::args_os().skip(1));
        Ok(command)
    }
}

impl Relauncher for ProcessRelauncher {
    fn relaunch(&self, installed_archive: &Path) -> std::io::Result<()> {
        let mut command = self.relaunch_command(installed_archive)?;
        tracing::info!("Relaunching after update: {:?}", command);
        command.spawn().map(|_| ())
    }

    fn shutdown(&self) {
        tracing::info!("Shutting down for update");
        std::process::exit(0);
    }
}

/// `Foo.app` when the archive sits in `Foo.app/Contents/Resources/Java/`.
pub fn enclosing_app_bundle(installed_archive: &Path) -> Option<PathBuf> {
    let java = installed_archive.parent()?;
    let resources = java.parent()?;
    let contents = resources.parent()?;
    let app = contents.parent()?;

    let named = |path: &Path, name: &str| path.file_name().map(|n| n == name).unwrap_or(false);
    let is_app = app
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("app"))
        .unwrap_or(false);

    if named(java, "Java") && named(resources, "Resources") && named(contents, "Contents") && is_app
    {
        Some(app.to_path_buf())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_bits_render_like_ls() {
        assert_eq!(format_mode(0o754), "rwxr-xr--");
        assert_eq!(format_mode(0o100600), "rw-------");
    }

    #[cfg(unix)]
    #[test]
    fn dotfiles_are_hidden() {
        assert!(is_hidden(Path::new("/home/user/.bashrc")));
        assert!(!is_hidden(Path::new("/home/user/notes.txt")));
    }

    #[test]
    fn sibling_suffix_keeps_folder() {
        let sibling = sibling_with_suffix(Path::new("/opt/app/core.jar"), "tmp-1");
        assert_eq!(sibling, PathBuf::from("/opt/app/core.jar.tmp-1"));
    }

    #[test]
    fn finds_app_bundle_around_archive() {
        let archive = Path::new("/Applications/muCommander.app/Contents/Resources/Java/mucommander.jar");
        assert_eq!(
            enclosing_app_bundle(archive),
            Some(PathBuf::from("/Applications/muCommander.app"))
        );
        assert_eq!(enclosing_app_bundle(Path::new("/opt/mucommander/mucommander.jar")), None);
    }
}
