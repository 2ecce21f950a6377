//! Spool directory layout.
//!
//! The spool root holds one folder per event source. Priority folders are
//! scanned first in their configured order, then every other folder in name
//! order. The dead-letter folder is never scanned.

use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use indexer_types::Settings;

/// View of the spool directory tree.
#[derive(Debug, Clone)]
pub struct SpoolDirectory {
    root: PathBuf,
    priority: Vec<String>,
    failures_folder: String,
}

impl SpoolDirectory {
    /// Create a spool view.
    pub fn new(
        root: impl Into<PathBuf>,
        priority: Vec<String>,
        failures_folder: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            priority,
            failures_folder: failures_folder.into(),
        }
    }

    /// Build from daemon settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.expanded_event_root(),
            settings.folder_order(),
            settings.failures_folder.clone(),
        )
    }

    /// Spool root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Dead-letter folder path.
    pub fn failures_dir(&self) -> PathBuf {
        self.root.join(&self.failures_folder)
    }

    /// Folders to scan, priority folders first.
    ///
    /// Symlinks are followed; a dangling link is ignored.
    pub fn ordered_folders(&self) -> io::Result<Vec<String>> {
        let mut existing = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if is_dir(&entry.path()) {
                if let Some(name) = entry.file_name().to_str() {
                    if name != self.failures_folder {
                        existing.push(name.to_string());
                    }
                }
            }
        }
        existing.sort();

        let mut ordered: Vec<String> = self
            .priority
            .iter()
            .filter(|name| existing.contains(name))
            .cloned()
            .collect();
        let remaining: Vec<String> = existing
            .into_iter()
            .filter(|name| !ordered.contains(name))
            .collect();
        ordered.extend(remaining);
        Ok(ordered)
    }

    /// Candidate spool files in scan order.
    ///
    /// A folder that cannot be read (e.g. removed mid-scan) is skipped.
    pub fn candidates(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for folder in self.ordered_folders()? {
            let dir = self.root.join(&folder);
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(folder = %dir.display(), error = %e, "Could not list spool folder");
                    continue;
                }
            };

            let mut folder_files: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .filter(|entry| is_file(&entry.path()))
                .map(|entry| entry.path())
                .collect();
            folder_files.sort();
            files.extend(folder_files);
        }
        Ok(files)
    }

    /// Move a file into the dead-letter folder, keeping its base name.
    ///
    /// An earlier failure with the same name is never overwritten; the new
    /// file gets a numeric suffix instead (`broken.log.1`, `broken.log.2`, ...).
    pub fn dead_letter(&self, path: &Path) -> io::Result<PathBuf> {
        let name = path.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file name", path.display()),
            )
        })?;
        let failures = self.failures_dir();
        std::fs::create_dir_all(&failures)?;
        let mut destination = failures.join(name);
        let mut suffix = 0u32;
        while destination.exists() {
            suffix += 1;
            let mut renamed = name.to_os_string();
            renamed.push(format!(".{}", suffix));
            destination = failures.join(renamed);
        }
        if suffix > 0 {
            warn!(
                file = %path.display(),
                destination = %destination.display(),
                "Dead-letter name already taken, using suffixed name"
            );
        }
        std::fs::rename(path, &destination)?;
        Ok(destination)
    }

    /// Remove a fully delivered file.
    pub fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

// `std::fs::metadata` follows symlinks, unlike `DirEntry::file_type`.
fn is_dir(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

fn is_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}
