//! Scratch directory for one pipeline run.
//!
//! All intermediate artifacts (decoded certificates, exportOptions.plist,
//! the archive, intermediate DMGs, the generated appcast) live under
//! `~/Library/Developer/sparklecast/build`. The directory is cleared and
//! recreated at process start and deliberately left behind on exit so a
//! failed run can be inspected.

use crate::error::{Error, Result};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Handle to the run-scoped build directory.
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Default location under the user's home directory.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::validation("could not determine the home directory"))?;
        Ok(home.join("Library/Developer/sparklecast/build"))
    }

    /// Clear any stale contents and (re)create the directory at `root`.
    pub async fn create(root: PathBuf) -> Result<Self> {
        match fs::remove_dir_all(&root).await {
            Ok(()) => log::debug!("Cleaned up the build directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        fs::create_dir_all(&root).await?;
        log::debug!("Created the build directory at {}", root.display());

        Ok(Self { root })
    }

    /// Root of the build directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for a named intermediate file (not created).
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Create and return a named subdirectory.
    pub async fn subdirectory(&self, name: &str) -> Result<PathBuf> {
        let path = self.root.join(name);
        fs::create_dir_all(&path).await?;
        Ok(path)
    }

    /// Write a named intermediate file and return its path.
    pub async fn write_file(&self, name: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = self.file_path(name);
        fs::write(&path, contents).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_clears_stale_contents() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("build");

        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("stale.dmg"), b"old").unwrap();

        let workdir = WorkDir::create(root.clone()).await.unwrap();
        assert!(workdir.root().is_dir());
        assert!(!root.join("stale.dmg").exists());
    }

    #[tokio::test]
    async fn write_file_and_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = WorkDir::create(dir.path().join("build")).await.unwrap();

        let file = workdir.write_file("exportOptions.plist", b"<plist/>").await.unwrap();
        assert_eq!(std::fs::read(&file).unwrap(), b"<plist/>");

        let sub = workdir.subdirectory("exported_app").await.unwrap();
        assert!(sub.is_dir());
    }
}
