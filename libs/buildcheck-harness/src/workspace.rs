//! Per-case working directory.
//!
//! Every test case gets its own temporary directory; all relative paths a
//! case mentions resolve inside it. Nothing here changes the process-wide
//! current directory, so many workspaces can be live at once.

use crate::evaluator::normalize_line_endings;
use buildcheck_common::config::PreservePolicy;
use buildcheck_common::types::Outcome;
use buildcheck_common::HarnessError;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};
use walkdir::WalkDir;

type Result<T> = std::result::Result<T, HarnessError>;

pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh, uniquely named directory under the system temp dir
    pub fn create(prefix: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .map_err(|e| HarnessError::workspace("create", std::env::temp_dir(), e))?;
        debug!(workdir = %dir.path().display(), "Created workspace");
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of `rel` inside the workspace. Absolute inputs are
    /// returned unchanged.
    pub fn workpath(&self, rel: impl AsRef<Path>) -> PathBuf {
        let rel = rel.as_ref();
        if rel.is_absolute() {
            rel.to_path_buf()
        } else {
            self.root().join(rel)
        }
    }

    pub fn exists(&self, rel: impl AsRef<Path>) -> bool {
        self.workpath(rel).exists()
    }

    /// Create a directory (and any missing parents)
    pub fn subdir(&self, rel: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.workpath(rel);
        fs::create_dir_all(&path).map_err(|e| HarnessError::workspace("subdir", &path, e))?;
        Ok(path)
    }

    pub fn write(&self, rel: impl AsRef<Path>, content: impl AsRef<[u8]>) -> Result<PathBuf> {
        let path = self.workpath(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| HarnessError::workspace("write", parent, e))?;
        }
        fs::write(&path, content).map_err(|e| HarnessError::workspace("write", &path, e))?;
        Ok(path)
    }

    pub fn read(&self, rel: impl AsRef<Path>) -> Result<Vec<u8>> {
        let path = self.workpath(rel);
        fs::read(&path).map_err(|e| HarnessError::workspace("read", &path, e))
    }

    /// Read a file as text with line endings normalized to `\n`
    pub fn read_text(&self, rel: impl AsRef<Path>) -> Result<String> {
        let bytes = self.read(rel)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(normalize_line_endings(&text).into_owned())
    }

    pub fn unlink(&self, rel: impl AsRef<Path>) -> Result<()> {
        let path = self.workpath(rel);
        fs::remove_file(&path).map_err(|e| HarnessError::workspace("unlink", &path, e))
    }

    /// Copy a fixture directory's contents into the workspace root
    pub fn copy_fixture(&self, src: &Path) -> Result<usize> {
        let mut copied = 0;
        for entry in WalkDir::new(src).follow_links(true) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
                HarnessError::workspace("copy", path, e.into())
            })?;
            let rel = entry
                .path()
                .strip_prefix(src)
                .map_err(|e| {
                    HarnessError::workspace(
                        "copy",
                        entry.path(),
                        std::io::Error::new(std::io::ErrorKind::Other, e),
                    )
                })?;
            let dest = self.workpath(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&dest).map_err(|e| HarnessError::workspace("copy", &dest, e))?;
            } else {
                fs::copy(entry.path(), &dest).map_err(|e| HarnessError::workspace("copy", &dest, e))?;
                copied += 1;
            }
        }
        debug!(src = %src.display(), files = copied, "Copied fixture into workspace");
        Ok(copied)
    }

    /// Move `from` to `to` inside the workspace, creating `to`'s parents
    pub fn relocate(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<PathBuf> {
        let src = self.workpath(from);
        let dest = self.workpath(to);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| HarnessError::workspace("relocate", parent, e))?;
        }
        fs::rename(&src, &dest).map_err(|e| HarnessError::workspace("relocate", &src, e))?;
        debug!(from = %src.display(), to = %dest.display(), "Relocated directory");
        Ok(dest)
    }

    /// Dispose of the workspace according to `policy`. Returns the path
    /// when the directory was kept.
    pub fn finish(self, outcome: Outcome, policy: &PreservePolicy) -> Option<PathBuf> {
        if policy.preserves(outcome) {
            #[allow(deprecated)]
            let kept = self.dir.into_path();
            info!(workdir = %kept.display(), outcome = %outcome, "Preserved directory");
            Some(kept)
        } else {
            // TempDir removes the tree on drop
            None
        }
    }
}
