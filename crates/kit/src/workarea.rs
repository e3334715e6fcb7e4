//! The per-run scratch directory.
//!
//! Downloads and everything unpacked from them live here and nowhere else.
//! The directory is removed by [`WorkArea::close`] or, failing that, when the
//! value is dropped, which also covers early returns and unwinding.

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use crate::error::{ProvisionError, Result};

const PREFIX: &str = "vmprov-";

#[derive(Debug)]
pub struct WorkArea {
    dir: TempDir,
    path: Utf8PathBuf,
}

impl WorkArea {
    /// Create a fresh directory under `parent`, or the system temp dir.
    pub fn create(parent: Option<&Utf8Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(PREFIX);
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(ProvisionError::WorkArea)?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .map_err(ProvisionError::WorkArea)?;
        let path = Utf8PathBuf::from_path_buf(dir.path().to_owned()).map_err(|p| {
            ProvisionError::WorkArea(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("work area path is not UTF-8: {}", p.display()),
            ))
        })?;
        tracing::debug!("Created work area {path}");
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Create a new, empty directory inside the work area named after `label`.
    /// A numeric suffix is added if the name is taken.
    pub fn scratch_dir(&self, label: &str) -> Result<Utf8PathBuf> {
        let mut n = 1u32;
        loop {
            let candidate = self.path.join(format!("{label}-{n}"));
            match std::fs::create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(ProvisionError::WorkArea(e)),
            }
        }
    }

    /// Remove the directory now, reporting failure.
    pub fn close(self) -> std::io::Result<()> {
        tracing::debug!("Removing work area {}", self.path);
        self.dir.close()
    }
}
