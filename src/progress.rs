//! Durable batch progress checkpoint.
//!
//! The checkpoint is a plain text file holding one integer: the index of the
//! next account to process. A missing file means a fresh run (index 0); a file
//! that holds anything but an integer is a hard error, because silently
//! restarting from 0 would re-run accounts that already completed.
//!
//! Writes go through a temporary file in the same directory followed by a
//! rename, so a crash mid-write leaves the previous checkpoint intact.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// File-backed store for the next-account index.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    /// Creates a store backed by the given file path.
    ///
    /// The file is not touched until the first [`save`](Self::save).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted next-account index.
    ///
    /// Returns 0 when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptCheckpoint`] when the file exists but does not
    /// hold a single integer, and [`Error::Progress`] for I/O failures other
    /// than the file being absent.
    #[instrument(name = "ProgressStore::load", skip(self), fields(path = %self.path.display()))]
    pub async fn load(&self) -> Result<usize> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No checkpoint file, starting from index 0");
                return Ok(0);
            }
            Err(source) => {
                return Err(Error::Progress {
                    path: self.path.display().to_string(),
                    source,
                })
            }
        };

        let index = content
            .trim()
            .parse()
            .map_err(|_| Error::CorruptCheckpoint {
                path: self.path.display().to_string(),
                content: content.trim().to_string(),
            })?;

        debug!(index, "Loaded checkpoint");
        Ok(index)
    }

    /// Persists `index` as the next account to process.
    ///
    /// The write is atomic with respect to crashes: a temporary file in the
    /// checkpoint's directory is written and fsynced, then renamed over the
    /// target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Progress`] for any I/O failure.
    #[instrument(
        name = "ProgressStore::save",
        skip(self),
        fields(path = %self.path.display(), index = index)
    )]
    pub async fn save(&self, index: usize) -> Result<()> {
        let io_err = |source| Error::Progress {
            path: self.path.display().to_string(),
            source,
        };

        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let mut file = tokio::fs::File::create(&tmp_path).await.map_err(io_err)?;
        file.write_all(index.to_string().as_bytes())
            .await
            .map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(io_err)?;

        debug!("Checkpoint saved");
        Ok(())
    }
}
