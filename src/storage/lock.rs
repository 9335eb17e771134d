//! Exclusive run lock shared by every process using the same storage
//! directory.
//!
//! The lock is an advisory lock on `run.lock`; it is released when the
//! guard is dropped or the holding process exits.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fd_lock::RwLock;

use crate::error::{AppError, Result};

pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open (creating if needed) the lock file. Locking happens on the
    /// returned handle.
    pub fn open(&self) -> Result<RwLock<File>> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.error(e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)
            .map_err(|e| self.error(e))?;
        Ok(RwLock::new(file))
    }

    pub fn error(&self, error: impl std::fmt::Display) -> AppError {
        AppError::persistence(self.path.display().to_string(), error)
    }
}
