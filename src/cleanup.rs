use log::debug;
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

/// RAII guard that removes a staging directory when dropped, unless the
/// operation that owns it succeeded.
pub struct StagingGuard<'a, R: Runtime + ?Sized> {
    runtime: &'a R,
    path: PathBuf,
    armed: bool,
}

impl<'a, R: Runtime + ?Sized> StagingGuard<'a, R> {
    pub fn new(runtime: &'a R, path: PathBuf) -> Self {
        Self {
            runtime,
            path,
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark the operation as successful; nothing is removed on drop.
    pub fn success(mut self) {
        self.armed = false;
    }
}

impl<R: Runtime + ?Sized> Drop for StagingGuard<'_, R> {
    fn drop(&mut self) {
        if !self.armed || !self.runtime.exists(&self.path) {
            return;
        }
        debug!("Cleaning up: {:?}", self.path);
        if let Err(e) = self.runtime.remove_dir_all(&self.path) {
            debug!("Failed to clean up {:?}: {}", self.path, e);
        }
    }
}
