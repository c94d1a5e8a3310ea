use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::models::Session;

/// Keeps the signed-in session on disk between CLI invocations.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nobody has logged in yet.
    pub fn load(&self) -> Result<Option<Session>, AppError> {
        if !self.path.exists() {
            debug!(path = ?self.path, "No stored session.");
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        let session: Session = toml::from_str(&contents)?;
        Ok(Some(session))
    }

    pub fn save(&self, session: &Session) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(session)?;
        fs::write(&self.path, contents)?;
        info!(path = ?self.path, user_id = %session.user.id, "Saved session.");
        Ok(())
    }

    /// Removes the stored session and hands back whatever was readable. An
    /// unreadable file is still removed.
    pub fn take(&self) -> Result<Option<Session>, AppError> {
        let session = self.load().unwrap_or_else(|e| {
            warn!(path = ?self.path, error = %e, "Stored session is unreadable; discarding it.");
            None
        });
        self.clear()?;
        Ok(session)
    }

    pub fn clear(&self) -> Result<(), AppError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = ?self.path, "Cleared stored session.");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
