//! Operator-supplied tokens.
//!
//! Someone who logged in by hand pastes the token into a plain-text file.
//! Only the first non-empty line is used.

use std::path::{Path, PathBuf};

use super::extract::normalize_token;

/// Reads a token from the side-channel file.
#[derive(Debug, Clone)]
pub struct ManualTokenSource {
    path: PathBuf,
}

impl ManualTokenSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The token, or `None` when the file is missing, unreadable, or blank.
    pub fn read(&self) -> Option<String> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "cannot read manual token file: {e}");
                return None;
            }
        };
        text.lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'))
            .map(normalize_token)
            .filter(|t| !t.is_empty())
    }
}
