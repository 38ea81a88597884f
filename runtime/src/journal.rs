//! JSONL run journal: one line per account per run.
//!
//! - Append-only JSONL, easy to grep or feed to `jq`
//! - Rotates when the file exceeds `MAX_JOURNAL_SIZE` (5 MB)
//! - Rotated files named `.1`, `.2`, ... (max 3 kept)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Maximum journal size before rotation (5 MB).
const MAX_JOURNAL_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum number of rotated journals to keep.
const MAX_ROTATIONS: u32 = 3;

/// What happened to one account during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: String,
    pub run_id: String,
    pub account: String,
    pub student: String,
    /// Strategy that produced the token, if any.
    pub strategy: Option<String>,
    /// `api`, `scrape`, or absent when nothing was fetched.
    pub channel: Option<String>,
    pub api_outcome: Option<String>,
    pub fetched: Option<usize>,
    pub new_items: usize,
    pub pruned: usize,
    pub notified: bool,
    pub status: String,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Append-only JSONL journal with rotation.
pub struct Journal {
    file: File,
    path: PathBuf,
    /// Approximate current size (re-checked on rotation).
    current_size: u64,
}

impl Journal {
    /// Open or create the journal file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open journal: {}", path.display()))?;

        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            current_size,
        })
    }

    pub fn record(&mut self, entry: &JournalEntry) -> Result<()> {
        if self.current_size >= MAX_JOURNAL_SIZE {
            self.rotate()?;
        }

        let json = serde_json::to_string(entry)?;
        writeln!(self.file, "{json}")?;
        self.current_size += json.len() as u64 + 1;
        Ok(())
    }

    /// Rotate: journal.jsonl → journal.jsonl.1, .1 → .2, etc.
    fn rotate(&mut self) -> Result<()> {
        self.file.flush()?;

        let oldest = rotation_path(&self.path, MAX_ROTATIONS);
        if oldest.exists() {
            let _ = std::fs::remove_file(&oldest);
        }
        for i in (1..MAX_ROTATIONS).rev() {
            let from = rotation_path(&self.path, i);
            if from.exists() {
                let _ = std::fs::rename(&from, rotation_path(&self.path, i + 1));
            }
        }
        let _ = std::fs::rename(&self.path, rotation_path(&self.path, 1));

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("failed to reopen journal after rotation")?;
        self.current_size = 0;

        Ok(())
    }
}

/// The last `limit` readable entries of the current journal file.
pub fn read_recent(path: &Path, limit: usize) -> Vec<JournalEntry> {
    let Ok(file) = File::open(path) else {
        return Vec::new();
    };
    let entries: Vec<JournalEntry> = BufReader::new(file)
        .lines()
        .map_while(|l| l.ok())
        .filter_map(|l| serde_json::from_str(&l).ok())
        .collect();
    let skip = entries.len().saturating_sub(limit);
    entries.into_iter().skip(skip).collect()
}

/// Build path for a rotated journal: `journal.jsonl.1`, `journal.jsonl.2`, etc.
fn rotation_path(base: &Path, index: u32) -> PathBuf {
    let name = format!(
        "{}.{index}",
        base.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("journal.jsonl")
    );
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(account: &str) -> JournalEntry {
        JournalEntry {
            timestamp: "2024-01-10T12:00:00+02:00".into(),
            run_id: "r1".into(),
            account: account.into(),
            student: "Noa".into(),
            strategy: Some("cached_token".into()),
            channel: Some("api".into()),
            api_outcome: Some("success".into()),
            fetched: Some(2),
            new_items: 2,
            pruned: 0,
            notified: true,
            status: "ok".into(),
            error: None,
            duration_ms: 120,
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let mut j = Journal::open(&path).unwrap();
        j.record(&entry("a")).unwrap();
        j.record(&entry("b")).unwrap();
        drop(j);

        let mut j = Journal::open(&path).unwrap();
        j.record(&entry("c")).unwrap();

        let recent = read_recent(&path, 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].account, "b");
        assert_eq!(recent[1].account, "c");
    }

    #[test]
    fn test_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let mut j = Journal::open(&path).unwrap();
        j.current_size = MAX_JOURNAL_SIZE;
        j.record(&entry("after")).unwrap();

        assert!(rotation_path(&path, 1).exists());
        let recent = read_recent(&path, 10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].account, "after");
    }

    #[test]
    fn test_rotation_path() {
        let p = rotation_path(Path::new("/tmp/journal.jsonl"), 2);
        assert_eq!(p, PathBuf::from("/tmp/journal.jsonl.2"));
    }
}
