//! JSON persistence for token records and seen-sets.
//!
//! Both files are plain JSON objects keyed by account (username for tokens,
//! display name for seen-sets). A missing, empty, or unreadable file reads
//! as empty, and a single malformed entry only hides that entry. Every
//! write goes to a sibling `.tmp` file first and is renamed into place, so
//! a crash never leaves a half-written file behind.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde_json::{Map, Value};

use crate::types::{SeenEntry, SeenSet, TokenRecord, WatchError, WatchResult};

/// Token cache keyed by username.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored record for `username`, if any readable one exists.
    pub fn load(&self, username: &str) -> Option<TokenRecord> {
        let raw = read_object(&self.path).remove(username)?;
        match serde_json::from_value::<TokenRecord>(raw) {
            Ok(rec) => Some(rec),
            Err(e) => {
                tracing::warn!(account = username, "ignoring unreadable token record: {e}");
                None
            }
        }
    }

    /// Replace the record for `username`, keeping every other key intact.
    pub fn save(&self, username: &str, record: &TokenRecord) -> WatchResult<()> {
        let mut all = read_object(&self.path);
        all.insert(username.to_string(), serde_json::to_value(record)?);
        write_atomic(&self.path, &Value::Object(all))
    }

    /// Flag the stored record as rejected by the portal. The token itself is
    /// kept so the file still shows what was last issued.
    pub fn mark_rejected(&self, username: &str, at: DateTime<Local>) -> WatchResult<bool> {
        let Some(mut record) = self.load(username) else {
            return Ok(false);
        };
        record.rejected_at = Some(at);
        self.save(username, &record)?;
        Ok(true)
    }

    /// All readable records, sorted by username.
    pub fn entries(&self) -> Vec<(String, TokenRecord)> {
        read_object(&self.path)
            .into_iter()
            .filter_map(|(k, v)| serde_json::from_value(v).ok().map(|rec| (k, rec)))
            .collect()
    }
}

/// Seen-sets for every student, keyed by display name.
#[derive(Debug, Clone)]
pub struct SeenStore {
    path: PathBuf,
}

impl SeenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_all(&self) -> BTreeMap<String, SeenSet> {
        read_object(&self.path)
            .into_iter()
            .map(|(student, raw)| {
                let set = match raw {
                    Value::Object(entries) => parse_seen_set(&student, entries),
                    _ => {
                        tracing::warn!(student = %student, "ignoring malformed seen-set");
                        SeenSet::new()
                    }
                };
                (student, set)
            })
            .collect()
    }

    pub fn load(&self, student: &str) -> SeenSet {
        self.load_all().remove(student).unwrap_or_default()
    }

    pub fn save_all(&self, sets: &BTreeMap<String, SeenSet>) -> WatchResult<()> {
        let value = serde_json::to_value(sets)?;
        write_atomic(&self.path, &value)
    }
}

/// Entries are keyed by the fingerprint of their item, whatever key the
/// file used. Older files keyed by a different digest load the same way.
fn parse_seen_set(student: &str, entries: Map<String, Value>) -> SeenSet {
    let mut set = SeenSet::new();
    for (key, raw) in entries {
        let entry = match serde_json::from_value::<SeenEntry>(raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(student = %student, "dropping unreadable seen entry: {e}");
                continue;
            }
        };
        let fp = entry.item.fingerprint();
        if fp.as_str() != key {
            tracing::debug!(student = %student, key = %key, "re-keying seen entry");
        }
        match set.get(&fp) {
            Some(kept) if kept.detected_at <= entry.detected_at => {}
            _ => {
                set.insert(fp, entry);
            }
        }
    }
    set
}

/// Read a JSON object from `path`, treating anything unusable as empty.
fn read_object(path: &Path) -> Map<String, Value> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Map::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), "cannot read store: {e}");
            return Map::new();
        }
    };
    if text.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            tracing::warn!(path = %path.display(), "store is not a JSON object, treating as empty");
            Map::new()
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), "corrupt store, treating as empty: {e}");
            Map::new()
        }
    }
}

/// Serialize `value` next to `path` and rename it into place.
pub fn write_atomic(path: &Path, value: &Value) -> WatchResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| WatchError::Storage(format!("invalid store path: {}", path.display())))?;
    let tmp = path.with_file_name(format!("{file_name}.tmp"));

    let bytes = serde_json::to_vec_pretty(value)?;
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HomeworkItem, RequestParams};
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_missing_and_corrupt_files_read_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token_cache.json"));
        assert!(store.load("noa").is_none());

        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(store.load("noa").is_none());

        std::fs::write(store.path(), "").unwrap();
        assert!(store.entries().is_empty());
    }

    #[test]
    fn test_save_preserves_unrelated_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token_cache.json");
        std::fs::write(&path, r#"{"_comment": "hand edited", "other": {"token": 1}}"#).unwrap();

        let store = TokenStore::new(&path);
        let rec = TokenRecord::new("tok", RequestParams::new(), Local::now());
        store.save("noa", &rec).unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["_comment"], json!("hand edited"));
        assert_eq!(raw["noa"]["token"], json!("tok"));
        assert!(raw["noa"].get("timestamp").is_some());
        assert!(!dir.path().join("token_cache.json.tmp").exists());

        // The malformed neighbour is ignored, not fatal.
        assert!(store.load("other").is_none());
        assert_eq!(store.load("noa").unwrap().token, "tok");
    }

    #[test]
    fn test_mark_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("t.json"));
        assert!(!store.mark_rejected("noa", Local::now()).unwrap());

        store
            .save("noa", &TokenRecord::new("tok", RequestParams::new(), Local::now()))
            .unwrap();
        assert!(store.mark_rejected("noa", Local::now()).unwrap());
        let rec = store.load("noa").unwrap();
        assert_eq!(rec.token, "tok");
        assert!(rec.rejected_at.is_some());
    }

    #[test]
    fn test_seen_store_roundtrip_and_bad_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeenStore::new(dir.path().join("homework_state.json"));
        let date = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let item = HomeworkItem::new(date, "Math", "Levi", "p. 4");

        let mut set = SeenSet::new();
        set.insert(
            item.fingerprint(),
            SeenEntry {
                detected_at: Local::now(),
                item: item.clone(),
            },
        );
        let mut all = BTreeMap::new();
        all.insert("Noa".to_string(), set);
        store.save_all(&all).unwrap();

        let loaded = store.load("Noa");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[&item.fingerprint()].item, item);

        let mut raw: Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        raw["Noa"]["deadbeef"] = json!({"garbage": true});
        raw["Omer"] = json!([1, 2, 3]);
        std::fs::write(store.path(), raw.to_string()).unwrap();

        let all = store.load_all();
        assert_eq!(all["Noa"].len(), 1);
        assert!(all["Omer"].is_empty());
    }

    #[test]
    fn test_legacy_state_file_is_rekeyed() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeenStore::new(dir.path().join("homework_state.json"));
        let entry = |at: &str| {
            json!({
                "detected_at": at,
                "item": {
                    "date": "2024-01-10T00:00:00",
                    "subject": "Math",
                    "teacher": "Levi",
                    "homework": "p. 4"
                }
            })
        };
        let legacy = json!({
            "Noa": {
                "5d41402abc4b2a76b9719d911017c592": entry("2024-01-09T18:30:00.123456"),
                "7d793037a0760186574b0282f2f435e7": entry("2024-01-08T07:00:00"),
            }
        });
        std::fs::write(store.path(), legacy.to_string()).unwrap();

        let set = store.load("Noa");
        let date = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let fp = HomeworkItem::new(date, "Math", "Levi", "p. 4").fingerprint();
        assert_eq!(set.len(), 1);
        let kept = &set[&fp];
        assert_eq!(kept.detected_at.format("%Y-%m-%d %H:%M").to_string(), "2024-01-08 07:00");
    }
}
