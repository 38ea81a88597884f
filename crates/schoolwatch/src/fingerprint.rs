//! Stable content digests for homework items.
//!
//! The canonical form is a JSON array with a fixed field order, so two
//! items with the same observable fields hash equal no matter how they
//! were built. Surrounding whitespace is trimmed and an absent description
//! counts as empty; nothing else is normalized.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::HomeworkItem;

/// Version tag mixed into the canonical form.
const CANONICAL_TAG: &str = "hw1";

/// Hex-encoded BLAKE3 digest of an item's canonical serialization.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(item: &HomeworkItem) -> Self {
        let canonical = canonical_form(item);
        Fingerprint(blake3::hash(canonical.as_bytes()).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Fingerprint(s)
    }
}

fn canonical_form(item: &HomeworkItem) -> String {
    let fields = serde_json::json!([
        CANONICAL_TAG,
        item.date.format("%Y-%m-%d").to_string(),
        item.subject.trim(),
        item.teacher.trim(),
        item.body.trim(),
        item.description.as_deref().unwrap_or("").trim(),
    ]);
    fields.to_string()
}
