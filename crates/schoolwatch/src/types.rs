//! Core data types for accounts, tokens, and homework.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use serde::{Deserialize, Deserializer, Serialize};

use crate::fingerprint::Fingerprint;

/// Portal-specific identifiers that scope a homework query to one student
/// (`studentID`, `classCode`, `studyYear`, ...).
///
/// Keys are kept sorted so the payload sent upstream and the value written
/// to disk are stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestParams(pub BTreeMap<String, serde_json::Value>);

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    /// Merge `overlay` on top of `self`. Keys in the overlay win; keys only
    /// present in `self` survive.
    pub fn merged_with(&self, overlay: &RequestParams) -> RequestParams {
        let mut out = self.0.clone();
        for (k, v) in &overlay.0 {
            out.insert(k.clone(), v.clone());
        }
        RequestParams(out)
    }

    /// Request body for the homework endpoint.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.clone().into_iter().collect())
    }
}

impl FromIterator<(String, serde_json::Value)> for RequestParams {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        RequestParams(iter.into_iter().collect())
    }
}

/// A configured student account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Display name used for notifications and seen-set keys.
    pub name: String,
    pub username: String,
    pub password: String,
    /// Parameters pinned in configuration. These win over discovered ones.
    #[serde(default, alias = "student_params")]
    pub params: RequestParams,
}

/// A persisted authentication token for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: String,
    #[serde(default, alias = "student_params")]
    pub request_params: RequestParams,
    /// When the token was obtained. The only basis for expiry.
    #[serde(rename = "timestamp", deserialize_with = "de_timestamp")]
    pub acquired_at: DateTime<Local>,
    /// Set after the portal hard-rejected this token.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_opt_timestamp"
    )]
    pub rejected_at: Option<DateTime<Local>>,
}

impl TokenRecord {
    pub fn new(
        token: impl Into<String>,
        request_params: RequestParams,
        acquired_at: DateTime<Local>,
    ) -> Self {
        Self {
            token: token.into(),
            request_params,
            acquired_at,
            rejected_at: None,
        }
    }

    /// Age of the token at `now`. Negative when `acquired_at` lies in the future.
    pub fn age(&self, now: DateTime<Local>) -> chrono::Duration {
        now.signed_duration_since(self.acquired_at)
    }

    /// Whether the record may still be reused at `now` under `ceiling`.
    ///
    /// An age of exactly `ceiling` is still fresh. Records stamped in the
    /// future and records marked rejected are never fresh.
    pub fn is_fresh(&self, now: DateTime<Local>, ceiling: chrono::Duration) -> bool {
        if self.rejected_at.is_some() {
            return false;
        }
        let age = self.age(now);
        age >= chrono::Duration::zero() && age <= ceiling
    }
}

/// Accepts RFC 3339 timestamps and the legacy naive ISO form, which is
/// interpreted in local time.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Local>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Local));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    Local.from_local_datetime(&naive).earliest()
}

fn de_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Local>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognised timestamp: {raw}")))
}

fn de_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Local>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) => parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognised timestamp: {s}"))),
    }
}

/// Older state files carry the portal's `2024-01-10T00:00:00` form.
fn de_item_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.trim()
        .get(..10)
        .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognised date: {raw}")))
}

/// One homework assignment as listed by the portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeworkItem {
    #[serde(deserialize_with = "de_item_date")]
    pub date: NaiveDate,
    pub subject: String,
    pub teacher: String,
    #[serde(alias = "homework")]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl HomeworkItem {
    pub fn new(
        date: NaiveDate,
        subject: impl Into<String>,
        teacher: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            date,
            subject: subject.into(),
            teacher: teacher.into(),
            body: body.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let d = description.into();
        self.description = if d.trim().is_empty() { None } else { Some(d) };
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

/// First sighting of a homework item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeenEntry {
    #[serde(deserialize_with = "de_timestamp")]
    pub detected_at: DateTime<Local>,
    pub item: HomeworkItem,
}

/// Homework currently outstanding for one student, keyed by fingerprint.
pub type SeenSet = BTreeMap<Fingerprint, SeenEntry>;

/// Errors raised by the core library.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience result type.
pub type WatchResult<T> = Result<T, WatchError>;
