//! The structured homework endpoint.
//!
//! The portal answers `{status, data, errorDescription}`. Only
//! `status == true` counts as success; everything else is classified so
//! the fetcher and the token validator can each decide what it means.

use chrono::NaiveDate;
use schoolwatch::{HomeworkItem, RequestParams};
use serde::Deserialize;

use super::http_client::HttpClient;
use super::Endpoints;

/// Error text the portal returns for requests it decides to block, even
/// when the token is fine ("illegal request").
pub const BLOCKED_MARKER: &str = "בקשה לא-חוקית";

const UNKNOWN: &str = "Unknown";

/// Classified answer from the homework endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiOutcome {
    /// `status == true`; items with empty homework text are already dropped.
    Success(Vec<HomeworkItem>),
    /// HTTP 401 or 403.
    Unauthorized(u16),
    /// The soft "request not permitted" payload.
    Blocked,
    /// `status == false` with the portal's own description.
    Failed(String),
    /// Body was not the expected JSON shape.
    Malformed(String),
    /// Network error, 429, or 5xx after retries.
    Transport(String),
}

impl ApiOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ApiOutcome::Success(_) => "success",
            ApiOutcome::Unauthorized(_) => "unauthorized",
            ApiOutcome::Blocked => "blocked",
            ApiOutcome::Failed(_) => "failed",
            ApiOutcome::Malformed(_) => "malformed",
            ApiOutcome::Transport(_) => "transport",
        }
    }

    /// What this outcome says about the token that was sent.
    pub fn token_validity(&self) -> TokenValidity {
        match self {
            ApiOutcome::Success(_) => TokenValidity::Valid,
            ApiOutcome::Unauthorized(_) | ApiOutcome::Failed(_) => TokenValidity::Invalid,
            ApiOutcome::Blocked | ApiOutcome::Malformed(_) | ApiOutcome::Transport(_) => {
                TokenValidity::Unknown
            }
        }
    }
}

/// Verdict on a token after probing the endpoint with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenValidity {
    Valid,
    Invalid,
    /// The response proves nothing either way.
    Unknown,
}

/// Client for the homework endpoint.
#[derive(Clone)]
pub struct PortalApi {
    http: HttpClient,
    endpoints: Endpoints,
}

impl PortalApi {
    pub fn new(http: HttpClient, endpoints: Endpoints) -> Self {
        Self { http, endpoints }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Ask for the homework listing scoped by `params`.
    pub async fn fetch_homework(&self, token: &str, params: &RequestParams) -> ApiOutcome {
        let headers = [
            ("accept", "application/json, text/plain, */*"),
            ("language", "he"),
            ("rememberme", "0"),
            ("origin", self.endpoints.origin.as_str()),
            ("referer", self.endpoints.referer.as_str()),
        ];
        let cookies = [(self.endpoints.token_cookie.as_str(), token), ("input", "0")];

        let resp = match self
            .http
            .post_json(&self.endpoints.homework_api_url, &params.to_json(), &headers, &cookies)
            .await
        {
            Ok(r) => r,
            Err(e) => return ApiOutcome::Transport(format!("{e:#}")),
        };

        classify(resp.status, &resp.body)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: Option<bool>,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default, rename = "errorDescription")]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Day {
    date: String,
    #[serde(default, rename = "hoursData")]
    hours_data: Option<Vec<Hour>>,
}

#[derive(Debug, Deserialize)]
struct Hour {
    #[serde(default)]
    scheduale: Option<Vec<Lesson>>,
}

#[derive(Debug, Deserialize)]
struct Lesson {
    #[serde(default, rename = "homeWork")]
    home_work: Option<String>,
    #[serde(default)]
    subject_name: Option<String>,
    #[serde(default)]
    teacher: Option<String>,
    #[serde(default, rename = "descClass")]
    desc_class: Option<String>,
}

/// Classify a raw response.
pub fn classify(status: u16, body: &str) -> ApiOutcome {
    if status == 401 || status == 403 {
        return ApiOutcome::Unauthorized(status);
    }

    let envelope = serde_json::from_str::<Envelope>(body);
    if let Ok(Envelope {
        status: Some(true),
        data,
        ..
    }) = &envelope
    {
        if (200..300).contains(&status) {
            return match parse_listing(data.as_ref()) {
                Ok(items) => ApiOutcome::Success(items),
                Err(e) => ApiOutcome::Malformed(e),
            };
        }
    }

    if body.contains(BLOCKED_MARKER) {
        return ApiOutcome::Blocked;
    }
    if status == 429 || status >= 500 {
        return ApiOutcome::Transport(format!("HTTP {status}"));
    }

    match envelope {
        Ok(Envelope {
            status: Some(false),
            error_description,
            ..
        }) => ApiOutcome::Failed(
            error_description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| "request failed without description".to_string()),
        ),
        // Only an explicit `status: false` speaks for the token.
        _ if !(200..300).contains(&status) => ApiOutcome::Malformed(format!("HTTP {status}")),
        Ok(_) => ApiOutcome::Malformed("envelope without a status flag".to_string()),
        Err(e) => ApiOutcome::Malformed(format!("not a JSON envelope: {e}")),
    }
}

fn parse_listing(data: Option<&serde_json::Value>) -> Result<Vec<HomeworkItem>, String> {
    let days: Vec<Day> = match data {
        None | Some(serde_json::Value::Null) => return Ok(Vec::new()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| format!("unexpected data shape: {e}"))?,
    };

    let mut items = Vec::new();
    for day in days {
        let Some(date) = parse_portal_date(&day.date) else {
            tracing::warn!(date = %day.date, "skipping day with unreadable date");
            continue;
        };
        for hour in day.hours_data.unwrap_or_default() {
            for lesson in hour.scheduale.unwrap_or_default() {
                let body = lesson.home_work.unwrap_or_default();
                if body.trim().is_empty() {
                    continue;
                }
                let item = HomeworkItem::new(
                    date,
                    non_empty_or(lesson.subject_name, UNKNOWN),
                    non_empty_or(lesson.teacher, UNKNOWN),
                    body.trim(),
                )
                .with_description(lesson.desc_class.unwrap_or_default().trim());
                items.push(item);
            }
        }
    }
    Ok(items)
}

fn non_empty_or(v: Option<String>, fallback: &str) -> String {
    match v {
        Some(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => fallback.to_string(),
    }
}

/// Dates arrive as `2024-01-10T00:00:00`, occasionally as `10/01/2024`.
fn parse_portal_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Some(prefix) = raw.get(..10) {
        if let Ok(d) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(d);
        }
    }
    NaiveDate::parse_from_str(raw, "%d/%m/%Y").ok()
}
