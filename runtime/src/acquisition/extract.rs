//! Pulling the token and student parameters out of a logged-in page.

use std::collections::BTreeMap;

use schoolwatch::RequestParams;
use serde::Deserialize;

use crate::renderer::BrowserCookie;

/// Strips modal, overlay and cookie-banner elements that sit on top of
/// the login form.
pub const OVERLAY_SCRIPT: &str = r#"(() => {
  document.querySelectorAll('[class*="modal"], [class*="overlay"], [class*="cookie"]')
    .forEach(el => el.remove());
  if (document.body) { document.body.style.overflow = 'auto'; }
  return true;
})()"#;

/// Dumps web storage, a few well-known globals, and `document.cookie`.
pub const STORAGE_SCRIPT: &str = r#"(() => {
  const dump = (s) => {
    const out = {};
    try {
      for (let i = 0; i < s.length; i++) {
        const k = s.key(i);
        const v = s.getItem(k);
        if (v !== null) { out[k] = v; }
      }
    } catch (e) {}
    return out;
  };
  const globals = {};
  for (const name of ['webToken', 'token', 'authToken', 'accessToken']) {
    try {
      const v = window[name];
      if (typeof v === 'string' && v) { globals[name] = v; }
    } catch (e) {}
  }
  return {
    local: dump(window.localStorage),
    session: dump(window.sessionStorage),
    globals,
    cookie: document.cookie || ''
  };
})()"#;

/// In-page globals checked for a token, in preference order.
const TOKEN_GLOBALS: [&str; 4] = ["webToken", "token", "authToken", "accessToken"];

/// Snapshot of what [`STORAGE_SCRIPT`] returns.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PageStorage {
    pub local: BTreeMap<String, String>,
    pub session: BTreeMap<String, String>,
    pub globals: BTreeMap<String, String>,
    pub cookie: String,
}

impl PageStorage {
    pub fn from_value(v: serde_json::Value) -> Self {
        serde_json::from_value(v).unwrap_or_default()
    }
}

/// Where a token was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    CookieJar,
    LocalStorage,
    SessionStorage,
    PageVariable,
    DocumentCookie,
}

impl TokenSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenSource::CookieJar => "cookie",
            TokenSource::LocalStorage => "localStorage",
            TokenSource::SessionStorage => "sessionStorage",
            TokenSource::PageVariable => "page variable",
            TokenSource::DocumentCookie => "document.cookie",
        }
    }
}

/// The token cookie from the jar, if set and non-empty.
pub fn token_from_jar(cookies: &[BrowserCookie], cookie_name: &str) -> Option<String> {
    cookies
        .iter()
        .find(|c| c.name == cookie_name && !c.value.trim().is_empty())
        .map(|c| normalize_token(&c.value))
}

/// Find a token in preference order: cookie jar, localStorage,
/// sessionStorage, page globals, then `document.cookie`.
pub fn find_token(
    cookies: &[BrowserCookie],
    storage: &PageStorage,
    cookie_name: &str,
) -> Option<(String, TokenSource)> {
    if let Some(t) = token_from_jar(cookies, cookie_name) {
        return Some((t, TokenSource::CookieJar));
    }
    if let Some(t) = token_from_storage(&storage.local, cookie_name) {
        return Some((t, TokenSource::LocalStorage));
    }
    if let Some(t) = token_from_storage(&storage.session, cookie_name) {
        return Some((t, TokenSource::SessionStorage));
    }
    for name in TOKEN_GLOBALS {
        if let Some(v) = storage.globals.get(name).filter(|v| !v.trim().is_empty()) {
            return Some((normalize_token(v), TokenSource::PageVariable));
        }
    }
    storage
        .cookie
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, v)| k.trim() == cookie_name && !v.trim().is_empty())
        .map(|(_, v)| (normalize_token(v), TokenSource::DocumentCookie))
}

/// An exact key match wins over any key that merely mentions "token".
fn token_from_storage(store: &BTreeMap<String, String>, cookie_name: &str) -> Option<String> {
    let exact = store.get(cookie_name);
    let fuzzy = || {
        store
            .iter()
            .filter(|(k, v)| k.to_ascii_lowercase().contains("token") && !v.trim().is_empty())
            .map(|(_, v)| v)
            .next()
    };
    exact
        .filter(|v| !v.trim().is_empty())
        .or_else(fuzzy)
        .map(|v| normalize_token(v))
        .filter(|t| !t.is_empty())
}

/// Trim, unwrap a JSON-quoted string, and percent-decode.
pub fn normalize_token(raw: &str) -> String {
    let raw = raw.trim();
    let unquoted = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::String(s)) => s,
        _ => raw.to_string(),
    };
    if unquoted.contains('%') {
        urlencoding::decode(&unquoted)
    } else {
        unquoted
    }
}

/// Field aliases seen in the portal's stored user objects.
const PARAM_ALIASES: [(&str, &[&str]); 4] = [
    ("studentID", &["studentID", "student_id", "id", "userId"]),
    ("studentName", &["studentName", "student_name", "name", "fullName"]),
    ("classCode", &["classCode", "class_code", "classNumber"]),
    ("studyYear", &["studyYear", "study_year", "year"]),
];

/// Request parameters found in localStorage entries describing the
/// student or user.
pub fn discover_params(storage: &PageStorage) -> RequestParams {
    let mut params = RequestParams::new();
    for (key, raw) in &storage.local {
        let lower = key.to_ascii_lowercase();
        if !(lower.contains("student") || lower.contains("user")) {
            continue;
        }
        let Ok(serde_json::Value::Object(obj)) = serde_json::from_str::<serde_json::Value>(raw)
        else {
            continue;
        };
        for (target, aliases) in PARAM_ALIASES {
            if params.get(target).is_some() {
                continue;
            }
            let found = aliases
                .iter()
                .filter_map(|a| obj.get(*a))
                .find(|v| !v.is_null());
            if let Some(v) = found {
                params.insert(target, v.clone());
            }
        }
    }
    params
}

/// Percent-decoding for tokens copied out of cookies and URLs.
mod urlencoding {
    /// Decode `%XX` escapes. Malformed escapes are kept verbatim and `+`
    /// is left alone, since tokens are not form-encoded.
    pub fn decode(s: &str) -> String {
        let bytes = s.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' && i + 2 < bytes.len() {
                if let (Some(h), Some(l)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                    out.push(h << 4 | l);
                    i += 3;
                    continue;
                }
            }
            out.push(bytes[i]);
            i += 1;
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    fn hex(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }
}
