//! Everything that talks to the SmartSchool portal over plain HTTP, plus
//! the parsers for what it returns.

pub mod api;
pub mod http_client;
pub mod scrape;

use serde::{Deserialize, Serialize};

/// Portal URLs and cookie names.
///
/// Defaults point at the production portal; tests swap in a mock server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub login_url: String,
    pub homework_api_url: String,
    pub homework_page_url: String,
    /// Sent as `Origin` on API requests.
    pub origin: String,
    /// Sent as `Referer` on API requests.
    pub referer: String,
    pub cookie_domain: String,
    pub token_cookie: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login_url: "https://webtop.smartschool.co.il/account/login".into(),
            homework_api_url:
                "https://webtopserver.smartschool.co.il/server/api/PupilCard/GetPupilLessonsAndHomework"
                    .into(),
            homework_page_url: "https://webtop.smartschool.co.il/pupilcard".into(),
            origin: "https://webtop.smartschool.co.il".into(),
            referer: "https://webtop.smartschool.co.il/".into(),
            cookie_domain: ".smartschool.co.il".into(),
            token_cookie: "webToken".into(),
        }
    }
}

impl Endpoints {
    /// Whether `url` is still somewhere on the login flow.
    pub fn is_login_url(&self, url: &str) -> bool {
        url.to_ascii_lowercase().contains("login")
    }
}
