//! Browser-driven login.
//!
//! Opens the login page, fills the form, then polls the page URL and
//! cookie jar until the portal lets us in or the timeout runs out. A bot
//! challenge either gets its checkbox clicked (automated) or is left for
//! a person at the window (interactive).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use schoolwatch::{Account, RequestParams};
use tracing::{debug, info, warn};

use super::extract::{discover_params, find_token, token_from_jar, PageStorage, TokenSource};
use super::extract::{OVERLAY_SCRIPT, STORAGE_SCRIPT};
use crate::config::{ChallengeMode, Config};
use crate::poll::poll_until;
use crate::portal::Endpoints;
use crate::renderer::{BrowserMode, BrowserSession, Launcher, RenderContext};

/// Tried in order until one exists on the page.
const USERNAME_SELECTORS: [&str; 3] = [
    "input[type='text']",
    "input[name='username']",
    "input[placeholder*='שם']",
];
const PASSWORD_SELECTOR: &str = "input[type='password']";
const CHALLENGE_FRAME: &str = "iframe[src*='recaptcha']";

/// How long to wait for the login form to render.
const FORM_TIMEOUT: Duration = Duration::from_secs(20);

/// A token obtained by logging in.
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub token: String,
    pub source: TokenSource,
    /// Parameters found in the logged-in page's storage.
    pub discovered: RequestParams,
}

/// Produces a fresh token from account credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, account: &Account) -> Result<LoginResult>;
}

/// Knobs for the browser login flow.
#[derive(Debug, Clone)]
pub struct LoginSettings {
    pub mode: BrowserMode,
    pub challenge: ChallengeMode,
    pub navigation_timeout: Duration,
    pub login_timeout: Duration,
    pub poll_interval: Duration,
}

impl LoginSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.browser.mode(),
            challenge: config.browser.challenge,
            navigation_timeout: config.timing.navigation_timeout(),
            login_timeout: config.timing.login_timeout(),
            poll_interval: config.timing.poll_interval(),
        }
    }
}

/// Logs in through a real browser session.
pub struct BrowserAuthenticator {
    launcher: Arc<dyn Launcher>,
    endpoints: Endpoints,
    settings: LoginSettings,
}

impl BrowserAuthenticator {
    pub fn new(launcher: Arc<dyn Launcher>, endpoints: Endpoints, settings: LoginSettings) -> Self {
        Self {
            launcher,
            endpoints,
            settings,
        }
    }
}

#[async_trait]
impl Authenticator for BrowserAuthenticator {
    async fn login(&self, account: &Account) -> Result<LoginResult> {
        let mut session = BrowserSession::open(self.launcher.as_ref(), self.settings.mode)
            .await
            .context("cannot start browser for login")?;
        let result = match session.context() {
            Ok(ctx) => drive_login(ctx, &self.endpoints, &self.settings, account).await,
            Err(e) => Err(e),
        };
        session.close().await;
        result
    }
}

/// What ended the wait after submitting the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginSignal {
    LeftLoginPage,
    TokenCookie,
}

/// Run the login flow in an already open tab.
pub async fn drive_login(
    ctx: &mut dyn RenderContext,
    endpoints: &Endpoints,
    settings: &LoginSettings,
    account: &Account,
) -> Result<LoginResult> {
    ctx.navigate(&endpoints.login_url, settings.navigation_timeout.as_millis() as u64)
        .await
        .context("cannot open login page")?;

    let page: &dyn RenderContext = &*ctx;
    let username_selector = poll_until(settings.poll_interval, FORM_TIMEOUT, move || async move {
        for sel in USERNAME_SELECTORS {
            if is_present(page, sel).await {
                return Some(sel);
            }
        }
        None
    })
    .await
    .context("login form did not appear")?;

    if let Err(e) = page.execute_js(OVERLAY_SCRIPT).await {
        debug!("overlay cleanup failed: {e:#}");
    }

    page.fill(username_selector, &account.username).await?;
    page.fill(PASSWORD_SELECTOR, &account.password).await?;
    page.press_enter(PASSWORD_SELECTOR).await?;
    debug!(account = %account.username, "login form submitted");

    let challenge_seen = AtomicBool::new(false);
    let challenge_seen = &challenge_seen;
    let challenge = settings.challenge;
    let signal = poll_until(settings.poll_interval, settings.login_timeout, move || async move {
        let url = page.get_url().await.ok()?;
        if !endpoints.is_login_url(&url) {
            return Some(LoginSignal::LeftLoginPage);
        }
        if let Ok(cookies) = page.cookies().await {
            if token_from_jar(&cookies, &endpoints.token_cookie).is_some() {
                return Some(LoginSignal::TokenCookie);
            }
        }
        if !challenge_seen.load(Ordering::Relaxed) && is_present(page, CHALLENGE_FRAME).await {
            challenge_seen.store(true, Ordering::Relaxed);
            match challenge {
                ChallengeMode::Automated => {
                    info!("bot challenge shown, clicking its checkbox");
                    if let Err(e) = page.click(CHALLENGE_FRAME).await {
                        warn!("could not click challenge: {e:#}");
                    }
                }
                ChallengeMode::Interactive => {
                    info!("bot challenge shown, waiting for it to be solved in the browser window");
                }
            }
        }
        None
    })
    .await;

    let Some(signal) = signal else {
        bail!(
            "login did not complete within {}s",
            settings.login_timeout.as_secs()
        );
    };
    debug!(?signal, "login accepted");

    // The cookie can trail the redirect by a moment.
    let settle = settings.poll_interval * 3;
    let found = poll_until(settings.poll_interval, settle, move || async move {
        let cookies = page.cookies().await.unwrap_or_default();
        let storage = read_storage(page).await;
        find_token(&cookies, &storage, &endpoints.token_cookie).map(|t| (t, storage))
    })
    .await;

    let Some(((token, source), storage)) = found else {
        bail!("logged in but no token was found in cookies, storage, or page variables");
    };
    let discovered = discover_params(&storage);
    info!(
        source = source.as_str(),
        params = discovered.len(),
        "token extracted after login"
    );

    Ok(LoginResult {
        token,
        source,
        discovered,
    })
}

async fn read_storage(page: &dyn RenderContext) -> PageStorage {
    match page.execute_js(STORAGE_SCRIPT).await {
        Ok(v) => PageStorage::from_value(v),
        Err(e) => {
            debug!("reading page storage failed: {e:#}");
            PageStorage::default()
        }
    }
}

async fn is_present(page: &dyn RenderContext, selector: &str) -> bool {
    let Ok(literal) = serde_json::to_string(selector) else {
        return false;
    };
    page.execute_js(&format!("document.querySelector({literal}) !== null"))
        .await
        .ok()
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{BrowserCookie, NavigationResult};
    use std::sync::Mutex;

    /// A login page that accepts the form after a few URL checks.
    #[derive(Default)]
    struct FakeLoginPage {
        state: Mutex<PageState>,
        accept_after_polls: u32,
        show_challenge: bool,
        token_in_storage: bool,
    }

    #[derive(Default)]
    struct PageState {
        url: String,
        submitted: bool,
        polls: u32,
        typed: Vec<(String, String)>,
        clicked: Vec<String>,
    }

    impl FakeLoginPage {
        fn logged_in(&self) -> bool {
            let s = self.state.lock().unwrap();
            s.submitted && s.polls >= self.accept_after_polls
        }
    }

    #[async_trait]
    impl RenderContext for FakeLoginPage {
        async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
            self.state.lock().unwrap().url = url.to_string();
            Ok(NavigationResult {
                final_url: url.to_string(),
                load_time_ms: 1,
            })
        }
        async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
            if script.contains("recaptcha") {
                return Ok(serde_json::json!(self.show_challenge));
            }
            if script.contains("querySelector(") {
                return Ok(serde_json::json!(script.contains("input[type='text']")));
            }
            if script.contains("localStorage") && self.token_in_storage && self.logged_in() {
                return Ok(serde_json::json!({
                    "local": {
                        "webToken": "stored%3D",
                        "userInfo": "{\"studentID\": 77, \"classCode\": 4}"
                    }
                }));
            }
            Ok(serde_json::json!(true))
        }
        async fn get_url(&self) -> Result<String> {
            let mut s = self.state.lock().unwrap();
            if s.submitted {
                s.polls += 1;
            }
            if s.submitted && s.polls >= self.accept_after_polls {
                s.url = "https://portal.test/dashboard".into();
            }
            Ok(s.url.clone())
        }
        async fn set_cookie(&self, _cookie: &BrowserCookie) -> Result<()> {
            Ok(())
        }
        async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
            if self.logged_in() && !self.token_in_storage {
                Ok(vec![BrowserCookie::new("webToken", "tok%2B1", ".portal.test")])
            } else {
                Ok(vec![])
            }
        }
        async fn fill(&self, selector: &str, text: &str) -> Result<()> {
            self.state
                .lock()
                .unwrap()
                .typed
                .push((selector.to_string(), text.to_string()));
            Ok(())
        }
        async fn press_enter(&self, _selector: &str) -> Result<()> {
            self.state.lock().unwrap().submitted = true;
            Ok(())
        }
        async fn click(&self, selector: &str) -> Result<()> {
            self.state.lock().unwrap().clicked.push(selector.to_string());
            Ok(())
        }
        async fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    fn settings(timeout_secs: u64) -> LoginSettings {
        LoginSettings {
            mode: BrowserMode::Headless,
            challenge: ChallengeMode::Automated,
            navigation_timeout: Duration::from_secs(30),
            login_timeout: Duration::from_secs(timeout_secs),
            poll_interval: Duration::from_secs(2),
        }
    }

    fn endpoints() -> Endpoints {
        Endpoints {
            login_url: "https://portal.test/account/login".into(),
            ..Endpoints::default()
        }
    }

    fn account() -> Account {
        Account {
            name: "Noa".into(),
            username: "noa.l".into(),
            password: "pw".into(),
            params: RequestParams::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_via_redirect_and_cookie() {
        let mut page = FakeLoginPage {
            accept_after_polls: 3,
            show_challenge: true,
            ..Default::default()
        };
        let result = drive_login(&mut page, &endpoints(), &settings(60), &account())
            .await
            .unwrap();
        assert_eq!(result.token, "tok+1");
        assert_eq!(result.source, TokenSource::CookieJar);

        let state = page.state.lock().unwrap();
        assert_eq!(
            state.typed,
            vec![
                ("input[type='text']".to_string(), "noa.l".to_string()),
                (PASSWORD_SELECTOR.to_string(), "pw".to_string()),
            ]
        );
        assert_eq!(state.clicked, vec![CHALLENGE_FRAME.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_from_storage_with_params() {
        let mut page = FakeLoginPage {
            accept_after_polls: 1,
            token_in_storage: true,
            ..Default::default()
        };
        let result = drive_login(&mut page, &endpoints(), &settings(60), &account())
            .await
            .unwrap();
        assert_eq!(result.token, "stored=");
        assert_eq!(result.source, TokenSource::LocalStorage);
        assert_eq!(result.discovered.get("studentID"), Some(&serde_json::json!(77)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_times_out() {
        let mut page = FakeLoginPage {
            accept_after_polls: u32::MAX,
            ..Default::default()
        };
        let err = drive_login(&mut page, &endpoints(), &settings(10), &account())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not complete"));
    }
}
