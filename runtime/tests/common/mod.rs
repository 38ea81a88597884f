//! Shared fakes for the integration tests: a scripted browser and a
//! scripted authenticator, plus helpers wiring them to a mock portal.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use schoolwatch::{Account, RequestParams, TokenRecord, TokenStore};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use schoolwatch_runtime::acquisition::extract::TokenSource;
use schoolwatch_runtime::acquisition::login::{Authenticator, LoginResult};
use schoolwatch_runtime::acquisition::manual::ManualTokenSource;
use schoolwatch_runtime::acquisition::AcquisitionChain;
use schoolwatch_runtime::coordinator::Coordinator;
use schoolwatch_runtime::fetcher::{HomeworkFetcher, PageScraper};
use schoolwatch_runtime::notify::mqtt::Publish;
use schoolwatch_runtime::notify::Dispatcher;
use schoolwatch_runtime::portal::api::PortalApi;
use schoolwatch_runtime::portal::http_client::HttpClient;
use schoolwatch_runtime::portal::Endpoints;
use schoolwatch_runtime::renderer::{
    BrowserCookie, BrowserMode, Launcher, NavigationResult, RenderContext, Renderer,
};

pub const API_PATH: &str = "/server/api/PupilCard/GetPupilLessonsAndHomework";
pub const HOOK_PATH: &str = "/hook";

// ── Browser fake ───────────────────────────────────────────────────────

/// What the fake homework page shows.
#[derive(Debug, Clone, Default)]
pub struct FakePage {
    pub text: String,
    /// Navigation lands on the login page instead.
    pub redirect_to_login: bool,
    /// Launching fails outright.
    pub unavailable: bool,
}

/// Counts what happened across every session it launched.
#[derive(Debug, Default)]
pub struct BrowserLog {
    pub launches: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub cookies: Mutex<Vec<BrowserCookie>>,
    pub visited: Mutex<Vec<String>>,
}

pub struct FakeLauncher {
    pub page: Mutex<FakePage>,
    pub log: Arc<BrowserLog>,
    login_url: String,
}

impl FakeLauncher {
    pub fn new(page: FakePage, login_url: &str) -> Self {
        Self {
            page: Mutex::new(page),
            log: Arc::new(BrowserLog::default()),
            login_url: login_url.to_string(),
        }
    }

    pub fn set_page(&self, page: FakePage) {
        *self.page.lock().unwrap() = page;
    }

    pub fn launches(&self) -> usize {
        self.log.launches.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.log.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, _mode: BrowserMode) -> Result<Box<dyn Renderer>> {
        let page = self.page.lock().unwrap().clone();
        if page.unavailable {
            bail!("no browser in this test");
        }
        self.log.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeRenderer {
            page,
            log: Arc::clone(&self.log),
            login_url: self.login_url.clone(),
        }))
    }
}

struct FakeRenderer {
    page: FakePage,
    log: Arc<BrowserLog>,
    login_url: String,
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        Ok(Box::new(FakeContext {
            page: self.page.clone(),
            log: Arc::clone(&self.log),
            login_url: self.login_url.clone(),
            url: "about:blank".into(),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        self.log.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        0
    }
}

struct FakeContext {
    page: FakePage,
    log: Arc<BrowserLog>,
    login_url: String,
    url: String,
}

#[async_trait]
impl RenderContext for FakeContext {
    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
        self.log.visited.lock().unwrap().push(url.to_string());
        self.url = if self.page.redirect_to_login {
            self.login_url.clone()
        } else {
            url.to_string()
        };
        Ok(NavigationResult {
            final_url: self.url.clone(),
            load_time_ms: 5,
        })
    }

    async fn execute_js(&self, _script: &str) -> Result<Value> {
        Ok(Value::String(self.page.text.clone()))
    }

    async fn get_url(&self) -> Result<String> {
        Ok(self.url.clone())
    }

    async fn set_cookie(&self, cookie: &BrowserCookie) -> Result<()> {
        self.log.cookies.lock().unwrap().push(cookie.clone());
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
        Ok(self.log.cookies.lock().unwrap().clone())
    }

    async fn fill(&self, _selector: &str, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn press_enter(&self, _selector: &str) -> Result<()> {
        Ok(())
    }

    async fn click(&self, _selector: &str) -> Result<()> {
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

// ── Authenticator fake ─────────────────────────────────────────────────

/// Hands out `token` (or fails when `None`) and counts calls.
pub struct FakeAuthenticator {
    pub token: Mutex<Option<String>>,
    pub discovered: RequestParams,
    pub calls: AtomicUsize,
}

impl FakeAuthenticator {
    pub fn succeeding(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
            discovered: RequestParams::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            token: Mutex::new(None),
            discovered: RequestParams::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn login(&self, _account: &Account) -> Result<LoginResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.token.lock().unwrap().clone() {
            Some(token) => Ok(LoginResult {
                token,
                source: TokenSource::CookieJar,
                discovered: self.discovered.clone(),
            }),
            None => bail!("login timed out"),
        }
    }
}

// ── MQTT fake ──────────────────────────────────────────────────────────

/// Keeps every `(topic, payload)` it is asked to publish.
#[derive(Default)]
pub struct RecordingPublisher {
    pub sent: Mutex<Vec<(String, Value)>>,
}

impl RecordingPublisher {
    pub fn topics(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }
}

#[async_trait]
impl Publish for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        let value = serde_json::from_str(&payload)?;
        self.sent.lock().unwrap().push((topic.to_string(), value));
        Ok(())
    }
}

// ── Wiring ─────────────────────────────────────────────────────────────

pub fn endpoints(server: &MockServer) -> Endpoints {
    Endpoints {
        login_url: format!("{}/account/login", server.uri()),
        homework_api_url: format!("{}{API_PATH}", server.uri()),
        homework_page_url: format!("{}/pupilcard", server.uri()),
        origin: server.uri(),
        referer: format!("{}/", server.uri()),
        ..Endpoints::default()
    }
}

pub fn account(name: &str, username: &str) -> Account {
    let mut params = RequestParams::new();
    params.insert("studentID", json!(123));
    Account {
        name: name.to_string(),
        username: username.to_string(),
        password: "secret".to_string(),
        params,
    }
}

/// State files under one temporary directory.
pub struct State {
    pub dir: PathBuf,
}

impl State {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn tokens(&self) -> TokenStore {
        TokenStore::new(self.dir.join("token_cache.json"))
    }

    pub fn seen_path(&self) -> PathBuf {
        self.dir.join("homework_state.json")
    }

    pub fn manual_path(&self) -> PathBuf {
        self.dir.join("token.txt")
    }

    pub fn seed_token(&self, username: &str, token: &str, at: DateTime<Local>) {
        let mut params = RequestParams::new();
        params.insert("studentID", json!(123));
        self.tokens()
            .save(username, &TokenRecord::new(token, params, at))
            .unwrap();
    }
}

pub fn chain(state: &State, auth: Arc<FakeAuthenticator>) -> AcquisitionChain {
    AcquisitionChain::new(state.tokens(), auth, ManualTokenSource::new(state.manual_path()))
}

pub fn coordinator(
    server: &MockServer,
    state: &State,
    launcher: Arc<FakeLauncher>,
    auth: Arc<FakeAuthenticator>,
    accounts: Vec<Account>,
) -> Coordinator {
    let endpoints = endpoints(server);
    let http = HttpClient::new(Duration::from_secs(5)).unwrap();
    let api = PortalApi::new(http, endpoints.clone());
    let scraper = PageScraper::new(
        launcher,
        endpoints,
        BrowserMode::Headless,
        Duration::from_secs(5),
        Duration::from_millis(50),
        Duration::from_millis(10),
    );
    let dispatcher = Dispatcher::from_targets(
        &[format!("{}{HOOK_PATH}", server.uri())],
        Duration::from_secs(5),
    );
    Coordinator::new(
        accounts,
        chain(state, auth),
        HomeworkFetcher::new(api, scraper),
        schoolwatch::SeenStore::new(state.seen_path()),
        dispatcher,
    )
    .with_spacing(Duration::ZERO)
}

// ── Portal payloads ────────────────────────────────────────────────────

/// A listing with one day and one lesson per `(subject, teacher, homework)`.
pub fn listing(date: &str, lessons: &[(&str, &str, &str)]) -> Value {
    let schedule: Vec<Value> = lessons
        .iter()
        .map(|(subject, teacher, hw)| {
            json!({"subject_name": subject, "teacher": teacher, "homeWork": hw, "descClass": ""})
        })
        .collect();
    json!({
        "status": true,
        "data": [{"date": format!("{date}T00:00:00"), "hoursData": [{"scheduale": schedule}]}]
    })
}

pub fn blocked() -> Value {
    json!({"status": false, "errorDescription": "בקשה לא-חוקית", "data": null})
}

pub async fn mount_api(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .respond_with(response)
        .mount(server)
        .await;
}

pub async fn mount_hook(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(HOOK_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

/// Bodies of every webhook call received so far.
pub async fn hook_calls(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == HOOK_PATH)
        .filter_map(|r| serde_json::from_slice(&r.body).ok())
        .collect()
}

pub async fn api_calls(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == API_PATH)
        .count()
}
