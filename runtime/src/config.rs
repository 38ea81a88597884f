//! Configuration loading and resolution.
//!
//! The YAML file lists the student accounts plus scheduling, notification,
//! portal, browser, timing, and MQTT settings. `SCHEDULES` and `NOTIFIERS`
//! (comma-separated) and the `MQTT_*` variables override the file when
//! set. A config that cannot be read, or that leaves no usable account, is
//! the one fatal start-up error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use schoolwatch::{Account, RequestParams};
use serde::Deserialize;

use crate::notify::mqtt::MqttSettings;
use crate::portal::Endpoints;
use crate::renderer::BrowserMode;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "SCHOOLWATCH_CONFIG";

const DEFAULT_SCHEDULES: [&str; 3] = ["12:00", "16:00", "20:00"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Resolve the config file path.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(env_path);
    }

    let cwd_config = PathBuf::from("config/config.yaml");
    if cwd_config.exists() {
        return cwd_config;
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".schoolwatch/config.yaml")
}

/// How the login flow treats the bot challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeMode {
    /// Click the challenge checkbox and keep polling.
    Automated,
    /// Leave the challenge to a human at a visible browser window.
    Interactive,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub chromium_path: Option<PathBuf>,
    pub challenge: ChallengeMode,
    pub locale: String,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            chromium_path: None,
            challenge: ChallengeMode::Automated,
            locale: "he-IL".to_string(),
        }
    }
}

impl BrowserSettings {
    pub fn mode(&self) -> BrowserMode {
        if self.headless {
            BrowserMode::Headless
        } else {
            BrowserMode::Headed
        }
    }
}

/// Timeouts and pauses, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub login_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub page_settle_timeout_secs: u64,
    pub navigation_timeout_secs: u64,
    pub account_spacing_secs: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            login_timeout_secs: 120,
            poll_interval_secs: 2,
            request_timeout_secs: 10,
            page_settle_timeout_secs: 30,
            navigation_timeout_secs: 30,
            account_spacing_secs: 2,
        }
    }
}

impl Timing {
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
    pub fn page_settle_timeout(&self) -> Duration {
        Duration::from_secs(self.page_settle_timeout_secs)
    }
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }
    pub fn account_spacing(&self) -> Duration {
        Duration::from_secs(self.account_spacing_secs)
    }
}

/// A student entry as written in YAML. Entries without credentials are
/// skipped rather than rejected.
#[derive(Debug, Clone, Deserialize)]
struct StudentEntry {
    name: Option<String>,
    username: Option<String>,
    password: Option<String>,
    #[serde(default, alias = "params")]
    student_params: RequestParams,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PathsEntry {
    state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    #[serde(default)]
    students: Vec<StudentEntry>,
    #[serde(default)]
    schedules: Option<Vec<String>>,
    #[serde(default)]
    notifiers: Vec<String>,
    #[serde(default = "default_true")]
    notify_only_today: bool,
    #[serde(default)]
    validate_cached_token: bool,
    #[serde(default)]
    paths: PathsEntry,
    #[serde(default)]
    portal: Endpoints,
    #[serde(default)]
    browser: BrowserSettings,
    #[serde(default)]
    timing: Timing,
    #[serde(default)]
    mqtt: MqttSettings,
}

fn default_true() -> bool {
    true
}

/// Files kept under the state directory.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub dir: PathBuf,
    pub token_cache: PathBuf,
    pub seen_state: PathBuf,
    pub manual_token: PathBuf,
    pub journal: PathBuf,
}

impl StatePaths {
    pub fn under(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            token_cache: dir.join("token_cache.json"),
            seen_state: dir.join("homework_state.json"),
            manual_token: dir.join("token.txt"),
            journal: dir.join("journal.jsonl"),
            dir,
        }
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub accounts: Vec<Account>,
    pub schedules: Vec<NaiveTime>,
    pub notifiers: Vec<String>,
    pub notify_only_today: bool,
    pub validate_cached_token: bool,
    pub paths: StatePaths,
    pub portal: Endpoints,
    pub browser: BrowserSettings,
    pub timing: Timing,
    /// Home Assistant publishing; `None` when no broker is set.
    pub mqtt: Option<MqttSettings>,
}

impl Config {
    /// Load from `path`, applying environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_yaml(&text, base, |k| std::env::var(k).ok()).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse YAML text. Relative paths resolve against `base_dir`; `env`
    /// supplies override variables.
    pub fn from_yaml(
        text: &str,
        base_dir: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;

        let mut accounts = Vec::new();
        for (idx, s) in raw.students.into_iter().enumerate() {
            let username = s.username.filter(|u| !u.trim().is_empty());
            let password = s.password.filter(|p| !p.is_empty());
            let (Some(username), Some(password)) = (username, password) else {
                tracing::warn!(
                    "skipping student #{} ({}): missing username or password",
                    idx + 1,
                    s.name.as_deref().unwrap_or("unnamed")
                );
                continue;
            };
            accounts.push(Account {
                name: s.name.unwrap_or_else(|| username.clone()),
                username,
                password,
                params: s.student_params,
            });
        }
        if accounts.is_empty() {
            return Err(ConfigError::Invalid(
                "no student with both username and password".into(),
            ));
        }

        let schedule_src: Vec<String> = match env("SCHEDULES").filter(|s| !s.trim().is_empty()) {
            Some(list) => split_list(&list),
            None => raw
                .schedules
                .unwrap_or_else(|| DEFAULT_SCHEDULES.iter().map(|s| s.to_string()).collect()),
        };
        let mut schedules = schedule_src
            .iter()
            .map(|s| parse_check_time(s))
            .collect::<Result<Vec<_>, _>>()?;
        schedules.sort();
        schedules.dedup();

        let notifiers = match env("NOTIFIERS").filter(|s| !s.trim().is_empty()) {
            Some(list) => split_list(&list),
            None => raw.notifiers,
        };

        let state_dir = match raw.paths.state_dir {
            Some(p) if p.is_absolute() => p,
            Some(p) => base_dir.join(p),
            None => base_dir.to_path_buf(),
        };

        let mut browser = raw.browser;
        if let Some(p) = env(crate::renderer::chromium::CHROMIUM_PATH_ENV) {
            browser.chromium_path = Some(PathBuf::from(p));
        }

        let mqtt = resolve_mqtt(raw.mqtt, &env)?;

        Ok(Self {
            accounts,
            schedules,
            notifiers,
            notify_only_today: raw.notify_only_today,
            validate_cached_token: raw.validate_cached_token,
            paths: StatePaths::under(state_dir),
            portal: raw.portal,
            browser,
            timing: raw.timing,
            mqtt,
        })
    }

    pub fn account(&self, username: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.username == username)
    }
}

/// Apply `MQTT_BROKER`, `MQTT_PORT`, `MQTT_USER`, and `MQTT_PASS`.
fn resolve_mqtt(
    mut mqtt: MqttSettings,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<Option<MqttSettings>, ConfigError> {
    let set = |k: &str| env(k).filter(|v| !v.trim().is_empty());
    if let Some(broker) = set("MQTT_BROKER") {
        mqtt.broker = broker.trim().to_string();
    }
    if let Some(port) = set("MQTT_PORT") {
        mqtt.port = port
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("MQTT_PORT '{port}' is not a port")))?;
    }
    if let Some(user) = set("MQTT_USER") {
        mqtt.username = Some(user);
    }
    if let Some(pass) = set("MQTT_PASS") {
        mqtt.password = Some(pass);
    }
    if mqtt.broker.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(mqtt))
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Parse a daily check time such as `16:00`.
pub fn parse_check_time(s: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| ConfigError::Invalid(format!("schedule entry '{s}' is not HH:MM")))
}
