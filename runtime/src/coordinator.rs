//! One monitoring run over every configured account.
//!
//! Accounts are handled strictly one after another with a short pause in
//! between. Within an account the order is fixed: token, fetch, change
//! detection, notification, then the Home Assistant state when MQTT is
//! configured. Nothing that goes wrong for one account stops the others.
//! Seen-sets are written once, after the last account.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Local;
use schoolwatch::{detect, Account, HomeworkItem, SeenSet, SeenStore, TokenStore};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};

use crate::acquisition::login::{BrowserAuthenticator, LoginSettings};
use crate::acquisition::manual::ManualTokenSource;
use crate::acquisition::{AcquisitionChain, Strategy};
use crate::config::Config;
use crate::fetcher::{Channel, HomeworkFetcher, PageScraper};
use crate::journal::{Journal, JournalEntry};
use crate::notify::mqtt::HomeAssistant;
use crate::notify::{compose, Dispatcher};
use crate::portal::api::PortalApi;
use crate::portal::http_client::HttpClient;
use crate::renderer::Launcher;

/// How an account's pipeline ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Listing fetched and compared.
    Checked,
    /// A token was available but no listing could be fetched.
    NoData,
    /// No strategy produced a token.
    NoToken,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountStatus::Checked => "checked",
            AccountStatus::NoData => "no_data",
            AccountStatus::NoToken => "no_token",
        }
    }
}

/// Per-account result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct AccountReport {
    pub account: String,
    pub student: String,
    pub status: AccountStatus,
    pub strategy: Option<Strategy>,
    pub channel: Option<Channel>,
    pub api_outcome: Option<&'static str>,
    pub fetched: Option<usize>,
    pub new_items: Vec<HomeworkItem>,
    pub pruned: usize,
    pub notified: bool,
    pub token_rejected: bool,
    pub error: Option<String>,
}

impl AccountReport {
    fn new(account: &Account, status: AccountStatus) -> Self {
        Self {
            account: account.username.clone(),
            student: account.name.clone(),
            status,
            strategy: None,
            channel: None,
            api_outcome: None,
            fetched: None,
            new_items: Vec::new(),
            pruned: 0,
            notified: false,
            token_rejected: false,
            error: None,
        }
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub reports: Vec<AccountReport>,
    /// Whether the seen-set file was written (false when nothing changed
    /// or the write failed).
    pub persisted: bool,
}

impl RunSummary {
    pub fn new_item_count(&self) -> usize {
        self.reports.iter().map(|r| r.new_items.len()).sum()
    }
}

/// Drives acquisition, fetching, detection, and notification.
pub struct Coordinator {
    accounts: Vec<Account>,
    chain: AcquisitionChain,
    fetcher: HomeworkFetcher,
    seen_store: SeenStore,
    dispatcher: Dispatcher,
    home_assistant: Option<HomeAssistant>,
    journal: Option<Journal>,
    notify_only_today: bool,
    spacing: Duration,
}

impl Coordinator {
    pub fn new(
        accounts: Vec<Account>,
        chain: AcquisitionChain,
        fetcher: HomeworkFetcher,
        seen_store: SeenStore,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            accounts,
            chain,
            fetcher,
            seen_store,
            dispatcher,
            home_assistant: None,
            journal: None,
            notify_only_today: false,
            spacing: Duration::from_secs(2),
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_home_assistant(mut self, home_assistant: HomeAssistant) -> Self {
        self.home_assistant = Some(home_assistant);
        self
    }

    pub fn notify_only_today(mut self, yes: bool) -> Self {
        self.notify_only_today = yes;
        self
    }

    pub fn with_spacing(mut self, spacing: Duration) -> Self {
        self.spacing = spacing;
        self
    }

    /// Wire everything from configuration.
    pub fn from_config(config: &Config, launcher: Arc<dyn Launcher>) -> Result<Self> {
        let http = HttpClient::new(config.timing.request_timeout())?;
        let api = PortalApi::new(http, config.portal.clone());

        let authenticator = BrowserAuthenticator::new(
            Arc::clone(&launcher),
            config.portal.clone(),
            LoginSettings::from_config(config),
        );
        let mut chain = AcquisitionChain::new(
            TokenStore::new(&config.paths.token_cache),
            Arc::new(authenticator),
            ManualTokenSource::new(&config.paths.manual_token),
        );
        if config.validate_cached_token {
            chain = chain.with_probe(Arc::new(api.clone()));
        }

        let scraper = PageScraper::new(
            launcher,
            config.portal.clone(),
            config.browser.mode(),
            config.timing.navigation_timeout(),
            config.timing.page_settle_timeout(),
            config.timing.poll_interval(),
        );
        let fetcher = HomeworkFetcher::new(api, scraper);
        let dispatcher =
            Dispatcher::from_targets(&config.notifiers, config.timing.request_timeout());

        let mut coordinator = Coordinator::new(
            config.accounts.clone(),
            chain,
            fetcher,
            SeenStore::new(&config.paths.seen_state),
            dispatcher,
        )
        .notify_only_today(config.notify_only_today)
        .with_spacing(config.timing.account_spacing());

        if let Some(mqtt) = &config.mqtt {
            coordinator = coordinator.with_home_assistant(HomeAssistant::connect(mqtt));
        }
        match Journal::open(&config.paths.journal) {
            Ok(j) => coordinator = coordinator.with_journal(j),
            Err(e) => warn!("run journal disabled: {e:#}"),
        }
        Ok(coordinator)
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    /// Check every account once.
    pub async fn run_once(&mut self) -> RunSummary {
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(run_id = %run_id, accounts = self.accounts.len(), "run started");

        let mut seen_all = self.seen_store.load_all();
        let mut dirty = false;
        let mut reports = Vec::with_capacity(self.accounts.len());

        let accounts = self.accounts.clone();
        for (idx, account) in accounts.iter().enumerate() {
            if idx > 0 && !self.spacing.is_zero() {
                tokio::time::sleep(self.spacing).await;
            }

            let started = Instant::now();
            let span = info_span!("account", account = %account.username, student = %account.name);
            let report = self
                .process_account(account, &mut seen_all, &mut dirty)
                .instrument(span)
                .await;
            self.record(&run_id, &report, started.elapsed());
            reports.push(report);
        }

        let persisted = if dirty {
            match self.seen_store.save_all(&seen_all) {
                Ok(()) => true,
                Err(e) => {
                    error!("could not save homework state: {e}");
                    false
                }
            }
        } else {
            false
        };

        let summary = RunSummary {
            run_id,
            reports,
            persisted,
        };
        info!(
            run_id = %summary.run_id,
            new_items = summary.new_item_count(),
            "run finished"
        );
        summary
    }

    async fn process_account(
        &self,
        account: &Account,
        seen_all: &mut BTreeMap<String, SeenSet>,
        dirty: &mut bool,
    ) -> AccountReport {
        let now = Local::now();

        let acquired = match self.chain.acquire(account, now).await {
            Ok(a) => a,
            Err(e) => {
                warn!("no token: {e}");
                let mut report = AccountReport::new(account, AccountStatus::NoToken);
                report.error = Some(e.to_string());
                return report;
            }
        };

        let fetch = self.fetcher.fetch(&acquired.token, &acquired.params).await;
        let mut report = AccountReport::new(account, AccountStatus::NoData);
        report.strategy = Some(acquired.strategy);
        report.channel = fetch.channel;
        report.api_outcome = Some(fetch.api_outcome);

        let Some(items) = fetch.items else {
            warn!("no homework could be fetched");
            report.error = Some("no homework could be fetched".into());
            if fetch.hard_rejection {
                match self.chain.store().mark_rejected(&account.username, now) {
                    Ok(_) => {
                        report.token_rejected = true;
                        warn!("portal rejected the token; a new one will be acquired next run");
                    }
                    Err(e) => error!("could not mark token rejected: {e}"),
                }
            }
            return report;
        };

        let previous = seen_all.get(&account.name).cloned().unwrap_or_default();
        let detection = detect(&previous, &items, now);
        info!(
            fetched = items.len(),
            new = detection.new_items.len(),
            pruned = detection.pruned,
            "homework compared"
        );
        if detection.has_changes() || !seen_all.contains_key(&account.name) {
            *dirty = true;
        }
        seen_all.insert(account.name.clone(), detection.seen);

        if let Some(ha) = &self.home_assistant {
            ha.publish(&account.name, &items, now).await;
        }

        report.status = AccountStatus::Checked;
        report.fetched = Some(items.len());
        report.pruned = detection.pruned;
        report.new_items = detection.new_items;

        if !report.new_items.is_empty() {
            let only_on = self.notify_only_today.then(|| now.date_naive());
            match compose(&account.name, &report.new_items, only_on) {
                Some(message) => {
                    let delivery = self.dispatcher.dispatch(&message).await;
                    report.notified = delivery.sent > 0;
                }
                None => info!("no new homework dated today, not notifying"),
            }
        }

        report
    }

    fn record(&mut self, run_id: &str, report: &AccountReport, elapsed: Duration) {
        let Some(journal) = self.journal.as_mut() else {
            return;
        };
        let entry = JournalEntry {
            timestamp: Local::now().to_rfc3339(),
            run_id: run_id.to_string(),
            account: report.account.clone(),
            student: report.student.clone(),
            strategy: report.strategy.map(|s| s.as_str().to_string()),
            channel: report.channel.map(|c| c.as_str().to_string()),
            api_outcome: report.api_outcome.map(str::to_string),
            fetched: report.fetched,
            new_items: report.new_items.len(),
            pruned: report.pruned,
            notified: report.notified,
            status: report.status.as_str().to_string(),
            error: report.error.clone(),
            duration_ms: elapsed.as_millis() as u64,
        };
        if let Err(e) = journal.record(&entry) {
            warn!("journal write failed: {e:#}");
        }
    }
}
