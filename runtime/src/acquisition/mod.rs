//! Token acquisition.
//!
//! Strategies run in a fixed order (cached token, browser login, manual
//! token) and the first one that yields a token wins. Whatever wins is
//! written back to the token store straight away, together with the
//! request parameters known at that point.
//!
//! Parameter precedence when persisting: stored < discovered at login <
//! pinned in configuration.

pub mod extract;
pub mod login;
pub mod manual;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use schoolwatch::{Account, RequestParams, TokenRecord, TokenStore, WatchError};
use serde::Serialize;
use tracing::{info, warn};

use crate::portal::api::{PortalApi, TokenValidity};
use login::Authenticator;
use manual::ManualTokenSource;

/// Cached tokens older than this are not reused. The portal's tokens live
/// roughly a day.
pub const FRESHNESS_CEILING_HOURS: i64 = 23;

pub fn freshness_ceiling() -> chrono::Duration {
    chrono::Duration::hours(FRESHNESS_CEILING_HOURS)
}

/// A way of obtaining a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    CachedToken,
    AutomatedLogin,
    ManualToken,
}

impl Strategy {
    /// Default order.
    pub const CHAIN: [Strategy; 3] = [
        Strategy::CachedToken,
        Strategy::AutomatedLogin,
        Strategy::ManualToken,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::CachedToken => "cached_token",
            Strategy::AutomatedLogin => "automated_login",
            Strategy::ManualToken => "manual_token",
        }
    }
}

/// A usable token.
#[derive(Debug, Clone)]
pub struct Acquired {
    pub token: String,
    pub params: RequestParams,
    pub strategy: Strategy,
    pub acquired_at: DateTime<Local>,
}

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("no strategy produced a token ({})", summarize(.0))]
    Exhausted(Vec<(Strategy, String)>),

    #[error("token obtained via {strategy:?} but could not be saved: {source}")]
    Persist {
        strategy: Strategy,
        source: WatchError,
    },
}

fn summarize(attempts: &[(Strategy, String)]) -> String {
    attempts
        .iter()
        .map(|(s, why)| format!("{}: {why}", s.as_str()))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Checks a cached token against the portal before reuse.
#[async_trait]
pub trait TokenProbe: Send + Sync {
    async fn probe(&self, token: &str, params: &RequestParams) -> TokenValidity;
}

#[async_trait]
impl TokenProbe for PortalApi {
    async fn probe(&self, token: &str, params: &RequestParams) -> TokenValidity {
        self.fetch_homework(token, params).await.token_validity()
    }
}

/// Runs the strategies for one account at a time.
pub struct AcquisitionChain {
    store: TokenStore,
    authenticator: Arc<dyn Authenticator>,
    manual: ManualTokenSource,
    probe: Option<Arc<dyn TokenProbe>>,
    ceiling: chrono::Duration,
    order: Vec<Strategy>,
}

impl AcquisitionChain {
    pub fn new(
        store: TokenStore,
        authenticator: Arc<dyn Authenticator>,
        manual: ManualTokenSource,
    ) -> Self {
        Self {
            store,
            authenticator,
            manual,
            probe: None,
            ceiling: freshness_ceiling(),
            order: Strategy::CHAIN.to_vec(),
        }
    }

    /// Validate cached tokens with `probe` before reusing them.
    pub fn with_probe(mut self, probe: Arc<dyn TokenProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Restrict or reorder the strategies tried.
    pub fn with_order(mut self, order: Vec<Strategy>) -> Self {
        self.order = order;
        self
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Produce a token for `account`, or explain why none could be had.
    pub async fn acquire(
        &self,
        account: &Account,
        now: DateTime<Local>,
    ) -> Result<Acquired, AcquisitionError> {
        let stored = self.store.load(&account.username);
        let mut attempts = Vec::new();

        for &strategy in &self.order {
            info!(account = %account.username, strategy = strategy.as_str(), "trying");
            match self.attempt(strategy, account, stored.as_ref(), now).await {
                Ok(acquired) => {
                    self.persist(account, stored.as_ref(), &acquired)
                        .map_err(|source| AcquisitionError::Persist { strategy, source })?;
                    info!(
                        account = %account.username,
                        strategy = strategy.as_str(),
                        params = acquired.params.len(),
                        "token acquired"
                    );
                    return Ok(acquired);
                }
                Err(reason) => {
                    info!(
                        account = %account.username,
                        strategy = strategy.as_str(),
                        "strategy failed: {reason}"
                    );
                    attempts.push((strategy, reason));
                }
            }
        }

        warn!(
            account = %account.username,
            "all token strategies failed, skipping account this run"
        );
        Err(AcquisitionError::Exhausted(attempts))
    }

    async fn attempt(
        &self,
        strategy: Strategy,
        account: &Account,
        stored: Option<&TokenRecord>,
        now: DateTime<Local>,
    ) -> Result<Acquired, String> {
        let stored_params = stored.map(|r| r.request_params.clone()).unwrap_or_default();

        match strategy {
            Strategy::CachedToken => {
                let record = stored.ok_or("no cached token")?;
                if record.rejected_at.is_some() {
                    return Err("cached token was rejected by the portal".into());
                }
                let age = record.age(now);
                if age < chrono::Duration::zero() {
                    return Err("cached token is stamped in the future".into());
                }
                if !record.is_fresh(now, self.ceiling) {
                    return Err(format!(
                        "cached token is {}h{:02}m old",
                        age.num_hours(),
                        age.num_minutes() % 60
                    ));
                }
                let params = stored_params.merged_with(&account.params);
                if let Some(probe) = &self.probe {
                    if params.is_empty() {
                        info!(
                            account = %account.username,
                            "no request parameters, skipping validation"
                        );
                    } else {
                        match probe.probe(&record.token, &params).await {
                            TokenValidity::Valid => {}
                            TokenValidity::Invalid => {
                                return Err("portal refused the cached token".into())
                            }
                            TokenValidity::Unknown => info!(
                                account = %account.username,
                                "validation inconclusive, keeping cached token"
                            ),
                        }
                    }
                }
                Ok(Acquired {
                    token: record.token.clone(),
                    params,
                    strategy,
                    acquired_at: record.acquired_at,
                })
            }
            Strategy::AutomatedLogin => {
                let result = self
                    .authenticator
                    .login(account)
                    .await
                    .map_err(|e| format!("{e:#}"))?;
                Ok(Acquired {
                    token: result.token,
                    params: stored_params
                        .merged_with(&result.discovered)
                        .merged_with(&account.params),
                    strategy,
                    acquired_at: now,
                })
            }
            Strategy::ManualToken => {
                let token = self.manual.read().ok_or("no manual token available")?;
                if let Some(r) = stored {
                    if r.token == token && r.rejected_at.is_some() {
                        return Err("manual token was already rejected by the portal".into());
                    }
                }
                Ok(Acquired {
                    token,
                    params: stored_params.merged_with(&account.params),
                    strategy,
                    acquired_at: now,
                })
            }
        }
    }

    fn persist(
        &self,
        account: &Account,
        stored: Option<&TokenRecord>,
        acquired: &Acquired,
    ) -> Result<(), WatchError> {
        let record = TokenRecord::new(
            acquired.token.clone(),
            acquired.params.clone(),
            acquired.acquired_at,
        );
        if stored == Some(&record) {
            return Ok(());
        }
        self.store.save(&account.username, &record)
    }
}
