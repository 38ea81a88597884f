//! Homework retrieval: structured API first, rendered-page scrape second.
//!
//! The API answer is authoritative when it reports success, even when the
//! listing is empty. Every other API outcome falls through to the scrape,
//! which is best effort: an empty scrape counts as "nothing fetched" so a
//! parsing miss never wipes the seen-set.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, NaiveDate};
use schoolwatch::{HomeworkItem, RequestParams};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::portal::api::{ApiOutcome, PortalApi};
use crate::portal::scrape::parse_page_text;
use crate::portal::Endpoints;
use crate::renderer::{BrowserCookie, BrowserMode, BrowserSession, Launcher, RenderContext};

/// Which path produced the listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Api,
    Scrape,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Api => "api",
            Channel::Scrape => "scrape",
        }
    }
}

/// Outcome of one fetch.
#[derive(Debug, Clone)]
pub struct FetchReport {
    /// `None` when neither path produced anything.
    pub items: Option<Vec<HomeworkItem>>,
    pub channel: Option<Channel>,
    /// Label of the API outcome, or `skipped` when no parameters were known.
    pub api_outcome: &'static str,
    /// The portal refused the token outright and the scrape did not help.
    pub hard_rejection: bool,
}

/// Result of scraping the pupil-card page.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrapeOutcome {
    Items(Vec<HomeworkItem>),
    /// The page bounced to the login form.
    LoginRedirect,
    Failed(String),
}

/// Drives the homework page in a browser and parses its text.
pub struct PageScraper {
    launcher: Arc<dyn Launcher>,
    endpoints: Endpoints,
    mode: BrowserMode,
    navigation_timeout: Duration,
    settle_timeout: Duration,
    poll_interval: Duration,
}

impl PageScraper {
    pub fn new(
        launcher: Arc<dyn Launcher>,
        endpoints: Endpoints,
        mode: BrowserMode,
        navigation_timeout: Duration,
        settle_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            launcher,
            endpoints,
            mode,
            navigation_timeout,
            settle_timeout,
            poll_interval,
        }
    }

    pub async fn scrape(&self, token: &str, today: NaiveDate) -> ScrapeOutcome {
        let mut session = match BrowserSession::open(self.launcher.as_ref(), self.mode).await {
            Ok(s) => s,
            Err(e) => return ScrapeOutcome::Failed(format!("cannot start browser: {e:#}")),
        };
        let result = match session.context() {
            Ok(ctx) => self.drive(ctx, token, today).await,
            Err(e) => Err(e),
        };
        session.close().await;

        result.unwrap_or_else(|e| ScrapeOutcome::Failed(format!("{e:#}")))
    }

    async fn drive(
        &self,
        ctx: &mut dyn RenderContext,
        token: &str,
        today: NaiveDate,
    ) -> Result<ScrapeOutcome> {
        ctx.set_cookie(&BrowserCookie::new(
            &self.endpoints.token_cookie,
            token,
            &self.endpoints.cookie_domain,
        ))
        .await?;
        let nav = ctx
            .navigate(
                &self.endpoints.homework_page_url,
                self.navigation_timeout.as_millis() as u64,
            )
            .await?;
        debug!(url = %nav.final_url, ms = nav.load_time_ms, "homework page loaded");

        let text = self.settled_text(ctx).await?;
        if self.endpoints.is_login_url(&ctx.get_url().await?) {
            return Ok(ScrapeOutcome::LoginRedirect);
        }
        Ok(ScrapeOutcome::Items(parse_page_text(&text, today)))
    }

    /// Page text once two consecutive reads agree, or whatever was last
    /// read when the settle timeout runs out.
    async fn settled_text(&self, ctx: &dyn RenderContext) -> Result<String> {
        let deadline = Instant::now() + self.settle_timeout;
        let mut last = String::new();
        loop {
            let text = ctx.inner_text().await?;
            if !text.trim().is_empty() && text == last {
                return Ok(text);
            }
            last = text;
            let now = Instant::now();
            if now >= deadline {
                return Ok(last);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

/// Fetches the homework listing for one token.
pub struct HomeworkFetcher {
    api: PortalApi,
    scraper: PageScraper,
}

impl HomeworkFetcher {
    pub fn new(api: PortalApi, scraper: PageScraper) -> Self {
        Self { api, scraper }
    }

    pub fn api(&self) -> &PortalApi {
        &self.api
    }

    pub async fn fetch(&self, token: &str, params: &RequestParams) -> FetchReport {
        let mut api_outcome = "skipped";
        let mut unauthorized = false;

        if params.is_empty() {
            info!("no request parameters known, going straight to page scrape");
        } else {
            let outcome = self.api.fetch_homework(token, params).await;
            api_outcome = outcome.label();
            match outcome {
                ApiOutcome::Success(items) => {
                    info!(count = items.len(), "homework fetched from API");
                    return FetchReport {
                        items: Some(items),
                        channel: Some(Channel::Api),
                        api_outcome,
                        hard_rejection: false,
                    };
                }
                ApiOutcome::Unauthorized(status) => {
                    unauthorized = true;
                    warn!(status, "API rejected the token, trying page scrape");
                }
                ApiOutcome::Blocked => warn!("API blocked the request, trying page scrape"),
                ApiOutcome::Failed(desc) => {
                    warn!("API reported failure ({desc}), trying page scrape")
                }
                ApiOutcome::Malformed(e) => {
                    warn!("unexpected API response ({e}), trying page scrape")
                }
                ApiOutcome::Transport(e) => warn!("API unreachable ({e}), trying page scrape"),
            }
        }

        let today = Local::now().date_naive();
        match self.scraper.scrape(token, today).await {
            ScrapeOutcome::Items(items) if !items.is_empty() => {
                info!(count = items.len(), "homework parsed from page");
                FetchReport {
                    items: Some(items),
                    channel: Some(Channel::Scrape),
                    api_outcome,
                    hard_rejection: false,
                }
            }
            ScrapeOutcome::Items(_) => {
                warn!("page scrape found no homework");
                self.absent(api_outcome, unauthorized)
            }
            ScrapeOutcome::LoginRedirect => {
                warn!("homework page redirected to login");
                self.absent(api_outcome, true)
            }
            ScrapeOutcome::Failed(e) => {
                warn!("page scrape failed: {e}");
                self.absent(api_outcome, unauthorized)
            }
        }
    }

    fn absent(&self, api_outcome: &'static str, hard_rejection: bool) -> FetchReport {
        FetchReport {
            items: None,
            channel: None,
            api_outcome,
            hard_rejection,
        }
    }
}
