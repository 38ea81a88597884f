//! JSON webhook delivery.
//!
//! Targets use the notifier URL convention: `json://host/path` posts over
//! HTTP, `jsons://host/path` over HTTPS, and plain `http(s)://` URLs are
//! taken as-is. `?verify=no` turns off certificate checks.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use super::{Message, Notifier};
use crate::portal::http_client::HttpClient;

/// POSTs `{"title", "message"}` to a URL.
pub struct WebhookNotifier {
    url: Url,
    client: HttpClient,
}

impl WebhookNotifier {
    pub fn parse(target: &str, timeout: Duration) -> Result<Self> {
        let (url, verify_tls) = parse_target(target)?;
        let client = if verify_tls {
            HttpClient::new(timeout)?
        } else {
            HttpClient::insecure(timeout)?
        };
        Ok(Self { url, client })
    }
}

/// Map a notifier target onto an HTTP(S) URL and the TLS verification flag.
pub fn parse_target(target: &str) -> Result<(Url, bool)> {
    let target = target.trim();
    let http_form = if let Some(rest) = target.strip_prefix("jsons://") {
        format!("https://{rest}")
    } else if let Some(rest) = target.strip_prefix("json://") {
        format!("http://{rest}")
    } else if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        bail!("unsupported notifier scheme");
    };

    let mut url = Url::parse(&http_form).context("invalid notifier URL")?;
    let mut verify_tls = true;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, v)| {
            if k == "verify" {
                verify_tls = !matches!(v.as_ref(), "no" | "false" | "0");
                false
            } else {
                true
            }
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    Ok((url, verify_tls))
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn describe(&self) -> String {
        format!(
            "{}://{}{}",
            self.url.scheme(),
            self.url.host_str().unwrap_or_default(),
            self.url.path()
        )
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let payload = serde_json::json!({
            "title": message.title,
            "message": message.body,
        });
        let resp = self
            .client
            .post_json(self.url.as_str(), &payload, &[], &[])
            .await?;
        if !(200..300).contains(&resp.status) {
            bail!("webhook answered HTTP {}", resp.status);
        }
        Ok(())
    }
}
