//! Async HTTP client wrapping reqwest.
//!
//! Not a browser — just HTTP requests. Retries network errors and 5xx with
//! exponential backoff, and honours `Retry-After` on 429.

use anyhow::Result;
use std::time::Duration;

/// Desktop Chrome user agent; the portal serves a degraded API to others.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                                      AppleWebKit/537.36 (KHTML, like Gecko) \
                                      Chrome/131.0.0.0 Safari/537.36";

/// Maximum retries after the first attempt.
const MAX_RETRIES: u32 = 2;

/// Response from an HTTP request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Original requested URL.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

/// HTTP client shared by the portal API and webhook delivery.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpClient {
    /// Create a client with the browser user agent.
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::build(timeout, false)
    }

    /// Like [`HttpClient::new`] but skips TLS certificate verification.
    pub fn insecure(timeout: Duration) -> Result<Self> {
        Self::build(timeout, true)
    }

    fn build(timeout: Duration, accept_invalid_certs: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(BROWSER_USER_AGENT)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;
        Ok(Self { client, timeout })
    }

    /// POST a JSON body with retry on 5xx, network errors, and 429.
    ///
    /// `cookies` are sent as a single `Cookie` header.
    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        extra_headers: &[(&str, &str)],
        cookies: &[(&str, &str)],
    ) -> Result<HttpResponse> {
        let cookie_header = cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");

        let mut retries = 0u32;

        loop {
            let mut builder = self.client.post(url).timeout(self.timeout).json(body);
            for (name, value) in extra_headers {
                builder = builder.header(*name, *value);
            }
            if !cookie_header.is_empty() {
                builder = builder.header(reqwest::header::COOKIE, cookie_header.as_str());
            }

            match builder.send().await {
                Ok(r) => {
                    let status = r.status().as_u16();
                    let final_url = r.url().to_string();

                    // Retry on 5xx
                    if status >= 500 && retries < MAX_RETRIES {
                        retries += 1;
                        tracing::debug!(url, status, retries, "server error, retrying");
                        tokio::time::sleep(backoff(retries)).await;
                        continue;
                    }

                    // Backoff on 429
                    if status == 429 && retries < MAX_RETRIES {
                        retries += 1;
                        let retry_after = r
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(2);
                        tokio::time::sleep(Duration::from_secs(retry_after.min(10))).await;
                        continue;
                    }

                    let body = r.text().await.unwrap_or_default();

                    return Ok(HttpResponse {
                        url: url.to_string(),
                        final_url,
                        status,
                        body,
                    });
                }
                Err(e) => {
                    if retries < MAX_RETRIES {
                        retries += 1;
                        tracing::debug!(url, retries, "request failed, retrying: {e}");
                        tokio::time::sleep(backoff(retries)).await;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }
}

fn backoff(retry: u32) -> Duration {
    Duration::from_millis(500 * 2u64.pow(retry.saturating_sub(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_millis(500));
        assert_eq!(backoff(2), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api"))
            .and(header("cookie", "a=1; b=2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::from_secs(5)).unwrap();
        let resp = client
            .post_json(
                &format!("{}/api", server.uri()),
                &serde_json::json!({}),
                &[],
                &[("a", "1"), ("b", "2")],
            )
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "ok");
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::from_secs(5)).unwrap();
        let resp = client
            .post_json(&server.uri(), &serde_json::json!({}), &[], &[])
            .await
            .unwrap();
        assert_eq!(resp.status, 500);
    }
}
