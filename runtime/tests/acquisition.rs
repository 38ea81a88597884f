//! Token acquisition chain: strategy order, freshness boundary, manual
//! tokens, and cached-token validation.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Local};
use common::*;
use schoolwatch::{RequestParams, TokenRecord};
use schoolwatch_runtime::acquisition::{
    freshness_ceiling, AcquisitionError, Strategy, TokenProbe,
};
use schoolwatch_runtime::portal::api::TokenValidity;
use serde_json::json;

struct FixedProbe {
    verdict: TokenValidity,
    calls: AtomicUsize,
}

impl FixedProbe {
    fn new(verdict: TokenValidity) -> Arc<Self> {
        Arc::new(Self {
            verdict,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TokenProbe for FixedProbe {
    async fn probe(&self, _token: &str, _params: &RequestParams) -> TokenValidity {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verdict
    }
}

#[tokio::test]
async fn test_freshness_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let state = State::new(dir.path());
    let auth = Arc::new(FakeAuthenticator::succeeding("login-token"));
    let chain = chain(&state, Arc::clone(&auth));
    let acct = account("Noa", "noa.l");

    let acquired_at = Local::now() - Duration::days(1);
    state.seed_token("noa.l", "cached", acquired_at);

    let just_inside = acquired_at + freshness_ceiling() - Duration::seconds(1);
    let got = chain.acquire(&acct, just_inside).await.unwrap();
    assert_eq!(got.strategy, Strategy::CachedToken);
    assert_eq!(got.token, "cached");
    assert_eq!(got.acquired_at, acquired_at);

    let exactly = acquired_at + freshness_ceiling();
    let got = chain.acquire(&acct, exactly).await.unwrap();
    assert_eq!(got.strategy, Strategy::CachedToken);
    assert_eq!(auth.calls(), 0);

    let just_outside = acquired_at + freshness_ceiling() + Duration::seconds(1);
    let got = chain.acquire(&acct, just_outside).await.unwrap();
    assert_eq!(got.strategy, Strategy::AutomatedLogin);
    assert_eq!(got.token, "login-token");
    assert_eq!(auth.calls(), 1);
}

#[tokio::test]
async fn test_future_dated_token_is_not_reused() {
    let dir = tempfile::tempdir().unwrap();
    let state = State::new(dir.path());
    let auth = Arc::new(FakeAuthenticator::succeeding("login-token"));
    let chain = chain(&state, Arc::clone(&auth));

    let now = Local::now();
    state.seed_token("noa.l", "from-the-future", now + Duration::hours(2));

    let got = chain.acquire(&account("Noa", "noa.l"), now).await.unwrap();
    assert_eq!(got.strategy, Strategy::AutomatedLogin);
    let saved = state.tokens().load("noa.l").unwrap();
    assert_eq!(saved.token, "login-token");
    assert_eq!(saved.acquired_at, now);
}

#[tokio::test]
async fn test_manual_token_after_failed_login() {
    let dir = tempfile::tempdir().unwrap();
    let state = State::new(dir.path());
    std::fs::write(state.manual_path(), "  abc%3D%3D  \n").unwrap();
    let chain = chain(&state, Arc::new(FakeAuthenticator::failing()));

    let got = chain.acquire(&account("Noa", "noa.l"), Local::now()).await.unwrap();
    assert_eq!(got.strategy, Strategy::ManualToken);
    assert_eq!(got.token, "abc==");
    assert_eq!(got.params.get("studentID"), Some(&json!(123)));
    assert_eq!(state.tokens().load("noa.l").unwrap().token, "abc==");
}

#[tokio::test]
async fn test_rejected_manual_token_is_not_reused() {
    let dir = tempfile::tempdir().unwrap();
    let state = State::new(dir.path());
    let now = Local::now();
    state.seed_token("noa.l", "stale-manual", now - Duration::hours(1));
    state.tokens().mark_rejected("noa.l", now).unwrap();
    std::fs::write(state.manual_path(), "stale-manual\n").unwrap();

    let chain = chain(&state, Arc::new(FakeAuthenticator::failing()));
    let err = chain.acquire(&account("Noa", "noa.l"), now).await.unwrap_err();
    let AcquisitionError::Exhausted(attempts) = err else {
        panic!("expected exhaustion");
    };
    let order: Vec<_> = attempts.iter().map(|(s, _)| *s).collect();
    assert_eq!(order, Strategy::CHAIN.to_vec());
    assert!(attempts[2].1.contains("already rejected"));
}

#[tokio::test]
async fn test_nothing_available_is_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let state = State::new(dir.path());
    let chain = chain(&state, Arc::new(FakeAuthenticator::failing()));

    let err = chain.acquire(&account("Noa", "noa.l"), Local::now()).await.unwrap_err();
    assert!(matches!(err, AcquisitionError::Exhausted(ref a) if a.len() == 3));
    assert!(state.tokens().load("noa.l").is_none());
}

#[tokio::test]
async fn test_login_params_precedence() {
    let dir = tempfile::tempdir().unwrap();
    let state = State::new(dir.path());
    let now = Local::now();

    let mut stored = RequestParams::new();
    stored.insert("studentID", json!(1));
    stored.insert("studyYear", json!(2023));
    stored.insert("weekIndex", json!(0));
    state
        .tokens()
        .save("noa.l", &TokenRecord::new("old", stored, now - Duration::hours(30)))
        .unwrap();

    let mut discovered = RequestParams::new();
    discovered.insert("studentID", json!(2));
    discovered.insert("studyYear", json!(2025));
    let auth = FakeAuthenticator {
        discovered,
        ..FakeAuthenticator::succeeding("new")
    };
    let chain = chain(&state, Arc::new(auth));

    // The account pins studentID = 123.
    let got = chain.acquire(&account("Noa", "noa.l"), now).await.unwrap();
    assert_eq!(got.params.get("studentID"), Some(&json!(123)));
    assert_eq!(got.params.get("studyYear"), Some(&json!(2025)));
    assert_eq!(got.params.get("weekIndex"), Some(&json!(0)));
    assert_eq!(state.tokens().load("noa.l").unwrap().request_params, got.params);
}

#[tokio::test]
async fn test_probe_verdicts() {
    let dir = tempfile::tempdir().unwrap();
    let state = State::new(dir.path());
    let now = Local::now();
    let acct = account("Noa", "noa.l");

    for (verdict, expected) in [
        (TokenValidity::Valid, Strategy::CachedToken),
        (TokenValidity::Unknown, Strategy::CachedToken),
        (TokenValidity::Invalid, Strategy::AutomatedLogin),
    ] {
        state.seed_token("noa.l", "cached", now - Duration::hours(1));
        let probe = FixedProbe::new(verdict);
        let chain = chain(&state, Arc::new(FakeAuthenticator::succeeding("login")))
            .with_probe(probe.clone());

        let got = chain.acquire(&acct, now).await.unwrap();
        assert_eq!(got.strategy, expected, "{verdict:?}");
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_probe_skipped_without_params() {
    let dir = tempfile::tempdir().unwrap();
    let state = State::new(dir.path());
    let now = Local::now();
    state
        .tokens()
        .save("noa.l", &TokenRecord::new("cached", RequestParams::new(), now))
        .unwrap();

    let probe = FixedProbe::new(TokenValidity::Invalid);
    let chain = chain(&state, Arc::new(FakeAuthenticator::failing())).with_probe(probe.clone());
    let mut acct = account("Noa", "noa.l");
    acct.params = RequestParams::new();

    let got = chain.acquire(&acct, now).await.unwrap();
    assert_eq!(got.strategy, Strategy::CachedToken);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
}
