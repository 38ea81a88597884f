//! `schoolwatch login`: log one account in through the browser and cache
//! the token.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Local;
use schoolwatch::TokenStore;
use serde_json::json;

use crate::acquisition::login::{BrowserAuthenticator, LoginSettings};
use crate::acquisition::manual::ManualTokenSource;
use crate::acquisition::{AcquisitionChain, Strategy};
use crate::cli::output::{self, Styled};
use crate::config::ChallengeMode;
use crate::renderer::BrowserMode;

/// With `headed`, the browser window is shown and the challenge is left
/// to whoever is watching.
pub async fn run(config_path: Option<&Path>, username: &str, headed: bool) -> Result<()> {
    let config = crate::cli::load_config(config_path)?;
    let Some(account) = config.account(username).cloned() else {
        bail!("no student with username '{username}' in the configuration");
    };

    let mut settings = LoginSettings::from_config(&config);
    if headed {
        settings.mode = BrowserMode::Headed;
        settings.challenge = ChallengeMode::Interactive;
    }
    let authenticator =
        BrowserAuthenticator::new(crate::cli::launcher(&config), config.portal.clone(), settings);
    let chain = AcquisitionChain::new(
        TokenStore::new(&config.paths.token_cache),
        Arc::new(authenticator),
        ManualTokenSource::new(&config.paths.manual_token),
    )
    .with_order(vec![Strategy::AutomatedLogin]);

    let acquired = chain.acquire(&account, Local::now()).await?;

    if output::is_json() {
        output::print_json(&json!({
            "username": account.username,
            "strategy": acquired.strategy,
            "acquired_at": acquired.acquired_at.to_rfc3339(),
            "params": acquired.params,
        }));
    } else if !output::is_quiet() {
        let s = Styled::new();
        eprintln!(
            "  {} logged in as {}, token cached ({} request parameter(s))",
            s.ok_sym(),
            account.username,
            acquired.params.len()
        );
    }
    Ok(())
}
