//! `schoolwatch token set`: store a token copied out of a browser by hand.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Local;
use schoolwatch::{TokenRecord, TokenStore};
use serde_json::json;

use crate::acquisition::extract::normalize_token;
use crate::acquisition::manual::ManualTokenSource;
use crate::cli::output::{self, Styled};

/// Save `token` (or the contents of `from_file`, or the configured manual
/// token file) as a fresh token for `username`.
pub async fn run_set(
    config_path: Option<&Path>,
    username: &str,
    token: Option<&str>,
    from_file: Option<&Path>,
) -> Result<()> {
    let config = crate::cli::load_config(config_path)?;
    let Some(account) = config.account(username) else {
        bail!("no student with username '{username}' in the configuration");
    };

    let (token, origin) = match (token, from_file) {
        (Some(t), _) => (normalize_token(t), "command line".to_string()),
        (None, Some(p)) => (read_file(p)?, p.display().to_string()),
        (None, None) => {
            let p = config.paths.manual_token.clone();
            (read_file(&p)?, p.display().to_string())
        }
    };
    if token.is_empty() {
        bail!("the token is empty");
    }

    let store = TokenStore::new(&config.paths.token_cache);
    let stored_params = store
        .load(username)
        .map(|r| r.request_params)
        .unwrap_or_default();
    let record = TokenRecord::new(token, stored_params.merged_with(&account.params), Local::now());
    store
        .save(username, &record)
        .with_context(|| format!("saving token to {}", store.path().display()))?;

    if output::is_json() {
        output::print_json(&json!({
            "username": username,
            "source": origin,
            "acquired_at": record.acquired_at.to_rfc3339(),
            "params": record.request_params.len(),
        }));
    } else if !output::is_quiet() {
        let s = Styled::new();
        eprintln!("  {} token for {} saved (from {origin})", s.ok_sym(), account.name);
        if record.request_params.is_empty() {
            eprintln!(
                "  {} no request parameters known; homework will be scraped from the page",
                s.warn_sym()
            );
        }
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<String> {
    ManualTokenSource::new(PathBuf::from(path))
        .read()
        .with_context(|| format!("no token found in {}", path.display()))
}
