//! `schoolwatch check`: one run over every account.

use std::path::Path;

use anyhow::Result;

use crate::cli::output::{self, Styled};
use crate::coordinator::{AccountStatus, Coordinator, RunSummary};

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = crate::cli::load_config(config_path)?;
    let mut coordinator = Coordinator::from_config(&config, crate::cli::launcher(&config))?;
    let summary = coordinator.run_once().await;
    print_summary(&summary);
    Ok(())
}

/// Human or JSON rendering of a run.
pub fn print_summary(summary: &RunSummary) {
    if output::is_json() {
        match serde_json::to_value(summary) {
            Ok(v) => output::print_json(&v),
            Err(e) => eprintln!("  Error: {e}"),
        }
        return;
    }
    if output::is_quiet() {
        return;
    }

    let s = Styled::new();
    eprintln!();
    for r in &summary.reports {
        let sym = match r.status {
            AccountStatus::Checked => s.ok_sym(),
            AccountStatus::NoData => s.warn_sym(),
            AccountStatus::NoToken => s.err_sym(),
        };
        let via = match (r.strategy, r.channel) {
            (Some(st), Some(ch)) => format!("{} via {}", st.as_str(), ch.as_str()),
            (Some(st), None) => st.as_str().to_string(),
            _ => String::new(),
        };
        eprintln!("  {sym} {} ({}) {}", r.student, r.account, s.dim(&via));
        match r.status {
            AccountStatus::Checked => {
                eprintln!(
                    "      {} listed, {} new, {} gone{}",
                    r.fetched.unwrap_or(0),
                    r.new_items.len(),
                    r.pruned,
                    if r.notified { ", notified" } else { "" }
                );
                for item in &r.new_items {
                    eprintln!("      + {} {}: {}", item.date, item.subject, item.body);
                }
            }
            _ => {
                if let Some(err) = &r.error {
                    eprintln!("      {err}");
                }
                if r.token_rejected {
                    eprintln!("      token marked rejected");
                }
            }
        }
    }
    eprintln!();
}
