//! `schoolwatch status`: tracked homework, token ages, and recent runs.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Local, NaiveDate};
use schoolwatch::{SeenSet, SeenStore, TokenRecord, TokenStore};
use serde_json::json;

use crate::acquisition::freshness_ceiling;
use crate::cli::output::{self, Styled};
use crate::journal;

const RECENT_RUNS: usize = 10;

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = crate::cli::load_config(config_path)?;
    let now = Local::now();

    let tokens = TokenStore::new(&config.paths.token_cache);
    let seen = SeenStore::new(&config.paths.seen_state).load_all();
    let recent = journal::read_recent(&config.paths.journal, RECENT_RUNS);

    if output::is_json() {
        let accounts: Vec<_> = config
            .accounts
            .iter()
            .map(|a| {
                let record = tokens.load(&a.username);
                json!({
                    "username": a.username,
                    "student": a.name,
                    "token": record.as_ref().map(|r| token_json(r, now)),
                })
            })
            .collect();
        let homework: BTreeMap<_, _> = seen
            .iter()
            .map(|(student, set)| (student.clone(), by_date(set)))
            .collect();
        output::print_json(&json!({
            "accounts": accounts,
            "homework": homework,
            "recent_runs": recent,
        }));
        return Ok(());
    }

    let s = Styled::new();
    println!("Tokens");
    println!("======");
    for a in &config.accounts {
        match tokens.load(&a.username) {
            Some(r) => {
                let (sym, state) = token_state(&r, now);
                let sym = if sym { s.ok_sym() } else { s.warn_sym() };
                println!("{sym} {} ({}): {state}", a.name, a.username);
            }
            None => println!("{} {} ({}): no token cached", s.warn_sym(), a.name, a.username),
        }
    }

    println!();
    println!("Tracked homework");
    println!("================");
    if seen.is_empty() {
        println!("  nothing tracked yet");
    }
    for (student, set) in &seen {
        println!("{student}: {} item(s)", set.len());
        for (date, items) in by_date(set) {
            println!("  {date}");
            for (subject, body) in items {
                println!("    - {subject}: {body}");
            }
        }
    }

    if !recent.is_empty() {
        println!();
        println!("Recent runs");
        println!("===========");
        for e in &recent {
            println!(
                "  {} {} {} new={} {}",
                e.timestamp,
                e.account,
                e.status,
                e.new_items,
                s.dim(e.error.as_deref().unwrap_or(""))
            );
        }
    }
    Ok(())
}

/// Whether the token is usable, plus a description of its age.
fn token_state(record: &TokenRecord, now: DateTime<Local>) -> (bool, String) {
    if record.rejected_at.is_some() {
        return (false, "rejected by the portal".into());
    }
    let age = record.age(now);
    let remaining = freshness_ceiling() - age;
    if record.is_fresh(now, freshness_ceiling()) {
        (
            true,
            format!(
                "{}h{:02}m old, {}h{:02}m remaining",
                age.num_hours(),
                age.num_minutes() % 60,
                remaining.num_hours(),
                remaining.num_minutes() % 60
            ),
        )
    } else {
        (false, format!("expired ({}h old)", age.num_hours()))
    }
}

fn token_json(record: &TokenRecord, now: DateTime<Local>) -> serde_json::Value {
    let age = record.age(now);
    json!({
        "acquired_at": record.acquired_at.to_rfc3339(),
        "age_minutes": age.num_minutes(),
        "remaining_minutes": (freshness_ceiling() - age).num_minutes().max(0),
        "fresh": record.is_fresh(now, freshness_ceiling()),
        "rejected_at": record.rejected_at.map(|t| t.to_rfc3339()),
        "params": record.request_params.len(),
    })
}

/// Items grouped by due date, as `(subject, body)` pairs.
fn by_date(set: &SeenSet) -> BTreeMap<NaiveDate, Vec<(String, String)>> {
    let mut out: BTreeMap<NaiveDate, Vec<(String, String)>> = BTreeMap::new();
    for entry in set.values() {
        out.entry(entry.item.date)
            .or_default()
            .push((entry.item.subject.clone(), entry.item.body.clone()));
    }
    out
}
