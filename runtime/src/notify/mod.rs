//! Outbound notifications for newly detected homework.

pub mod mqtt;
pub mod webhook;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use schoolwatch::HomeworkItem;
use std::time::Duration;
use tracing::{info, warn};

use webhook::WebhookNotifier;

/// Homework text longer than this is cut in messages.
const MAX_BODY_CHARS: usize = 200;

/// One notification: a title and a plain-text body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub title: String,
    pub body: String,
}

/// A delivery target.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Target description safe to log (no credentials).
    fn describe(&self) -> String;
    async fn send(&self, message: &Message) -> Result<()>;
}

/// Delivery tally for one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub sent: usize,
    pub failed: usize,
}

/// Sends each message to every configured target.
#[derive(Default)]
pub struct Dispatcher {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl Dispatcher {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    /// Build from target URLs. Unparseable targets are logged and skipped.
    pub fn from_targets(targets: &[String], timeout: Duration) -> Self {
        let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();
        for target in targets {
            match WebhookNotifier::parse(target, timeout) {
                Ok(n) => notifiers.push(Box::new(n)),
                Err(e) => warn!("ignoring notifier '{target}': {e:#}"),
            }
        }
        Self { notifiers }
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub async fn dispatch(&self, message: &Message) -> Delivery {
        let mut delivery = Delivery::default();
        if self.notifiers.is_empty() {
            warn!("no notifiers configured, dropping '{}'", message.title);
            return delivery;
        }
        for n in &self.notifiers {
            match n.send(message).await {
                Ok(()) => {
                    delivery.sent += 1;
                    info!(target = %n.describe(), "notification sent: {}", message.title);
                }
                Err(e) => {
                    delivery.failed += 1;
                    warn!(target = %n.describe(), "notification failed: {e:#}");
                }
            }
        }
        delivery
    }
}

/// Build the message for `student`. With `only_on` set, items dated any
/// other day are left out; `None` means there is nothing to send.
pub fn compose(
    student: &str,
    items: &[HomeworkItem],
    only_on: Option<NaiveDate>,
) -> Option<Message> {
    let selected: Vec<&HomeworkItem> = items
        .iter()
        .filter(|i| only_on.map_or(true, |d| i.date == d))
        .collect();
    if selected.is_empty() {
        return None;
    }

    let mut body = match only_on {
        Some(day) => format!("📚 New homework for {student} (Today: {day}):\n\n"),
        None => format!("📚 New homework for {student}:\n\n"),
    };
    for (idx, item) in selected.iter().enumerate() {
        body.push_str(&format!("{}. {} ({})\n", idx + 1, item.subject, item.date));
        body.push_str(&format!("   👨‍🏫 {}\n", item.teacher));
        let text: String = item.body.chars().take(MAX_BODY_CHARS).collect();
        body.push_str(&format!("   📝 {text}\n"));
        if item.body.chars().count() > MAX_BODY_CHARS {
            body.push_str("   ...\n");
        }
        body.push('\n');
    }

    Some(Message {
        title: format!("SmartSchool Homework - {student}"),
        body,
    })
}
