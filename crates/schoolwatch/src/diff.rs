//! Change detection between the last known and the freshly fetched listing.

use chrono::{DateTime, Local};

use crate::fingerprint::Fingerprint;
use crate::types::{HomeworkItem, SeenEntry, SeenSet};

/// Result of comparing a fetched listing against a seen-set.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// Items not present in the previous seen-set, in listing order.
    pub new_items: Vec<HomeworkItem>,
    /// The replacement seen-set. Its keys are exactly the fingerprints of
    /// this listing.
    pub seen: SeenSet,
    /// Number of previously seen entries that dropped out.
    pub pruned: usize,
}

impl Detection {
    pub fn has_changes(&self) -> bool {
        !self.new_items.is_empty() || self.pruned > 0
    }
}

/// Compare `items` against `previous`.
///
/// Entries still present keep their original `detected_at` and snapshot.
/// Items repeated within one listing produce a single entry and are
/// reported as new at most once.
pub fn detect(previous: &SeenSet, items: &[HomeworkItem], now: DateTime<Local>) -> Detection {
    let mut seen = SeenSet::new();
    let mut new_items = Vec::new();

    for item in items {
        let fp = Fingerprint::of(item);
        if seen.contains_key(&fp) {
            continue;
        }
        match previous.get(&fp) {
            Some(entry) => {
                seen.insert(fp, entry.clone());
            }
            None => {
                new_items.push(item.clone());
                seen.insert(
                    fp,
                    SeenEntry {
                        detected_at: now,
                        item: item.clone(),
                    },
                );
            }
        }
    }

    let pruned = previous.keys().filter(|fp| !seen.contains_key(*fp)).count();

    Detection {
        new_items,
        seen,
        pruned,
    }
}
