//! Day-level indices and dedup planning
//!
//! Pure helpers behind the reconciliation invariants:
//! - the per-day maximum live value (import must never regress a day)
//! - the imported-sample-id set (a sample id is imported at most once)
//! - the dedup plan (at most one live entry per author-day)

use crate::store::MetricEntry;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Maximum live value per calendar day
///
/// Soft-deleted entries are excluded: a deleted entry must not block a
/// re-import of the same day at a lower value.
pub fn max_value_by_day(entries: &[MetricEntry]) -> HashMap<NaiveDate, f64> {
    let mut index = HashMap::new();

    for entry in entries.iter().filter(|e| e.is_live()) {
        index
            .entry(entry.day())
            .and_modify(|best: &mut f64| *best = best.max(entry.value))
            .or_insert(entry.value);
    }

    index
}

/// Every sample id already attached to an entry
///
/// Includes soft-deleted entries: tombstones keep a deleted sample from
/// being re-imported.
pub fn known_sample_ids(entries: &[MetricEntry]) -> HashSet<String> {
    entries
        .iter()
        .filter_map(|e| e.external_sample_id.clone())
        .collect()
}

/// Result of planning a dedup pass
#[derive(Debug, Clone, Default)]
pub struct DedupPlan {
    /// Days that had more than one live entry
    pub duplicate_days: usize,
    /// Ids of the entries that survive
    pub survivors: Vec<Uuid>,
    /// Entries to delete from both stores
    pub losers: Vec<MetricEntry>,
}

/// Plan the day-level dedup pass
///
/// For each calendar day with more than one live entry, the entry with the
/// earliest `date` survives. This intentionally differs from the import-time
/// monotonic-value guard: the pass removes accidental duplicate manual
/// entries, it does not pick the largest value. Ties break on `date_created`,
/// then id, so the pass is deterministic.
pub fn plan(entries: &[MetricEntry]) -> DedupPlan {
    let mut by_day: HashMap<NaiveDate, Vec<&MetricEntry>> = HashMap::new();
    for entry in entries.iter().filter(|e| e.is_live()) {
        by_day.entry(entry.day()).or_default().push(entry);
    }

    let mut plan = DedupPlan::default();
    for (_, mut day_entries) in by_day {
        if day_entries.len() < 2 {
            if let Some(only) = day_entries.first() {
                plan.survivors.push(only.id);
            }
            continue;
        }

        plan.duplicate_days += 1;
        day_entries.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then(a.date_created.cmp(&b.date_created))
                .then(a.id.cmp(&b.id))
        });

        plan.survivors.push(day_entries[0].id);
        plan.losers
            .extend(day_entries[1..].iter().map(|e| (*e).clone()));
    }

    plan
}
