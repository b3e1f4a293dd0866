//! # Event Ordering
//!
//! Deduplication by `(tx_hash, log_index)` and canonical sorting by
//! `(block_number, log_index)`.

use arena_types::DedupKey;
use std::collections::HashSet;

use crate::domain::NormalizedEvent;

/// A batch ready to apply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SortedBatch {
    /// Unseen events in canonical order.
    pub events: Vec<NormalizedEvent>,
    /// Dropped: already applied, or repeated within the batch.
    pub duplicates: usize,
}

/// Drop every event whose key is in `seen` or repeats earlier in the batch,
/// then sort the rest by position.
pub fn dedup_and_sort(events: &[NormalizedEvent], seen: &HashSet<DedupKey>) -> SortedBatch {
    let mut batch_keys = HashSet::with_capacity(events.len());
    let mut fresh = Vec::with_capacity(events.len());
    let mut duplicates = 0;

    for event in events {
        if seen.contains(&event.key) || !batch_keys.insert(event.key) {
            duplicates += 1;
            continue;
        }
        fresh.push(event.clone());
    }

    // Key breaks ties between logs claiming the same position.
    fresh.sort_by(|a, b| a.position.cmp(&b.position).then(a.key.cmp(&b.key)));

    SortedBatch {
        events: fresh,
        duplicates,
    }
}

/// Whether `events` is already in canonical order.
pub fn is_canonical(events: &[NormalizedEvent]) -> bool {
    events.windows(2).all(|w| w[0].position <= w[1].position)
}
