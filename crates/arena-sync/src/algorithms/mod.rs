//! # Algorithms
//!
//! Pure logic: normalization, ordering, the reducer and retry backoff.

pub mod backoff;
pub mod normalize;
pub mod ordering;
pub mod reducer;

pub use backoff::{retry_with_backoff, BackoffPolicy, Retried};
pub use normalize::{normalize_log, normalize_logs, normalize_player, normalize_room};
pub use ordering::{dedup_and_sort, is_canonical, SortedBatch};
pub use reducer::{reduce, ApplyReport, Reduction, ReducerConfig};
