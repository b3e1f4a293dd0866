//! Room-scoped log helpers.
//!
//! Every line that concerns a room carries the same fields so logs can be
//! filtered per room:
//! - `component`: poller, ingestor, submitter, ...
//! - `room_id`: the room the line is about
//! - additional context fields

/// Log a room-scoped event with standard fields.
///
/// ```rust,ignore
/// log_room_event!(warn, "poller", room, "Marking room stale", attempts = 5);
/// ```
#[macro_export]
macro_rules! log_room_event {
    ($level:ident, $component:expr, $room:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = $component,
            room_id = %$room,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a transaction-related event with standard fields.
#[macro_export]
macro_rules! log_tx_event {
    ($level:ident, $component:expr, $msg:expr, $tx_hash:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = $component,
            tx_hash = %$tx_hash,
            $($($field)*,)?
            $msg
        )
    };
}
