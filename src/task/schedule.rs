//! Long-delay scheduling.
//!
//! The queue caps a message's delivery delay at [`MAX_QUEUE_DELAY_SECS`].
//! A task due further out is sent with the maximum delay and an unchanged
//! `execute_datetime`; every time it comes back the remaining lead time is
//! recomputed and the message is sent again until it is due.
//!
//! [`MAX_QUEUE_DELAY_SECS`]: crate::task::transport::MAX_QUEUE_DELAY_SECS

use chrono::{DateTime, Utc};

/// Whole seconds until `execute_at`, negative when it has passed.
pub fn remaining_seconds(execute_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (execute_at - now).num_seconds()
}

/// Delay to request when first sending a task due at `execute_at`.
///
/// The transport applies its own ceiling.
pub fn initial_delay(execute_at: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    u32::try_from(remaining_seconds(execute_at, now).max(0)).unwrap_or(u32::MAX)
}

/// What to do with a task message that just arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptAction {
    /// The task is due: run it.
    Execute,
    /// The task is not due yet: send it again with this delay.
    Requeue {
        /// Delay for the next hop, never above the transport ceiling.
        delay_seconds: u32,
    },
}

/// Decides between running and re-sending a message on receipt.
///
/// `max_delay` is the transport's native delay ceiling; transports without
/// one always execute.
pub fn on_receipt(
    execute_at: DateTime<Utc>,
    now: DateTime<Utc>,
    max_delay: Option<u32>,
) -> ReceiptAction {
    let Some(max_delay) = max_delay else {
        return ReceiptAction::Execute;
    };
    match remaining_seconds(execute_at, now) {
        remaining if remaining <= 0 => ReceiptAction::Execute,
        remaining => ReceiptAction::Requeue {
            delay_seconds: u32::try_from(remaining)
                .unwrap_or(u32::MAX)
                .min(max_delay),
        },
    }
}
