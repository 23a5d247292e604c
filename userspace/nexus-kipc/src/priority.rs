// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Message priority scoring.
//!
//! Deterministic arithmetic over the sender, the payload size and the queue's backlog.
//! The score orders delivery within a queue and nothing else.

use core::time::Duration;

/// Starting score for every message.
pub const BASE_PRIORITY: u8 = 50;
/// Bonus for privileged senders.
pub const PRIVILEGED_BONUS: u8 = 20;
/// Payloads shorter than this count as control messages.
pub const SMALL_MESSAGE_LIMIT: usize = 128;
/// Bonus for control-sized payloads.
pub const SMALL_MESSAGE_BONUS: u8 = 10;
/// Average wait above which the backlog bonus applies.
pub const BACKLOG_WAIT_THRESHOLD: Duration = Duration::from_millis(100);
/// Bonus applied while the queue's average wait is high.
pub const BACKLOG_BONUS: u8 = 15;
/// Share of the final score taken from an external hint, in percent.
pub const HINT_WEIGHT_PERCENT: u32 = 30;
/// Highest score.
pub const MAX_PRIORITY: u8 = 100;

/// Inputs to [`priority_score`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityInputs {
    /// Sender holds elevated privileges.
    pub privileged: bool,
    /// Payload length in bytes.
    pub payload_len: usize,
    /// Running average wait of the destination queue.
    pub avg_wait: Duration,
    /// Optional caller hint; values above 100 count as 100.
    pub hint: Option<u8>,
}

/// Computes a score in `0..=100`; higher is delivered first.
pub fn priority_score(inputs: &PriorityInputs) -> u8 {
    let mut score = u32::from(BASE_PRIORITY);
    if inputs.privileged {
        score += u32::from(PRIVILEGED_BONUS);
    }
    if inputs.payload_len < SMALL_MESSAGE_LIMIT {
        score += u32::from(SMALL_MESSAGE_BONUS);
    }
    if inputs.avg_wait > BACKLOG_WAIT_THRESHOLD {
        score += u32::from(BACKLOG_BONUS);
    }
    if let Some(hint) = inputs.hint {
        let hint = u32::from(hint.min(MAX_PRIORITY));
        score = (score * (100 - HINT_WEIGHT_PERCENT) + hint * HINT_WEIGHT_PERCENT) / 100;
    }
    score.min(u32::from(MAX_PRIORITY)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn inputs(privileged: bool, payload_len: usize, wait_ms: u64, hint: Option<u8>) -> PriorityInputs {
        PriorityInputs { privileged, payload_len, avg_wait: Duration::from_millis(wait_ms), hint }
    }

    #[test]
    fn bulk_unprivileged_is_base() {
        assert_eq!(priority_score(&inputs(false, 4096, 0, None)), BASE_PRIORITY);
    }

    #[test]
    fn bonuses_accumulate() {
        assert_eq!(priority_score(&inputs(true, 16, 0, None)), 80);
        assert_eq!(priority_score(&inputs(true, 16, 500, None)), 95);
        assert_eq!(priority_score(&inputs(false, 127, 0, None)), 60);
        assert_eq!(priority_score(&inputs(false, 128, 0, None)), 50);
    }

    #[test]
    fn hint_weighted_thirty_percent() {
        // 50 * 0.7 + 100 * 0.3
        assert_eq!(priority_score(&inputs(false, 4096, 0, Some(100))), 65);
        assert_eq!(priority_score(&inputs(false, 4096, 0, Some(0))), 35);
        assert_eq!(priority_score(&inputs(false, 4096, 0, Some(255))), 65);
    }

    proptest! {
        #[test]
        fn score_always_in_range(
            privileged in any::<bool>(),
            len in 0usize..16384,
            wait_ms in 0u64..10_000,
            hint in proptest::option::of(any::<u8>()),
        ) {
            let score = priority_score(&inputs(privileged, len, wait_ms, hint));
            prop_assert!(score <= MAX_PRIORITY);
        }

        #[test]
        fn privilege_never_lowers_score(len in 0usize..16384, wait_ms in 0u64..1000, hint in proptest::option::of(any::<u8>())) {
            let user = priority_score(&inputs(false, len, wait_ms, hint));
            let admin = priority_score(&inputs(true, len, wait_ms, hint));
            prop_assert!(admin >= user);
        }
    }
}
