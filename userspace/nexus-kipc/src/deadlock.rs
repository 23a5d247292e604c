// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Deadlock-risk scoring for semaphore waits.
//!
//! A heuristic, not a proof. The default scorer adds fixed weights for queue depth, release
//! staleness and caller state; it produces false positives (a long but healthy waiter queue)
//! and false negatives (a two-party cycle with fresh releases). A refused waiter receives
//! `WouldDeadlock` and must retry, abort or escalate.

use core::time::Duration;

use crate::CallerState;

/// Snapshot handed to a [`RiskScorer`] before a waiter would block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreState {
    /// Current count (always too low for the pending wait).
    pub count: u32,
    /// Configured maximum.
    pub max: u32,
    /// Callers already blocked on this semaphore.
    pub waiters: usize,
    /// Time since the last release, or since creation if never released.
    pub since_last_release: Duration,
    /// How long the oldest current waiter has been blocked.
    pub oldest_wait: Duration,
    /// State of the caller about to block.
    pub caller: CallerState,
}

/// Pluggable deadlock-risk heuristic.
pub trait RiskScorer: Send + Sync {
    /// Returns an advisory risk in `0..=100`.
    fn risk_score(&self, state: &SemaphoreState) -> u8;
}

/// Points per waiter already queued.
pub const WAITER_WEIGHT: u32 = 10;
/// Added once the last release is this old.
pub const STALE_RELEASE: Duration = Duration::from_secs(1);
/// Points for a stale release.
pub const STALE_RELEASE_WEIGHT: u32 = 10;
/// Added once the last release is this old (replaces the stale weight).
pub const FROZEN_RELEASE: Duration = Duration::from_secs(5);
/// Points for a frozen release.
pub const FROZEN_RELEASE_WEIGHT: u32 = 25;
/// Points when the caller has a signal pending.
pub const SIGNAL_PENDING_WEIGHT: u32 = 15;
/// Points when the caller is exiting.
pub const EXITING_WEIGHT: u32 = 30;

/// Fixed-weight additive scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRiskScorer;

impl RiskScorer for DefaultRiskScorer {
    fn risk_score(&self, state: &SemaphoreState) -> u8 {
        let depth = WAITER_WEIGHT.saturating_mul(u32::try_from(state.waiters).unwrap_or(u32::MAX));
        let staleness = if state.since_last_release >= FROZEN_RELEASE {
            FROZEN_RELEASE_WEIGHT
        } else if state.since_last_release >= STALE_RELEASE {
            STALE_RELEASE_WEIGHT
        } else {
            0
        };
        let caller = match state.caller {
            CallerState::Running => 0,
            CallerState::SignalPending => SIGNAL_PENDING_WEIGHT,
            CallerState::Exiting => EXITING_WEIGHT,
        };
        depth.saturating_add(staleness).saturating_add(caller).min(100) as u8
    }
}
