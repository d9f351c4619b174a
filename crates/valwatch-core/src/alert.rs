//! Streak accounting and logarithmic alert escalation.
//!
//! A validator that keeps missing blocks is reported at a slowly thinning
//! cadence: the alert level grows with `ln(streak) / ln(W)` where `W` is the
//! chain's slashing window, and a notification fires whenever the streak is
//! a multiple of `ceil(W^(level / ALERT_LEVELS))`.

use crate::history::HistoryEntry;
use crate::types::ValidatorSubscription;

/// Number of escalation tiers between the first miss and the slashing window.
pub const ALERT_LEVELS: u32 = 5;

/// Upper bound on the visual severity marker.
pub const MAX_SEVERITY: u32 = 5;

/// Alert level for a streak of `counter` misses against slashing window `window`.
pub fn alert_level(counter: u64, window: f64) -> u32 {
    if counter <= 1 {
        return 1;
    }
    let window = window.max(2.0);
    // ln(k)/ln(W) first so that k == W lands exactly on ALERT_LEVELS.
    let level = (counter as f64).ln() / window.ln() * ALERT_LEVELS as f64;
    (ceil(level) as u32).max(1)
}

/// Streak length between notifications at `level`.
pub fn blocks_level(level: u32, window: f64) -> u64 {
    let window = window.max(2.0);
    let exp = level as f64 / ALERT_LEVELS as f64;
    (ceil(window.powf(exp)) as u64).max(1)
}

/// `ceil` that ignores rounding error just above an integer, so exact
/// powers of the window (e.g. 125 against 3125) stay on their tier.
fn ceil(x: f64) -> f64 {
    (x - 1e-9).ceil()
}

/// What happened to a validator's state for one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Signed the block (streak reset).
    Attended,
    /// Missed the block; `notify` is set when the alert gate opened.
    Missed { counter: u64, level: u32, notify: bool },
    /// Jailed: history recorded, streak untouched.
    Jailed,
    /// Height not newer than the history head; nothing changed.
    Stale,
}

impl Observation {
    pub fn should_notify(&self) -> bool {
        matches!(self, Self::Missed { notify: true, .. })
    }
}

/// Apply one block observation to `sub` in place.
///
/// Streak rule: a miss extends the streak only when it directly follows the
/// previous miss (`h - last_missed_block == 1`); any other miss starts a new
/// streak at 1. The notification gate uses the level the streak had reached
/// before this miss, after which the level is recomputed.
pub fn observe(
    sub: &mut ValidatorSubscription,
    height: u64,
    found: bool,
    jailed: bool,
    window: f64,
    history_limit: usize,
) -> Observation {
    if !sub
        .blocks_history
        .push(HistoryEntry { height, found }, history_limit)
    {
        return Observation::Stale;
    }
    if jailed {
        return Observation::Jailed;
    }
    if found {
        sub.reset_streak();
        return Observation::Attended;
    }

    let consecutive = sub.last_missed_block != 0 && height.saturating_sub(sub.last_missed_block) == 1;
    sub.consecutive_counter = if consecutive {
        sub.consecutive_counter + 1
    } else {
        1
    };
    sub.last_missed_block = height;

    let gate = blocks_level(sub.alert_level.max(1), window);
    let notify = sub.consecutive_counter != 0 && sub.consecutive_counter % gate == 0;
    sub.alert_level = alert_level(sub.consecutive_counter, window);

    Observation::Missed {
        counter: sub.consecutive_counter,
        level: sub.alert_level,
        notify,
    }
}

/// Severity marker repeated once per alert level, capped.
pub fn severity_marker(level: u32) -> String {
    "🔴".repeat(level.clamp(1, MAX_SEVERITY) as usize)
}
