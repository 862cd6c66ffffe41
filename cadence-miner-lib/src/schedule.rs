use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::tip::TipObservation;

/// What to do after looking at the tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Too early. Sleep until `wake_at`, then observe the tip again.
    PollAgain { wake_at: DateTime<Utc> },
    /// The target interval since the tip has passed.
    MineNow,
}

impl ScheduleDecision {
    /// Time left until the wake instant, zero for [`ScheduleDecision::MineNow`].
    pub fn wait_from(&self, now: DateTime<Utc>) -> Duration {
        match self {
            ScheduleDecision::PollAgain { wake_at } => {
                (*wake_at - now).to_std().unwrap_or(Duration::ZERO)
            }
            ScheduleDecision::MineNow => Duration::ZERO,
        }
    }
}

/// Decides whether the next block is due, given the tip and the target
/// block interval.
pub fn plan(
    tip: &TipObservation,
    target_block_time: Duration,
    now: DateTime<Utc>,
) -> ScheduleDecision {
    let target = TimeDelta::from_std(target_block_time).unwrap_or(TimeDelta::MAX);
    let mine_time = tip
        .block_timestamp
        .checked_add_signed(target)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    if mine_time > now {
        ScheduleDecision::PollAgain { wake_at: mine_time }
    } else {
        ScheduleDecision::MineNow
    }
}
