use std::{sync::Arc, time::Duration};

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use log::{info, warn};

use crate::{
    mining::{mine, MineError, MiningAttempt},
    rpc::RpcChannel,
    schedule::{plan, ScheduleDecision},
    tip::{observe_tip, ObservationError, OBSERVE_DEADLINE},
};

/// Timing knobs of the scheduler, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub target_block_time: Duration,
    pub retry_duration: Duration,
    pub observe_deadline: Duration,
    pub attempt: MiningAttempt,
}

impl SchedulerSettings {
    pub fn new(target_block_time: Duration, retry_duration: Duration) -> Self {
        SchedulerSettings {
            target_block_time,
            retry_duration,
            observe_deadline: OBSERVE_DEADLINE,
            attempt: MiningAttempt::default(),
        }
    }

    /// Pause after a failed attempt. Never longer than one target interval.
    pub fn backoff(&self) -> Duration {
        self.retry_duration.min(self.target_block_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    ObservationFailed(ObservationError),
    Waiting { wake_at: DateTime<Utc> },
    Mined(String),
    MineFailed(MineError),
}

/// Result of one pass of the loop and how long to sleep before the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    pub outcome: CycleOutcome,
    pub pause: Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MiningStats {
    pub blocks_mined: u64,
    pub expected_failures: u64,
    pub unexpected_failures: u64,
    pub observation_failures: u64,
}

pub struct Scheduler<C: ?Sized> {
    channel: Arc<C>,
    settings: SchedulerSettings,
    stats: MiningStats,
}

impl<C> Scheduler<C>
where
    C: RpcChannel + ?Sized,
{
    pub fn new(channel: Arc<C>, settings: SchedulerSettings) -> Self {
        Scheduler {
            channel,
            settings,
            stats: MiningStats::default(),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn stats(&self) -> MiningStats {
        self.stats
    }

    /// Runs cycles forever.
    pub async fn run(&mut self) {
        loop {
            let cycle = self.run_cycle().await;
            tokio::time::sleep(cycle.pause).await;
        }
    }

    /// Observes the tip, then either schedules the next poll or mines.
    pub async fn run_cycle(&mut self) -> Cycle {
        let tip = match observe_tip(self.channel.as_ref(), self.settings.observe_deadline).await {
            Ok(tip) => tip,
            Err(err) => {
                warn!(target: "scheduler", "observing tip failed: {}", err);
                self.stats.observation_failures += 1;
                return Cycle {
                    outcome: CycleOutcome::ObservationFailed(err),
                    pause: self.settings.retry_duration,
                };
            }
        };

        let now = Utc::now();
        let decision = plan(&tip, self.settings.target_block_time, now);
        if let ScheduleDecision::PollAgain { wake_at } = decision {
            let wait = decision.wait_from(now);
            info!(
                target: "scheduler",
                "best block time: {}; mining scheduled time: {}",
                tip.block_timestamp,
                wake_at
            );
            info!(target: "scheduler", "💤 sleeping {}ms", wait.as_millis());
            return Cycle {
                outcome: CycleOutcome::Waiting { wake_at },
                pause: wait,
            };
        }

        info!(
            target: "scheduler",
            "best block {} at {} is due, requesting a block",
            tip.block_hash,
            tip.block_timestamp
        );
        let (outcome, pause) = match mine(&self.channel, &self.settings.attempt).await {
            Ok(hash) => {
                self.stats.blocks_mined += 1;
                info!(target: "miner", "🎉 generate: mined block {}", hash);
                (CycleOutcome::Mined(hash), self.settings.target_block_time)
            }
            Err(err) => {
                if err.is_expected() {
                    self.stats.expected_failures += 1;
                } else {
                    self.stats.unexpected_failures += 1;
                }
                (CycleOutcome::MineFailed(err), self.settings.backoff())
            }
        };

        info!(
            target: "scheduler",
            "polling blocks again at {}",
            display_instant(Utc::now(), pause)
        );
        info!(
            target: "scheduler",
            "mined: {}, stopped: {}, failed: {}, missed polls: {}",
            self.stats.blocks_mined,
            self.stats.expected_failures,
            self.stats.unexpected_failures,
            self.stats.observation_failures
        );
        Cycle { outcome, pause }
    }
}

/// `now + pause`, truncated to 100ms for display.
fn display_instant(now: DateTime<Utc>, pause: Duration) -> DateTime<Utc> {
    let at = TimeDelta::from_std(pause)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    at.duration_trunc(TimeDelta::milliseconds(100)).unwrap_or(at)
}
