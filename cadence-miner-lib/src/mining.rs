//! One `generate` attempt against the remote node.
//!
//! The node offers no way to abort an in-flight `generate`. When it runs past
//! the watchdog we send `generate 0`, which only stops the node from carrying
//! on, and then keep waiting for the original call: whatever it returns is
//! the outcome of the attempt.

use std::{sync::Arc, time::Duration};

use log::{error, info, warn};
use serde_json::{json, Value};
use thiserror::Error;

use crate::rpc::{PendingCall, RpcChannel, RpcError};

pub const DEFAULT_MINE_DEADLINE: Duration = Duration::from_secs(16);
pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(15);
pub const DEFAULT_STOP_DEADLINE: Duration = Duration::from_millis(100);

/// Timing of a single mining attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiningAttempt {
    deadline: Duration,
    watchdog: Duration,
    stop_deadline: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MiningAttemptError {
    #[error("watchdog {watchdog:?} must be shorter than the request deadline {deadline:?}")]
    WatchdogNotShorter { watchdog: Duration, deadline: Duration },

    #[error("stop request deadline must be non-zero")]
    ZeroStopDeadline,
}

impl MiningAttempt {
    pub fn new(
        deadline: Duration,
        watchdog: Duration,
        stop_deadline: Duration,
    ) -> Result<Self, MiningAttemptError> {
        if watchdog >= deadline {
            return Err(MiningAttemptError::WatchdogNotShorter { watchdog, deadline });
        }
        if stop_deadline.is_zero() {
            return Err(MiningAttemptError::ZeroStopDeadline);
        }
        Ok(MiningAttempt {
            deadline,
            watchdog,
            stop_deadline,
        })
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn watchdog(&self) -> Duration {
        self.watchdog
    }

    pub fn stop_deadline(&self) -> Duration {
        self.stop_deadline
    }
}

impl Default for MiningAttempt {
    fn default() -> Self {
        MiningAttempt {
            deadline: DEFAULT_MINE_DEADLINE,
            watchdog: DEFAULT_WATCHDOG,
            stop_deadline: DEFAULT_STOP_DEADLINE,
        }
    }
}

/// A failed attempt. `Expected` failures followed our own stop request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MineError {
    #[error("generate ended after stop request: {0}")]
    Expected(#[source] RpcError),

    #[error("generate: {0}")]
    Unexpected(#[source] RpcError),
}

impl MineError {
    pub fn is_expected(&self) -> bool {
        matches!(self, MineError::Expected(_))
    }

    pub fn cause(&self) -> &RpcError {
        match self {
            MineError::Expected(cause) | MineError::Unexpected(cause) => cause,
        }
    }
}

/// The stop request itself could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("generate 0: {0}")]
pub struct StopRequestError(#[source] pub RpcError);

/// Asks the node to generate one block and returns its hash.
///
/// Exactly one `generate 1` is sent per call. `generate 0` is sent at most
/// once, and only if the first request is still pending when the watchdog
/// fires. The first request is always awaited to completion.
pub async fn mine<C>(channel: &Arc<C>, attempt: &MiningAttempt) -> Result<String, MineError>
where
    C: RpcChannel + ?Sized,
{
    let mut pending = PendingCall::spawn(
        Arc::clone(channel),
        "generate",
        vec![json!(1)],
        attempt.deadline,
    );

    let finished = tokio::select! {
        biased;
        result = &mut pending => Some(result),
        () = tokio::time::sleep(attempt.watchdog) => None,
    };

    let (result, stop_requested) = match finished {
        Some(result) => (result, false),
        None => {
            warn!(
                target: "miner",
                "⏰ {} still running after {}ms, asking the node to stop",
                pending.method(),
                attempt.watchdog.as_millis()
            );
            let stop_requested = match request_stop(channel.as_ref(), attempt.stop_deadline).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(target: "miner", "{}; the node may still be mining", err);
                    false
                }
            };
            (pending.await, stop_requested)
        }
    };

    resolve(result, stop_requested)
}

async fn request_stop<C>(channel: &C, deadline: Duration) -> Result<(), StopRequestError>
where
    C: RpcChannel + ?Sized,
{
    channel
        .call("generate", vec![json!(0)], deadline)
        .await
        .map(|_| ())
        .map_err(StopRequestError)
}

fn resolve(result: Result<Value, RpcError>, stop_requested: bool) -> Result<String, MineError> {
    match result {
        Ok(value) => single_hash(value).map_err(|cause| {
            error!(target: "miner", "❌ generate returned an unusable result: {}", cause);
            MineError::Unexpected(cause)
        }),
        Err(cause) if stop_requested => {
            info!(target: "miner", "generate ended after stop request: {}", cause);
            Err(MineError::Expected(cause))
        }
        Err(cause) => {
            error!(target: "miner", "❌ generate failed: {}", cause);
            Err(MineError::Unexpected(cause))
        }
    }
}

fn single_hash(value: Value) -> Result<String, RpcError> {
    let mut hashes: Vec<String> = serde_json::from_value(value)
        .map_err(|err| RpcError::Decode(format!("generate result: {}", err)))?;
    if hashes.len() != 1 {
        return Err(RpcError::Decode(format!(
            "expected exactly one block hash, got {}",
            hashes.len()
        )));
    }
    let hash = hashes.remove(0);
    if hash.is_empty() || hex::decode(&hash).is_err() {
        return Err(RpcError::Decode(format!("malformed block hash {:?}", hash)));
    }
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Reply, ScriptedChannel};
    use tokio::time::Instant;

    fn cancelled() -> RpcError {
        RpcError::Remote {
            code: -1,
            message: "block generation cancelled".to_string(),
        }
    }

    #[test]
    fn attempt_requires_watchdog_shorter_than_deadline() {
        assert_eq!(
            MiningAttempt::new(Duration::from_secs(15), Duration::from_secs(15), DEFAULT_STOP_DEADLINE),
            Err(MiningAttemptError::WatchdogNotShorter {
                watchdog: Duration::from_secs(15),
                deadline: Duration::from_secs(15),
            })
        );
        assert_eq!(
            MiningAttempt::new(Duration::from_secs(16), Duration::from_secs(15), Duration::ZERO),
            Err(MiningAttemptError::ZeroStopDeadline)
        );
        assert_eq!(
            MiningAttempt::new(DEFAULT_MINE_DEADLINE, DEFAULT_WATCHDOG, DEFAULT_STOP_DEADLINE),
            Ok(MiningAttempt::default())
        );

        let attempt = MiningAttempt::default();
        assert_eq!(attempt.deadline(), Duration::from_secs(16));
        assert_eq!(attempt.watchdog(), Duration::from_secs(15));
        assert_eq!(attempt.stop_deadline(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_generate_never_sends_stop() {
        let channel = Arc::new(ScriptedChannel::new());
        channel.script(
            "generate",
            Reply::ok(json!(["abc123"])).after(Duration::from_secs(3)),
        );

        let hash = mine(&channel, &MiningAttempt::default()).await;
        assert_eq!(hash, Ok("abc123".to_string()));

        let calls = channel.calls_to("generate");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].params, vec![json!(1)]);
        assert_eq!(calls[0].deadline, DEFAULT_MINE_DEADLINE);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_before_watchdog_is_unexpected() {
        let channel = Arc::new(ScriptedChannel::new());
        channel.script(
            "generate",
            Reply::err(RpcError::Remote {
                code: -32603,
                message: "no payment address".to_string(),
            }),
        );

        let err = mine(&channel, &MiningAttempt::default()).await.unwrap_err();
        assert!(!err.is_expected());
        assert!(matches!(err.cause(), RpcError::Remote { code: -32603, .. }));
        assert_eq!(channel.calls_to("generate").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_after_successful_stop_is_expected() {
        let channel = Arc::new(ScriptedChannel::new());
        channel
            .script(
                "generate",
                Reply::err(cancelled()).after(Duration::from_millis(15_500)),
            )
            .script("generate", Reply::ok(Value::Null));

        let start = Instant::now();
        let err = mine(&channel, &MiningAttempt::default()).await.unwrap_err();
        assert_eq!(err, MineError::Expected(cancelled()));
        assert!(start.elapsed() >= Duration::from_millis(15_500));

        let calls = channel.calls_to("generate");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].params, vec![json!(1)]);
        assert_eq!(calls[1].params, vec![json!(0)]);
        assert_eq!(calls[1].deadline, DEFAULT_STOP_DEADLINE);
    }

    #[tokio::test(start_paused = true)]
    async fn block_found_despite_stop_is_still_returned() {
        let channel = Arc::new(ScriptedChannel::new());
        channel
            .script(
                "generate",
                Reply::ok(json!(["00ab"])).after(Duration::from_millis(15_050)),
            )
            .script("generate", Reply::ok(Value::Null));

        let hash = mine(&channel, &MiningAttempt::default()).await;
        assert_eq!(hash, Ok("00ab".to_string()));
        assert_eq!(channel.calls_to("generate").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_stop_still_uses_original_result() {
        let channel = Arc::new(ScriptedChannel::new());
        channel
            .script(
                "generate",
                Reply::ok(json!(["abc123"])).after(Duration::from_millis(15_400)),
            )
            .script(
                "generate",
                Reply::err(RpcError::Transport("broken pipe".to_string())),
            );

        let hash = mine(&channel, &MiningAttempt::default()).await;
        assert_eq!(hash, Ok("abc123".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_after_failed_stop_is_unexpected() {
        let channel = Arc::new(ScriptedChannel::new());
        channel
            .script(
                "generate",
                Reply::err(cancelled()).after(Duration::from_millis(15_400)),
            )
            .script(
                "generate",
                Reply::ok(Value::Null).after(Duration::from_secs(1)),
            );

        // The stop request overruns its own deadline.
        let err = mine(&channel, &MiningAttempt::default()).await.unwrap_err();
        assert_eq!(err, MineError::Unexpected(cancelled()));
    }

    #[tokio::test(start_paused = true)]
    async fn overrun_past_deadline_after_stop_is_expected_timeout() {
        let channel = Arc::new(ScriptedChannel::new());
        channel
            .script(
                "generate",
                Reply::ok(json!(["abc123"])).after(Duration::from_secs(30)),
            )
            .script("generate", Reply::ok(Value::Null));

        let start = Instant::now();
        let err = mine(&channel, &MiningAttempt::default()).await.unwrap_err();
        assert_eq!(err, MineError::Expected(RpcError::Timeout(DEFAULT_MINE_DEADLINE)));
        assert!(start.elapsed() < Duration::from_secs(17));
    }

    #[tokio::test(start_paused = true)]
    async fn unusable_result_is_unexpected() {
        let channel = Arc::new(ScriptedChannel::new());
        channel.script("generate", Reply::ok(json!([])));
        let err = mine(&channel, &MiningAttempt::default()).await.unwrap_err();
        assert!(matches!(err, MineError::Unexpected(RpcError::Decode(_))));

        channel.script("generate", Reply::ok(json!(["not-a-hash"])));
        let err = mine(&channel, &MiningAttempt::default()).await.unwrap_err();
        assert!(matches!(err, MineError::Unexpected(RpcError::Decode(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_watchdog_is_honoured() {
        let attempt = MiningAttempt::new(
            Duration::from_secs(4),
            Duration::from_secs(2),
            Duration::from_millis(50),
        )
        .unwrap();
        let channel = Arc::new(ScriptedChannel::new());
        channel
            .script(
                "generate",
                Reply::err(cancelled()).after(Duration::from_secs(3)),
            )
            .script("generate", Reply::ok(Value::Null));

        let err = mine(&channel, &attempt).await.unwrap_err();
        assert!(err.is_expected());

        let calls = channel.calls_to("generate");
        assert_eq!(calls[0].deadline, Duration::from_secs(4));
        assert_eq!(calls[1].deadline, Duration::from_millis(50));
    }
}
