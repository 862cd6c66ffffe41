//! Startup readiness check against the remote node.

use std::time::Duration;

use log::{info, warn};
use thiserror::Error;

use crate::rpc::{RpcChannel, RpcError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub attempts: u32,
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        ProbeSettings {
            attempts: 10,
            interval: Duration::from_secs(1),
            deadline: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("node not ready after {attempts} attempts, last error: {last}")]
pub struct ReadinessError {
    pub attempts: u32,
    #[source]
    pub last: RpcError,
}

/// Calls `getbestblockhash` until it answers, at most `settings.attempts` times.
pub async fn wait_until_ready<C>(channel: &C, settings: &ProbeSettings) -> Result<(), ReadinessError>
where
    C: RpcChannel + ?Sized,
{
    let attempts = settings.attempts.max(1);
    let mut attempt = 1;
    loop {
        match channel.call("getbestblockhash", vec![], settings.deadline).await {
            Ok(_) => {
                info!(target: "status", "✅ node is ready");
                return Ok(());
            }
            Err(last) if attempt >= attempts => {
                return Err(ReadinessError { attempts, last });
            }
            Err(err) => {
                warn!(
                    target: "status",
                    "node not ready ({}/{}): {}",
                    attempt,
                    attempts,
                    err
                );
            }
        }
        attempt += 1;
        tokio::time::sleep(settings.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Reply, ScriptedChannel};
    use serde_json::json;
    use tokio::time::Instant;

    fn refused() -> Reply {
        Reply::err(RpcError::Transport("connection refused".to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_node_answers() {
        let channel = ScriptedChannel::new();
        channel
            .script("getbestblockhash", refused())
            .script("getbestblockhash", refused())
            .script("getbestblockhash", Reply::ok(json!("00ff")));

        let start = Instant::now();
        wait_until_ready(&channel, &ProbeSettings::default()).await.unwrap();
        assert_eq!(channel.calls().len(), 3);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_configured_attempts() {
        let channel = ScriptedChannel::new();
        for _ in 0..5 {
            channel.script("getbestblockhash", refused());
        }
        let settings = ProbeSettings {
            attempts: 3,
            ..ProbeSettings::default()
        };

        let err = wait_until_ready(&channel, &settings).await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last, RpcError::Transport("connection refused".to_string()));
        assert_eq!(channel.calls().len(), 3);
    }
}
