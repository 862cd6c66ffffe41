use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

use crate::rpc::{RpcChannel, RpcError};

/// Budget shared by both calls of one observation. A late answer only costs
/// another poll, so this stays tight.
pub const OBSERVE_DEADLINE: Duration = Duration::from_millis(100);

/// The remote chain's best block, as seen on one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipObservation {
    pub block_hash: String,
    pub block_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObservationError {
    #[error("getbestblockhash: {0}")]
    BestBlockHash(#[source] RpcError),

    #[error("getblockheader: {0}")]
    BlockHeader(#[source] RpcError),
}

#[derive(Deserialize, Debug)]
struct BlockHeaderResponse {
    time: i64,
}

/// Reads the best block hash, then that block's header time, both within
/// `budget`.
pub async fn observe_tip<C>(channel: &C, budget: Duration) -> Result<TipObservation, ObservationError>
where
    C: RpcChannel + ?Sized,
{
    let deadline = Instant::now() + budget;

    let block_hash = channel
        .call("getbestblockhash", vec![], budget)
        .await
        .map_err(ObservationError::BestBlockHash)?;
    let block_hash = match block_hash {
        Value::String(hash) => hash,
        other => {
            return Err(ObservationError::BestBlockHash(RpcError::Decode(format!(
                "expected a block hash string, got {}",
                other
            ))))
        }
    };

    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(ObservationError::BlockHeader(RpcError::Timeout(budget)));
    }
    let header = channel
        .call("getblockheader", vec![Value::String(block_hash.clone())], remaining)
        .await
        .map_err(ObservationError::BlockHeader)?;
    let header: BlockHeaderResponse = serde_json::from_value(header)
        .map_err(|err| ObservationError::BlockHeader(RpcError::Decode(err.to_string())))?;
    let block_timestamp = DateTime::<Utc>::from_timestamp(header.time, 0).ok_or_else(|| {
        ObservationError::BlockHeader(RpcError::Decode(format!(
            "block time {} out of range",
            header.time
        )))
    })?;

    debug!(target: "tip", "best block {} at {}", block_hash, block_timestamp);
    Ok(TipObservation {
        block_hash,
        block_timestamp,
    })
}
