//! JSON-RPC plumbing shared by every call the miner makes.
//!
//! [`RpcChannel`] is the only thing the scheduling core knows about the
//! remote node. It has no way to abort a request once it has been sent;
//! the only out-of-band signal is another request.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Errors returned by a single remote call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("request task aborted: {0}")]
    Aborted(String),
}

/// A request/response channel to one remote node.
#[async_trait]
pub trait RpcChannel: Send + Sync + 'static {
    /// Sends `method` with `params` and waits at most `deadline` for the result.
    async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        deadline: Duration,
    ) -> Result<Value, RpcError>;
}

/// A call running on its own task.
///
/// Awaiting the handle yields the call's final result. Dropping it does not
/// cancel anything; the request keeps running to its own deadline.
#[derive(Debug)]
pub struct PendingCall {
    method: &'static str,
    handle: JoinHandle<Result<Value, RpcError>>,
}

impl PendingCall {
    pub fn spawn<C>(
        channel: Arc<C>,
        method: &'static str,
        params: Vec<Value>,
        deadline: Duration,
    ) -> Self
    where
        C: RpcChannel + ?Sized,
    {
        let handle =
            tokio::spawn(async move { channel.call(method, params, deadline).await });
        PendingCall { method, handle }
    }

    pub fn method(&self) -> &'static str {
        self.method
    }
}

impl Future for PendingCall {
    type Output = Result<Value, RpcError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(err) => Err(RpcError::Aborted(err.to_string())),
        })
    }
}

#[derive(Serialize, Debug)]
pub(crate) struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a [Value],
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct RpcResponse {
    #[serde(default)]
    pub result: Value,
    pub error: Option<RpcErrorObject>,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

impl RpcResponse {
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(RpcError::Remote {
                code: error.code,
                message: error.message,
            }),
            None => Ok(self.result),
        }
    }
}
