use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde_json::Value;

use crate::rpc::{RpcChannel, RpcError, RpcRequest, RpcResponse};

/// JSON-RPC over HTTPS POST, one request per call.
pub struct HttpChannel {
    client: reqwest::Client,
    url: String,
    basic_auth: Option<(String, String)>,
    next_id: AtomicU64,
}

impl HttpChannel {
    pub fn new(client: reqwest::Client, url: String, basic_auth: Option<(String, String)>) -> Self {
        HttpChannel {
            client,
            url,
            basic_auth,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn transport_error(err: reqwest::Error, deadline: Duration) -> RpcError {
    if err.is_timeout() {
        RpcError::Timeout(deadline)
    } else {
        RpcError::Transport(err.to_string())
    }
}

#[async_trait]
impl RpcChannel for HttpChannel {
    async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        deadline: Duration,
    ) -> Result<Value, RpcError> {
        if deadline.is_zero() {
            return Err(RpcError::Timeout(deadline));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request_start = Instant::now();
        debug!(target: "rpc", "🛰️ RPC call: {} (id {}) to URL: {}", method, id, self.url);

        let body = RpcRequest {
            jsonrpc: "1.0",
            id,
            method,
            params: &params,
        };
        let mut request = self.client.post(&self.url).timeout(deadline).json(&body);
        if let Some((user, password)) = &self.basic_auth {
            request = request.basic_auth(user, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|err| transport_error(err, deadline))?;
        let status = response.status();
        let response_str = response
            .text()
            .await
            .map_err(|err| transport_error(err, deadline))?;
        debug!(
            target: "rpc",
            "🛰️ RPC response status: {} for {} (took: {}ms, {} characters)",
            status,
            method,
            request_start.elapsed().as_millis(),
            response_str.len()
        );

        decode_response(status, &response_str)
    }
}

/// Maps an HTTP status and body to the call's result.
fn decode_response(status: StatusCode, body: &str) -> Result<Value, RpcError> {
    let response: RpcResponse = serde_json::from_str(body).map_err(|err| {
        if status == StatusCode::UNAUTHORIZED {
            RpcError::Transport(
                "401 unauthorized: check rpc_user/rpc_password or the client certificate"
                    .to_string(),
            )
        } else {
            RpcError::Decode(format!("{} ({}): {}", err, status, body))
        }
    })?;
    response.into_result()
}
