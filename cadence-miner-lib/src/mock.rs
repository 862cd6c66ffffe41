//! In-memory channel that replays scripted replies and records every call.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::rpc::{RpcChannel, RpcError};

pub(crate) struct Reply {
    delay: Duration,
    result: Result<Value, RpcError>,
}

impl Reply {
    pub fn ok(value: Value) -> Self {
        Reply {
            delay: Duration::ZERO,
            result: Ok(value),
        }
    }

    pub fn err(error: RpcError) -> Self {
        Reply {
            delay: Duration::ZERO,
            result: Err(error),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedCall {
    pub method: String,
    pub params: Vec<Value>,
    pub deadline: Duration,
    pub at: Instant,
}

#[derive(Default)]
pub(crate) struct ScriptedChannel {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `reply` for the next unanswered call to `method`.
    pub fn script(&self, method: &str, reply: Reply) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method)
            .collect()
    }
}

#[async_trait]
impl RpcChannel for ScriptedChannel {
    async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        deadline: Duration,
    ) -> Result<Value, RpcError> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: method.to_string(),
            params,
            deadline,
            at: Instant::now(),
        });
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        let Some(reply) = reply else {
            return Err(RpcError::Transport(format!("no scripted reply for {}", method)));
        };

        let delay = reply.delay;
        let result = reply.result;
        match tokio::time::timeout(deadline, tokio::time::sleep(delay)).await {
            Ok(()) => result,
            Err(_) => Err(RpcError::Timeout(deadline)),
        }
    }
}
