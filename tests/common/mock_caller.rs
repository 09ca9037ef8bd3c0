//! Scriptable in-process instrument service.
//!
//! Behavior is configured per endpoint. Every invocation is recorded so tests
//! can assert on call order, attempt counts and peak concurrency.

#![allow(dead_code)]

use async_trait::async_trait;
use labflow_core::client::{CallerError, HealthProbe, InvokeResponse, RemoteStatus, ServiceCaller};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Behavior {
    /// Complete on the first poll
    Succeed,
    /// Report running for this many polls, then complete
    SucceedAfterPolls(u32),
    /// Refuse the invocation
    Reject,
    /// Accept, then report a remote failure
    Fail(String),
    /// Fail this many invocations, then succeed
    FailTimes(u32),
    /// Never leave the running state
    Hang,
}

#[derive(Debug, Default)]
struct EndpointState {
    behavior: Option<Behavior>,
    invocations: u32,
    polls_this_run: u32,
    active: bool,
}

#[derive(Debug, Default)]
struct Inner {
    endpoints: HashMap<String, EndpointState>,
    down: HashSet<String>,
    calls: Vec<String>,
    resets: Vec<String>,
    active: usize,
    peak_active: usize,
}

#[derive(Debug, Default)]
pub struct MockServiceCaller {
    inner: Mutex<Inner>,
}

impl MockServiceCaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_behavior(&self, endpoint: &str, behavior: Behavior) {
        self.inner
            .lock()
            .endpoints
            .entry(endpoint.to_string())
            .or_default()
            .behavior = Some(behavior);
    }

    /// Health checks against this endpoint report the service as down
    pub fn mark_down(&self, endpoint: &str) {
        self.inner.lock().down.insert(endpoint.to_string());
    }

    pub fn mark_up(&self, endpoint: &str) {
        self.inner.lock().down.remove(endpoint);
    }

    /// Endpoints in invocation order
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    pub fn invocations(&self, endpoint: &str) -> u32 {
        self.inner
            .lock()
            .endpoints
            .get(endpoint)
            .map_or(0, |state| state.invocations)
    }

    pub fn resets(&self) -> Vec<String> {
        self.inner.lock().resets.clone()
    }

    /// Most remote runs that were in progress at the same time
    pub fn peak_active(&self) -> usize {
        self.inner.lock().peak_active
    }

    fn finish_run(inner: &mut Inner, endpoint: &str) {
        if let Some(state) = inner.endpoints.get_mut(endpoint) {
            if state.active {
                state.active = false;
                inner.active = inner.active.saturating_sub(1);
            }
        }
    }
}

#[async_trait]
impl ServiceCaller for MockServiceCaller {
    async fn invoke(
        &self,
        endpoint: &str,
        _action: &str,
        _payload: &Value,
        _timeout: Duration,
    ) -> Result<InvokeResponse, CallerError> {
        let mut inner = self.inner.lock();
        inner.calls.push(endpoint.to_string());
        let state = inner.endpoints.entry(endpoint.to_string()).or_default();
        state.invocations += 1;
        state.polls_this_run = 0;

        if matches!(state.behavior, Some(Behavior::Reject)) {
            return Ok(InvokeResponse {
                accepted: false,
                initial_response: json!({"error": "busy"}),
            });
        }

        state.active = true;
        inner.active += 1;
        inner.peak_active = inner.peak_active.max(inner.active);
        Ok(InvokeResponse {
            accepted: true,
            initial_response: json!({"status": "started"}),
        })
    }

    async fn poll_status(&self, endpoint: &str) -> Result<RemoteStatus, CallerError> {
        let mut inner = self.inner.lock();
        let state = inner.endpoints.entry(endpoint.to_string()).or_default();
        state.polls_this_run += 1;

        let status = match state.behavior.clone().unwrap_or(Behavior::Succeed) {
            Behavior::Succeed | Behavior::Reject => RemoteStatus::completed(),
            Behavior::SucceedAfterPolls(n) if state.polls_this_run > n => RemoteStatus::completed(),
            Behavior::SucceedAfterPolls(_) | Behavior::Hang => RemoteStatus::running(Some(50.0)),
            Behavior::Fail(message) => RemoteStatus::failed(message),
            Behavior::FailTimes(n) if state.invocations <= n => RemoteStatus::failed("instrument fault"),
            Behavior::FailTimes(_) => RemoteStatus::completed(),
        };

        if status.state.is_terminal() {
            Self::finish_run(&mut inner, endpoint);
        }
        Ok(status)
    }

    async fn fetch_results(&self, endpoint: &str) -> Result<Value, CallerError> {
        Ok(json!({"endpoint": endpoint, "status": "ok"}))
    }

    async fn reset(&self, endpoint: &str) -> Result<(), CallerError> {
        let mut inner = self.inner.lock();
        inner.resets.push(endpoint.to_string());
        Self::finish_run(&mut inner, endpoint);
        Ok(())
    }

    async fn health_check(&self, health_endpoint: &str, _timeout: Duration) -> Result<HealthProbe, CallerError> {
        let inner = self.inner.lock();
        let down = inner.down.iter().any(|endpoint| health_endpoint.starts_with(endpoint.as_str()));
        if down {
            return Err(CallerError::Transport {
                endpoint: health_endpoint.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(HealthProbe {
            up: true,
            response_time_ms: 3,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
