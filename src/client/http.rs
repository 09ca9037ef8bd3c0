//! HTTP transport for instrument services.
//!
//! Services expose a small REST surface relative to their endpoint:
//! `POST /{action}` starts work, `GET /status` reports progress,
//! `GET /results` returns the payload and `POST /reset` returns the instrument
//! to idle.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};

use super::traits::{CallerError, HealthProbe, InvokeResponse, RemoteState, RemoteStatus, ServiceCaller};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Status document returned by `GET {endpoint}/status`
#[derive(Debug, Deserialize)]
struct StatusDocument {
    #[serde(alias = "instrument_status")]
    status: String,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default, alias = "error")]
    message: Option<String>,
}

fn remote_state(raw: &str) -> RemoteState {
    match raw.to_ascii_lowercase().as_str() {
        "completed" | "complete" | "done" | "idle" => RemoteState::Completed,
        "failed" | "error" => RemoteState::Failed,
        "aborted" | "cancelled" | "stopped" => RemoteState::Aborted,
        _ => RemoteState::Running,
    }
}

/// [`ServiceCaller`] speaking JSON over HTTP via `reqwest`
#[derive(Debug, Clone)]
pub struct HttpServiceCaller {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl Default for HttpServiceCaller {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpServiceCaller {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn url(endpoint: &str, path: &str) -> String {
        format!("{}/{}", endpoint.trim_end_matches('/'), path)
    }

    fn transport_error(url: &str, err: reqwest::Error) -> CallerError {
        if err.is_timeout() {
            CallerError::Timeout {
                endpoint: url.to_string(),
            }
        } else {
            CallerError::Transport {
                endpoint: url.to_string(),
                message: err.to_string(),
            }
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, CallerError> {
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| Self::transport_error(url, e))?;

        if !response.status().is_success() {
            return Err(CallerError::Status {
                endpoint: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response.json::<T>().await.map_err(|e| CallerError::Decode {
            endpoint: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ServiceCaller for HttpServiceCaller {
    async fn invoke(
        &self,
        endpoint: &str,
        action: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<InvokeResponse, CallerError> {
        let url = Self::url(endpoint, action);
        tracing::debug!(url = %url, "📤 HTTP_CALLER: Invoking service action");

        let response = self
            .client
            .post(&url)
            .json(payload)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::transport_error(&url, e))?;

        let accepted = response.status().is_success();
        let initial_response = response.json::<Value>().await.unwrap_or(Value::Null);

        Ok(InvokeResponse {
            accepted,
            initial_response,
        })
    }

    async fn poll_status(&self, endpoint: &str) -> Result<RemoteStatus, CallerError> {
        let document: StatusDocument = self.get_json(&Self::url(endpoint, "status")).await?;
        Ok(RemoteStatus {
            state: remote_state(&document.status),
            progress: document.progress,
            message: document.message,
        })
    }

    async fn fetch_results(&self, endpoint: &str) -> Result<Value, CallerError> {
        self.get_json(&Self::url(endpoint, "results")).await
    }

    async fn reset(&self, endpoint: &str) -> Result<(), CallerError> {
        let url = Self::url(endpoint, "reset");
        let response = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| Self::transport_error(&url, e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CallerError::Status {
                endpoint: url,
                status: response.status().as_u16(),
            })
        }
    }

    async fn health_check(&self, health_endpoint: &str, timeout: Duration) -> Result<HealthProbe, CallerError> {
        let started = Instant::now();
        let response = self
            .client
            .get(health_endpoint)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::transport_error(health_endpoint, e))?;

        Ok(HealthProbe {
            up: response.status().is_success(),
            response_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        assert_eq!(
            HttpServiceCaller::url("http://hplc-1:8080/", "analyze"),
            "http://hplc-1:8080/analyze"
        );
        assert_eq!(
            HttpServiceCaller::url("http://hplc-1:8080", "status"),
            "http://hplc-1:8080/status"
        );
    }

    #[test]
    fn test_remote_state_mapping() {
        assert_eq!(remote_state("RUNNING"), RemoteState::Running);
        assert_eq!(remote_state("busy"), RemoteState::Running);
        assert_eq!(remote_state("completed"), RemoteState::Completed);
        assert_eq!(remote_state("error"), RemoteState::Failed);
        assert_eq!(remote_state("aborted"), RemoteState::Aborted);
    }

    #[test]
    fn test_status_document_aliases() {
        let doc: StatusDocument =
            serde_json::from_str(r#"{"instrument_status": "done", "progress": 100.0}"#).unwrap();
        assert_eq!(remote_state(&doc.status), RemoteState::Completed);
        assert_eq!(doc.progress, Some(100.0));
    }

    #[tokio::test]
    async fn test_unreachable_health_endpoint_is_an_error() {
        let caller = HttpServiceCaller::new();
        let result = caller
            .health_check("http://127.0.0.1:9/status", Duration::from_millis(200))
            .await;
        assert!(result.is_err());
    }
}
