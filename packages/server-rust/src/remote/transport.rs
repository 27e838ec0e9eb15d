//! Network transport for remote calls and health probes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use switchyard_core::{CallArgs, HealthReport, HealthStatus};
use tracing::debug;

use crate::error::RemoteError;

/// Header carrying the shared service token on every remote request.
pub const SERVICE_TOKEN_HEADER: &str = "X-Service-Token";

/// Result of `GET {address}/health` from a reachable remote.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteHealth {
    pub status_code: u16,
    /// Parsed body, when it was a valid health report.
    pub report: Option<HealthReport>,
}

impl RemoteHealth {
    /// Healthy only for a 200 whose body claims `healthy`. Any other answer
    /// means the remote is reachable but not fully well, so `Degraded`.
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        let claims_healthy = self.report.as_ref().is_some_and(HealthReport::is_healthy);
        if self.status_code == 200 && claims_healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        }
    }
}

/// Carries calls to services running in another process.
///
/// `timeout` of `None` means the transport's own default.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// `POST {address}/{method}` with `args` as the JSON body.
    ///
    /// # Errors
    ///
    /// [`RemoteError::UnsupportedMethod`] on 404, [`RemoteError::Status`] on
    /// any other non-2xx, and transport, timeout or decode failures.
    async fn call(
        &self,
        address: &str,
        method: &str,
        args: &CallArgs,
        timeout: Option<Duration>,
    ) -> Result<Value, RemoteError>;

    /// `GET {address}/health`.
    ///
    /// # Errors
    ///
    /// Only when the remote could not be reached at all.
    async fn health(
        &self,
        address: &str,
        timeout: Option<Duration>,
    ) -> Result<RemoteHealth, RemoteError>;
}

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

/// [`RemoteTransport`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    default_timeout: Duration,
    token: Option<String>,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns [`RemoteError::Transport`] if the HTTP client cannot be built
    /// (e.g. TLS backend initialisation failure).
    pub fn new(default_timeout: Duration, token: Option<String>) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .build()
            .map_err(|e| RemoteError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            default_timeout,
            token,
        })
    }

    fn url(address: &str, path: &str) -> Result<String, RemoteError> {
        if !(address.starts_with("http://") || address.starts_with("https://")) {
            return Err(RemoteError::InvalidAddress(address.to_string()));
        }
        Ok(format!("{}/{path}", address.trim_end_matches('/')))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(SERVICE_TOKEN_HEADER, token),
            None => request,
        }
    }

    fn map_send_error(err: &reqwest::Error, timeout: Duration) -> RemoteError {
        if err.is_timeout() {
            #[allow(clippy::cast_possible_truncation)]
            let timeout_ms = timeout.as_millis() as u64;
            RemoteError::Timeout { timeout_ms }
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn call(
        &self,
        address: &str,
        method: &str,
        args: &CallArgs,
        timeout: Option<Duration>,
    ) -> Result<Value, RemoteError> {
        let url = Self::url(address, method)?;
        let timeout = timeout.unwrap_or(self.default_timeout);
        debug!(%url, "remote call");

        let response = self
            .authorize(self.client.post(&url).json(args).timeout(timeout))
            .send()
            .await
            .map_err(|e| Self::map_send_error(&e, timeout))?;

        match response.status() {
            status if status.is_success() => response
                .json::<Value>()
                .await
                .map_err(|e| RemoteError::Decode(e.to_string())),
            StatusCode::NOT_FOUND => Err(RemoteError::UnsupportedMethod {
                method: method.to_string(),
            }),
            status => Err(RemoteError::Status {
                status: status.as_u16(),
            }),
        }
    }

    async fn health(
        &self,
        address: &str,
        timeout: Option<Duration>,
    ) -> Result<RemoteHealth, RemoteError> {
        let url = Self::url(address, "health")?;
        let timeout = timeout.unwrap_or(self.default_timeout);

        let response = self
            .authorize(self.client.get(&url).timeout(timeout))
            .send()
            .await
            .map_err(|e| Self::map_send_error(&e, timeout))?;

        let status_code = response.status().as_u16();
        // A body that is not a health report still proves reachability.
        let report = response.json::<HealthReport>().await.ok();
        Ok(RemoteHealth {
            status_code,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_rules() {
        let healthy = RemoteHealth {
            status_code: 200,
            report: Some(HealthReport::new(HealthStatus::Healthy)),
        };
        assert_eq!(healthy.status(), HealthStatus::Healthy);

        let self_degraded = RemoteHealth {
            status_code: 200,
            report: Some(HealthReport::new(HealthStatus::Down)),
        };
        assert_eq!(self_degraded.status(), HealthStatus::Degraded);

        let not_json = RemoteHealth {
            status_code: 200,
            report: None,
        };
        assert_eq!(not_json.status(), HealthStatus::Degraded);

        let error_page = RemoteHealth {
            status_code: 503,
            report: Some(HealthReport::new(HealthStatus::Healthy)),
        };
        assert_eq!(error_page.status(), HealthStatus::Degraded);
    }

    #[test]
    fn rejects_non_http_addresses() {
        assert_eq!(
            HttpTransport::url("ai:8005", "summarize"),
            Err(RemoteError::InvalidAddress("ai:8005".to_string()))
        );
        assert_eq!(
            HttpTransport::url("http://ai:8005/", "summarize").unwrap(),
            "http://ai:8005/summarize"
        );
    }

    #[tokio::test]
    async fn unreachable_remote_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let transport = HttpTransport::new(Duration::from_secs(2), None).unwrap();
        let err = transport
            .call(&address, "x", &CallArgs::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Transport(_) | RemoteError::Timeout { .. }
        ));
    }
}
