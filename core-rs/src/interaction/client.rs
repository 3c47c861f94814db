//! HTTP client for the mock service administration endpoints

use reqwest::{header, Method};
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::errors::{HarnessError, Result};

/// Header identifying administrative calls to the mock service
pub const MOCK_SERVICE_HEADER: &str = "X-Pact-Mock-Service";

/// Thin client over a running mock service
#[derive(Debug, Clone)]
pub struct InteractionClient {
    http: reqwest::Client,
}

/// Failure of a single administrative call, before it is given a meaning
enum CallError {
    Transport(HarnessError),
    Status { status: u16, body: String },
}

impl InteractionClient {
    /// Create a client whose requests give up after `request_timeout`
    ///
    /// # Example
    ///
    /// ```
    /// use pact_harness::InteractionClient;
    /// use std::time::Duration;
    ///
    /// let client = InteractionClient::new(Duration::from_secs(5)).unwrap();
    /// ```
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(MOCK_SERVICE_HEADER, header::HeaderValue::from_static("true"));
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(|e| HarnessError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http })
    }

    /// Liveness probe against the mock service root
    pub async fn ping(&self, base_url: &str) -> Result<()> {
        self.call(Method::GET, base_url, None)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                CallError::Transport(err) => err,
                CallError::Status { status, body } => HarnessError::UnexpectedStatus {
                    url: base_url.to_string(),
                    status,
                    body,
                },
            })
    }

    /// Register one interaction
    ///
    /// # Errors
    /// `InteractionRejected` (payload echoed) on a non-2xx answer,
    /// `Transport` when the mock service cannot be reached.
    pub async fn add_interaction(&self, base_url: &str, payload: &JsonValue) -> Result<()> {
        let body = serde_json::to_string(payload)?;
        let url = format!("{}/interactions", base_url);

        match self.call(Method::POST, &url, Some(body.clone())).await {
            Ok(_) => Ok(()),
            Err(CallError::Transport(err)) => Err(err),
            Err(CallError::Status { status, body: response }) => {
                Err(HarnessError::InteractionRejected {
                    status,
                    body: response,
                    payload: body,
                })
            }
        }
    }

    /// Clear every registered interaction
    pub async fn delete_interactions(&self, base_url: &str) -> Result<()> {
        let url = format!("{}/interactions", base_url);

        match self.call(Method::DELETE, &url, None).await {
            Ok(_) => Ok(()),
            Err(CallError::Transport(err)) => Err(err),
            Err(CallError::Status { status, body }) => Err(HarnessError::InteractionRejected {
                status,
                body,
                payload: String::new(),
            }),
        }
    }

    /// Ask whether every registered interaction was exercised
    ///
    /// Read-only on the mock service side.
    ///
    /// # Errors
    /// `VerificationFailed` with the mock service's mismatch report.
    pub async fn verify(&self, base_url: &str) -> Result<()> {
        let url = format!("{}/interactions/verification", base_url);

        match self.call(Method::GET, &url, None).await {
            Ok(_) => Ok(()),
            Err(CallError::Transport(err)) => Err(err),
            Err(CallError::Status { body, .. }) => {
                Err(HarnessError::VerificationFailed { details: body })
            }
        }
    }

    async fn call(
        &self,
        method: Method,
        url: &str,
        body: Option<String>,
    ) -> std::result::Result<String, CallError> {
        let transport = |source: reqwest::Error| {
            CallError::Transport(HarnessError::Transport {
                url: url.to_string(),
                source,
            })
        };

        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(CallError::Status {
                status: status.as_u16(),
                body: text,
            })
        }
    }
}
