//! Channel gateways.
//!
//! A gateway performs exactly one send and classifies the outcome; retry
//! and backoff live in the dispatchers. The HTTP implementations talk to a
//! push relay and a transactional email API; the log-only implementations
//! stand in when no gateway is configured.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::GatewayError;
use crate::types::Platform;

/// Error code a push gateway uses for a dead device token.
pub const ENDPOINT_INVALID_CODE: &str = "endpoint_invalid";

/// Minimal push payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
    /// Deliver immediately rather than batching for power saving.
    pub immediate: bool,
}

/// Acknowledgement from a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub message_id: String,
}

/// Sends one push notification to one device.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(
        &self,
        address: &str,
        platform: Platform,
        payload: &PushPayload,
    ) -> Result<Receipt, GatewayError>;
}

/// Sends one email.
#[async_trait]
pub trait EmailGateway: Send + Sync {
    async fn send(
        &self,
        address: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<Receipt, GatewayError>;
}

/// Error body returned by both HTTP gateways.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Map a non-success HTTP response to a gateway error.
fn classify(status: StatusCode, body: &str) -> GatewayError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed.message.unwrap_or_else(|| body.to_string());

    if parsed.code.as_deref() == Some(ENDPOINT_INVALID_CODE) {
        return GatewayError::EndpointInvalid(message);
    }

    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        return GatewayError::Transient(format!("{}: {}", status, message));
    }

    GatewayError::Rejected {
        status: status.as_u16(),
        message,
    }
}

/// Header some gateways use to return the message id instead of a body.
const MESSAGE_ID_HEADER: &str = "x-message-id";

/// A 2xx is a delivery even when the body is not a receipt.
async fn into_receipt(response: reqwest::Response) -> Result<Receipt, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(classify(status, &text));
    }

    let header_id = response
        .headers()
        .get(MESSAGE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();

    match serde_json::from_str::<Receipt>(&body) {
        Ok(receipt) => Ok(receipt),
        Err(e) => {
            debug!(%status, error = %e, "accepted without a receipt body");
            Ok(Receipt {
                message_id: header_id.unwrap_or_else(|| format!("accepted-{}", status.as_u16())),
            })
        }
    }
}

fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()
}

/// Push relay client: `POST {base_url}/v1/push`.
pub struct HttpPushGateway {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPushGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send(
        &self,
        address: &str,
        platform: Platform,
        payload: &PushPayload,
    ) -> Result<Receipt, GatewayError> {
        #[derive(Serialize)]
        struct PushRequest<'a> {
            token: &'a str,
            platform: Platform,
            priority: &'static str,
            notification: &'a PushPayload,
        }

        let url = format!("{}/v1/push", self.base_url);
        let mut request = self.http.post(&url).json(&PushRequest {
            token: address,
            platform,
            priority: if payload.immediate { "high" } else { "normal" },
            notification: payload,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(%platform, "sending push");
        into_receipt(request.send().await?).await
    }
}

/// Transactional email client: `POST {base_url}/v1/messages`.
pub struct HttpEmailGateway {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    from_address: String,
}

impl HttpEmailGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        from_address: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            from_address: from_address.into(),
        })
    }
}

#[async_trait]
impl EmailGateway for HttpEmailGateway {
    async fn send(
        &self,
        address: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<Receipt, GatewayError> {
        #[derive(Serialize)]
        struct MessageRequest<'a> {
            from: &'a str,
            to: &'a str,
            subject: &'a str,
            html: &'a str,
            text: &'a str,
        }

        let url = format!("{}/v1/messages", self.base_url);
        let mut request = self.http.post(&url).json(&MessageRequest {
            from: &self.from_address,
            to: address,
            subject,
            html: html_body,
            text: text_body,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(subject, "sending email");
        into_receipt(request.send().await?).await
    }
}

/// Writes push notifications to the log instead of sending them.
#[derive(Debug, Default)]
pub struct LogPushGateway {
    sent: AtomicU64,
}

#[async_trait]
impl PushGateway for LogPushGateway {
    async fn send(
        &self,
        _address: &str,
        platform: Platform,
        payload: &PushPayload,
    ) -> Result<Receipt, GatewayError> {
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        info!(%platform, title = %payload.title, "push (log only)");
        Ok(Receipt {
            message_id: format!("log-push-{}", n),
        })
    }
}

/// Writes emails to the log instead of sending them.
#[derive(Debug, Default)]
pub struct LogEmailGateway {
    sent: AtomicU64,
}

#[async_trait]
impl EmailGateway for LogEmailGateway {
    async fn send(
        &self,
        _address: &str,
        subject: &str,
        _html_body: &str,
        _text_body: &str,
    ) -> Result<Receipt, GatewayError> {
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        info!(subject, "email (log only)");
        Ok(Receipt {
            message_id: format!("log-email-{}", n),
        })
    }
}
