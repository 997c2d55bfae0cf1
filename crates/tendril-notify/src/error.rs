//! Error types for notification processing and delivery.

use thiserror::Error;

use crate::retry::WaitAborted;
use crate::types::{Channel, UserId};

/// Errors returned by a channel gateway for a single send.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The delivery address is permanently invalid (e.g. an uninstalled app).
    #[error("endpoint no longer valid: {0}")]
    EndpointInvalid(String),

    /// The gateway refused the message and will keep refusing it.
    #[error("rejected by gateway ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Network or gateway-side failure worth retrying.
    #[error("transient gateway failure: {0}")]
    Transient(String),
}

impl GatewayError {
    /// Check if the error is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }

    pub fn is_endpoint_invalid(&self) -> bool {
        matches!(self, GatewayError::EndpointInvalid(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transient(err.to_string())
    }
}

/// Terminal failure of one channel for one event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The gateway reported a permanent failure. No retry was made.
    #[error("{channel} delivery failed permanently after {attempts} attempt(s): {error}")]
    Permanent {
        channel: Channel,
        attempts: u32,
        error: GatewayError,
    },

    /// Every attempt failed transiently.
    #[error("{channel} delivery failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        channel: Channel,
        attempts: u32,
        last: GatewayError,
    },

    /// A backoff wait was cut short by the caller's deadline or shutdown.
    #[error("{channel} delivery aborted after {attempts} attempt(s): {reason}")]
    Aborted {
        channel: Channel,
        attempts: u32,
        reason: WaitAborted,
    },

    /// The message could not be rendered for this channel.
    #[error("{channel} rendering failed: {message}")]
    Render { channel: Channel, message: String },

    /// Nothing to deliver to (no active device, no usable address).
    #[error("no {channel} target for user {user_id}")]
    NoTarget { channel: Channel, user_id: UserId },
}

impl DeliveryError {
    pub fn channel(&self) -> Channel {
        match self {
            DeliveryError::Permanent { channel, .. }
            | DeliveryError::RetriesExhausted { channel, .. }
            | DeliveryError::Aborted { channel, .. }
            | DeliveryError::Render { channel, .. }
            | DeliveryError::NoTarget { channel, .. } => *channel,
        }
    }

    /// Number of gateway calls made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryError::Permanent { attempts, .. }
            | DeliveryError::RetriesExhausted { attempts, .. }
            | DeliveryError::Aborted { attempts, .. } => *attempts,
            DeliveryError::Render { .. } | DeliveryError::NoTarget { .. } => 0,
        }
    }
}

/// Errors that stop an event from being processed at all.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The user/preferences service failed.
    #[error("user directory error: {0}")]
    Directory(String),

    /// The dedup store failed to answer a claim.
    #[error("dedup store error: {0}")]
    Dedup(String),
}
