//! Push dispatcher.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{info, warn};

use crate::devices::{DeviceEndpoint, DeviceRegistry};
use crate::dispatch::ChannelReceipt;
use crate::error::DeliveryError;
use crate::gateway::{PushGateway, PushPayload, Receipt};
use crate::handlers::RenderedMessage;
use crate::retry::{Cancellation, RetryPolicy, send_with_retry};
use crate::types::Channel;

/// Delivers rendered messages to every active device of a user.
pub struct PushDispatcher {
    gateway: Arc<dyn PushGateway>,
    registry: Arc<DeviceRegistry>,
    policy: RetryPolicy,
}

impl PushDispatcher {
    pub fn new(
        gateway: Arc<dyn PushGateway>,
        registry: Arc<DeviceRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            registry,
            policy,
        }
    }

    /// Whether the user has anywhere to push to.
    pub fn has_target(&self, user_id: &str) -> bool {
        self.registry.has_active_endpoint(user_id)
    }

    /// Minimal payload, flagged for immediate delivery.
    pub fn payload(message: &RenderedMessage) -> PushPayload {
        PushPayload {
            title: message.title.clone(),
            body: message.body.clone(),
            data: message.data.clone(),
            immediate: true,
        }
    }

    /// Push to all active endpoints of `user_id`.
    ///
    /// Succeeds if at least one device accepted the message. Devices fail
    /// independently; a device reported as invalid is deactivated.
    #[tracing::instrument(skip(self, message, cancel), fields(kind = %message.kind))]
    pub async fn send(
        &self,
        message: &RenderedMessage,
        user_id: &str,
        cancel: &Cancellation,
    ) -> Result<ChannelReceipt, DeliveryError> {
        let endpoints = self.registry.active_endpoints(user_id);
        if endpoints.is_empty() {
            return Err(DeliveryError::NoTarget {
                channel: Channel::Push,
                user_id: user_id.to_string(),
            });
        }

        let payload = Self::payload(message);
        let results = join_all(
            endpoints
                .iter()
                .map(|endpoint| self.send_to_endpoint(endpoint, &payload, cancel)),
        )
        .await;

        let mut message_ids = Vec::new();
        let mut attempts = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok((receipt, n)) => {
                    attempts += n;
                    message_ids.push(receipt.message_id);
                }
                Err(e) => {
                    attempts += e.attempts();
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(error) if message_ids.is_empty() => Err(error),
            _ => Ok(ChannelReceipt {
                channel: Channel::Push,
                message_ids,
                attempts,
            }),
        }
    }

    async fn send_to_endpoint(
        &self,
        endpoint: &DeviceEndpoint,
        payload: &PushPayload,
        cancel: &Cancellation,
    ) -> Result<(Receipt, u32), DeliveryError> {
        let result = send_with_retry(Channel::Push, &self.policy, cancel, || {
            self.gateway
                .send(&endpoint.address, endpoint.platform, payload)
        })
        .await;

        match &result {
            Err(DeliveryError::Permanent { error, .. }) if error.is_endpoint_invalid() => {
                self.registry
                    .deactivate(&endpoint.user_id, endpoint.platform, &endpoint.address);
            }
            Err(e) => {
                warn!(user_id = %endpoint.user_id, platform = %endpoint.platform, error = %e, "push to device failed");
            }
            Ok((receipt, attempts)) => {
                info!(
                    user_id = %endpoint.user_id,
                    platform = %endpoint.platform,
                    message_id = %receipt.message_id,
                    attempts,
                    "push delivered"
                );
            }
        }

        result
    }
}
