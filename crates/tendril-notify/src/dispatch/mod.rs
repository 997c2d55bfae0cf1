//! Channel dispatchers.
//!
//! A dispatcher owns one gateway and the retry policy for its channel. The
//! processor holds one instance of each and never talks to gateways directly.

mod email;
mod push;

pub use email::{EmailDispatcher, EmailMessage, EmailTemplate, EmailTemplates};
pub use push::PushDispatcher;

use serde::{Deserialize, Serialize};

use crate::types::Channel;

/// Result of a successful channel dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReceipt {
    pub channel: Channel,
    /// Gateway message ids, one per delivered target.
    pub message_ids: Vec<String>,
    /// Total gateway calls made, across all targets.
    pub attempts: u32,
}
