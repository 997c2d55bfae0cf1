//! Notification processing and delivery for Tendril.
//!
//! This crate turns domain events into push and email notifications:
//!
//! - **Processor**: preference gate, dedup claim, rendering, concurrent fan-out
//! - **Dedup**: atomic `try_claim` with expiry, keyed by a hash of kind, entity and day
//! - **Devices**: per-user push endpoints with deactivation on invalid tokens
//! - **Dispatch**: per-channel delivery with exponential backoff and cancellable waits
//! - **Gateways**: HTTP clients for the push relay and email API, plus log-only stand-ins

pub mod dedup;
pub mod devices;
pub mod dispatch;
mod error;
pub mod gateway;
pub mod handlers;
pub mod processor;
pub mod retry;
mod types;

pub use dedup::{DEFAULT_CLAIM_TTL, DedupStore, InMemoryDedupStore, dedup_key};
pub use devices::{DeviceEndpoint, DeviceRegistry};
pub use dispatch::{ChannelReceipt, EmailDispatcher, EmailTemplates, PushDispatcher};
pub use error::{DeliveryError, GatewayError, NotifyError};
pub use gateway::{
    EmailGateway, HttpEmailGateway, HttpPushGateway, LogEmailGateway, LogPushGateway,
    PushGateway, PushPayload, Receipt,
};
pub use handlers::{EventHandler, HandlerTable, RenderedMessage};
pub use processor::{
    BatchSummary, InMemoryUserDirectory, Outcome, Processor, SkipReason, UserDirectory,
};
pub use retry::{Cancellation, RetryPolicy, WaitAborted};
pub use types::*;
