//! Email dispatcher.

use std::collections::HashMap;
use std::sync::Arc;

use askama::Template;
use tracing::{info, warn};

use crate::dispatch::ChannelReceipt;
use crate::error::DeliveryError;
use crate::gateway::EmailGateway;
use crate::handlers::RenderedMessage;
use crate::retry::{Cancellation, RetryPolicy, send_with_retry};
use crate::types::{Channel, EventKind};

/// Per-kind email framing around the rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailTemplate {
    pub subject_prefix: &'static str,
    pub action_label: Option<&'static str>,
    /// Shown in the footer: "because {reason} notifications are on".
    pub reason: &'static str,
}

/// Email templates keyed by event kind.
#[derive(Debug, Clone, Default)]
pub struct EmailTemplates {
    templates: HashMap<EventKind, EmailTemplate>,
}

impl EmailTemplates {
    pub fn standard() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            EventKind::TaskDueReminder,
            EmailTemplate {
                subject_prefix: "[Tendril] ",
                action_label: Some("Open your task list to mark it done."),
                reason: "task reminder",
            },
        );
        templates.insert(
            EventKind::TaskOverdueAlert,
            EmailTemplate {
                subject_prefix: "[Tendril] ",
                action_label: Some("Catch up on your overdue tasks."),
                reason: "overdue alert",
            },
        );
        templates.insert(
            EventKind::HarvestReminder,
            EmailTemplate {
                subject_prefix: "[Tendril] ",
                action_label: Some("Log your harvest when you're done."),
                reason: "harvest reminder",
            },
        );
        templates.insert(
            EventKind::GrowthRecordAdded,
            EmailTemplate {
                subject_prefix: "[Tendril] ",
                action_label: None,
                reason: "growth update",
            },
        );
        Self { templates }
    }

    pub fn get(&self, kind: EventKind) -> Option<&EmailTemplate> {
        self.templates.get(&kind)
    }
}

#[derive(Template)]
#[template(path = "email.html")]
struct EmailHtml<'a> {
    subject: &'a str,
    heading: &'a str,
    body: &'a str,
    action_label: Option<&'a str>,
    reason: &'a str,
}

/// A fully rendered email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Renders messages through the kind's template and submits them to the
/// email gateway.
pub struct EmailDispatcher {
    gateway: Arc<dyn EmailGateway>,
    templates: EmailTemplates,
    policy: RetryPolicy,
}

impl EmailDispatcher {
    pub fn new(gateway: Arc<dyn EmailGateway>, policy: RetryPolicy) -> Self {
        Self::with_templates(gateway, EmailTemplates::standard(), policy)
    }

    pub fn with_templates(
        gateway: Arc<dyn EmailGateway>,
        templates: EmailTemplates,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            templates,
            policy,
        }
    }

    pub fn render(&self, message: &RenderedMessage) -> Result<EmailMessage, DeliveryError> {
        let template = self
            .templates
            .get(message.kind)
            .ok_or_else(|| DeliveryError::Render {
                channel: Channel::Email,
                message: format!("no email template for {}", message.kind),
            })?;

        let subject = format!("{}{}", template.subject_prefix, message.title);
        let html = EmailHtml {
            subject: &subject,
            heading: &message.title,
            body: &message.body,
            action_label: template.action_label,
            reason: template.reason,
        }
        .render()
        .map_err(|e| DeliveryError::Render {
            channel: Channel::Email,
            message: e.to_string(),
        })?;

        let mut text = format!("{}\n\n{}\n", message.title, message.body);
        if let Some(action) = template.action_label {
            text.push('\n');
            text.push_str(action);
            text.push('\n');
        }

        Ok(EmailMessage {
            subject,
            html,
            text,
        })
    }

    #[tracing::instrument(skip(self, message, address, cancel), fields(kind = %message.kind))]
    pub async fn send(
        &self,
        message: &RenderedMessage,
        address: &str,
        cancel: &Cancellation,
    ) -> Result<ChannelReceipt, DeliveryError> {
        let email = self.render(message)?;

        let result = send_with_retry(Channel::Email, &self.policy, cancel, || {
            self.gateway
                .send(address, &email.subject, &email.html, &email.text)
        })
        .await;

        match result {
            Ok((receipt, attempts)) => {
                info!(message_id = %receipt.message_id, attempts, "email delivered");
                Ok(ChannelReceipt {
                    channel: Channel::Email,
                    message_ids: vec![receipt.message_id],
                    attempts,
                })
            }
            Err(e) => {
                warn!(error = %e, "email delivery failed");
                Err(e)
            }
        }
    }
}
