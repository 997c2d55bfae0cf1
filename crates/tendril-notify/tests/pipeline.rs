//! End-to-end tests of the processor with scripted gateways.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use tendril_notify::{
    Cancellation, Channel, DeliveryError, DeviceRegistry, EmailDispatcher, EmailGateway,
    GatewayError, HandlerTable, InMemoryDedupStore, InMemoryUserDirectory,
    NotificationEvent, NotificationPreferences, Outcome, Platform, Processor, PushDispatcher,
    PushGateway, PushPayload, Receipt, RetryPolicy, SkipReason, UserProfile, WaitAborted,
};
use tokio::sync::watch;

/// Push gateway that replays a script of results, then succeeds.
#[derive(Default)]
struct ScriptedPush {
    script: Mutex<VecDeque<Result<Receipt, GatewayError>>>,
    sent_to: Mutex<Vec<String>>,
}

impl ScriptedPush {
    fn with_script(results: Vec<Result<Receipt, GatewayError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            ..Default::default()
        }
    }

    fn sent(&self) -> Vec<String> {
        self.sent_to.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushGateway for ScriptedPush {
    async fn send(
        &self,
        address: &str,
        _platform: Platform,
        _payload: &PushPayload,
    ) -> Result<Receipt, GatewayError> {
        self.sent_to.lock().unwrap().push(address.to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(Receipt {
                    message_id: format!("push-{}", address),
                })
            })
    }
}

#[derive(Default)]
struct RecordingEmail {
    sent: Mutex<Vec<String>>,
    always_fail: bool,
}

#[async_trait]
impl EmailGateway for RecordingEmail {
    async fn send(
        &self,
        address: &str,
        _subject: &str,
        _html_body: &str,
        _text_body: &str,
    ) -> Result<Receipt, GatewayError> {
        self.sent.lock().unwrap().push(address.to_string());
        if self.always_fail {
            return Err(GatewayError::Transient("503 Service Unavailable".into()));
        }
        Ok(Receipt {
            message_id: "email-1".into(),
        })
    }
}

struct World {
    processor: Processor,
    registry: Arc<DeviceRegistry>,
    push: Arc<ScriptedPush>,
    email: Arc<RecordingEmail>,
}

fn world(prefs: NotificationPreferences, push: ScriptedPush, email: RecordingEmail) -> World {
    let users = InMemoryUserDirectory::from_profiles([UserProfile {
        user_id: "ana".into(),
        email: Some("ana@example.com".into()),
        preferences: prefs,
    }]);
    let registry = Arc::new(DeviceRegistry::new());
    registry.register("ana", Platform::Android, "token-a");

    let push = Arc::new(push);
    let email = Arc::new(email);
    let policy = RetryPolicy::new(Duration::from_millis(50));
    let processor = Processor::new(
        Arc::new(users),
        Arc::new(InMemoryDedupStore::new()),
        HandlerTable::standard(),
        PushDispatcher::new(push.clone(), Arc::clone(&registry), policy),
        EmailDispatcher::new(email.clone(), policy),
    );

    World {
        processor,
        registry,
        push,
        email,
    }
}

fn july(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, day).unwrap()
}

#[tokio::test]
async fn test_identical_harvest_reminders_deliver_once_per_day() {
    let w = world(
        NotificationPreferences::default(),
        ScriptedPush::default(),
        RecordingEmail::default(),
    );
    let cancel = Cancellation::none();

    let first = NotificationEvent::harvest_reminder("ana", "crop-1", "Garlic", july(1));
    let second = NotificationEvent::harvest_reminder("ana", "crop-1", "Garlic", july(1));

    let a = w.processor.process(&first, &cancel).await.unwrap();
    let b = w.processor.process(&second, &cancel).await.unwrap();

    assert_eq!(a, Outcome::Delivered(vec![Channel::Push, Channel::Email]));
    assert_eq!(b, Outcome::Skipped(SkipReason::Duplicate));
    assert_eq!(w.push.sent().len(), 1);
    assert_eq!(w.email.sent.lock().unwrap().len(), 1);

    // A new day is a new logical event.
    let next_day = NotificationEvent::harvest_reminder("ana", "crop-1", "Garlic", july(2));
    let c = w.processor.process(&next_day, &cancel).await.unwrap();
    assert!(!c.is_skipped());
    assert_eq!(w.push.sent().len(), 2);
}

#[tokio::test]
async fn test_push_disabled_never_reaches_the_push_gateway() {
    let prefs = NotificationPreferences {
        push_enabled: false,
        ..Default::default()
    };
    let w = world(prefs, ScriptedPush::default(), RecordingEmail::default());

    let event = NotificationEvent::task_due_reminder("ana", "task-1", "Mulch beds", july(1));
    let outcome = w
        .processor
        .process(&event, &Cancellation::none())
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Delivered(vec![Channel::Email]));
    assert!(w.push.sent().is_empty());
}

#[tokio::test]
async fn test_invalid_endpoint_is_deactivated_and_excluded_next_time() {
    let w = world(
        NotificationPreferences::default(),
        ScriptedPush::with_script(vec![Err(GatewayError::EndpointInvalid(
            "unregistered".into(),
        ))]),
        RecordingEmail::default(),
    );
    let cancel = Cancellation::none();

    let event = NotificationEvent::harvest_reminder("ana", "crop-1", "Garlic", july(1));
    let outcome = w.processor.process(&event, &cancel).await.unwrap();

    match outcome {
        Outcome::PartiallyDelivered {
            delivered,
            failures,
        } => {
            assert_eq!(delivered, vec![Channel::Email]);
            assert!(matches!(
                failures.as_slice(),
                [DeliveryError::Permanent {
                    channel: Channel::Push,
                    attempts: 1,
                    ..
                }]
            ));
        }
        other => panic!("expected partial delivery, got {:?}", other),
    }
    assert!(!w.registry.has_active_endpoint("ana"));
    let stored = w.registry.get("ana", Platform::Android).unwrap();
    assert!(!stored.active);

    let later = NotificationEvent::growth_record_added("ana", "crop-1", "Garlic", "Scapes out", july(1));
    let outcome = w.processor.process(&later, &cancel).await.unwrap();
    assert_eq!(outcome, Outcome::Delivered(vec![Channel::Email]));
    assert_eq!(w.push.sent(), vec!["token-a".to_string()]);
}

#[tokio::test]
async fn test_reregistering_reactivates_push() {
    let w = world(
        NotificationPreferences::default(),
        ScriptedPush::with_script(vec![Err(GatewayError::EndpointInvalid("gone".into()))]),
        RecordingEmail::default(),
    );
    let cancel = Cancellation::none();

    let event = NotificationEvent::harvest_reminder("ana", "crop-1", "Garlic", july(1));
    w.processor.process(&event, &cancel).await.unwrap();
    assert!(!w.registry.has_active_endpoint("ana"));

    w.registry.register("ana", Platform::Android, "token-b");
    let event = NotificationEvent::harvest_reminder("ana", "crop-2", "Onions", july(1));
    let outcome = w.processor.process(&event, &cancel).await.unwrap();

    assert_eq!(outcome, Outcome::Delivered(vec![Channel::Push, Channel::Email]));
    assert_eq!(w.push.sent().last().map(String::as_str), Some("token-b"));
}

#[tokio::test(start_paused = true)]
async fn test_email_retries_exhaust_while_push_succeeds() {
    let w = world(
        NotificationPreferences::default(),
        ScriptedPush::default(),
        RecordingEmail {
            always_fail: true,
            ..Default::default()
        },
    );

    let event = NotificationEvent::task_due_reminder("ana", "task-9", "Turn compost", july(1));
    let outcome = w
        .processor
        .process(&event, &Cancellation::none())
        .await
        .unwrap();

    match outcome {
        Outcome::PartiallyDelivered {
            delivered,
            failures,
        } => {
            assert_eq!(delivered, vec![Channel::Push]);
            assert!(matches!(
                failures.as_slice(),
                [DeliveryError::RetriesExhausted {
                    channel: Channel::Email,
                    attempts: 3,
                    ..
                }]
            ));
        }
        other => panic!("expected partial delivery, got {:?}", other),
    }
    assert_eq!(w.email.sent.lock().unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_aborts_backoff_and_keeps_the_claim() {
    let w = world(
        NotificationPreferences {
            email_enabled: false,
            ..Default::default()
        },
        ScriptedPush::with_script(vec![
            Err(GatewayError::Transient("503".into())),
            Err(GatewayError::Transient("503".into())),
        ]),
        RecordingEmail::default(),
    );
    let (tx, rx) = watch::channel(false);
    let cancel = Cancellation::none().with_shutdown(rx);

    let event = NotificationEvent::harvest_reminder("ana", "crop-1", "Garlic", july(1));
    let processing = w.processor.process(&event, &cancel);
    let trigger = async {
        tokio::task::yield_now().await;
        tx.send(true).unwrap();
    };
    let (outcome, ()) = tokio::join!(processing, trigger);

    match outcome.unwrap() {
        Outcome::PartiallyDelivered {
            delivered,
            failures,
        } => {
            assert!(delivered.is_empty());
            assert!(matches!(
                failures.as_slice(),
                [DeliveryError::Aborted {
                    attempts: 1,
                    reason: WaitAborted::Shutdown,
                    ..
                }]
            ));
        }
        other => panic!("expected aborted delivery, got {:?}", other),
    }
    assert_eq!(w.push.sent().len(), 1);

    // The claim is still held: a replay in the same day is a duplicate.
    let replay = w
        .processor
        .process(&event, &Cancellation::none())
        .await
        .unwrap();
    assert_eq!(replay, Outcome::Skipped(SkipReason::Duplicate));
}
