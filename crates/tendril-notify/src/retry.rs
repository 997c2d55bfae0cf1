//! Retry policy and cancellable backoff waits.
//!
//! The policy decides how long to wait before each retry; the
//! [`Cancellation`] decides whether a wait may run to completion. Channel
//! dispatchers combine both in [`send_with_retry`].

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::warn;

use crate::error::{DeliveryError, GatewayError};
use crate::types::Channel;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default total attempts per channel send (initial + retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Upper bound on a single backoff wait.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Exponential backoff policy: `base`, `2 * base`, `4 * base`, ... capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            ..Self::default()
        }
    }

    /// A fresh, jitter-free backoff schedule for one send.
    pub fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Why a backoff wait ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitAborted {
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("shutdown requested")]
    Shutdown,
}

/// Caller-supplied limits on how long delivery may keep waiting.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    deadline: Option<Instant>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    /// No deadline, no shutdown signal.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Fail fast if the deadline has passed or shutdown was requested.
    pub fn check(&self) -> Result<(), WaitAborted> {
        if let Some(shutdown) = &self.shutdown
            && *shutdown.borrow()
        {
            return Err(WaitAborted::Shutdown);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(WaitAborted::DeadlineExceeded);
        }
        Ok(())
    }

    /// Sleep for `delay` unless the deadline or a shutdown interrupts first.
    pub async fn wait(&self, delay: Duration) -> Result<(), WaitAborted> {
        self.check()?;

        let deadline = self.deadline;
        let shutdown = self.shutdown.clone();

        tokio::select! {
            biased;

            _ = shutdown_requested(shutdown) => Err(WaitAborted::Shutdown),
            _ = deadline_reached(deadline) => Err(WaitAborted::DeadlineExceeded),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

async fn shutdown_requested(shutdown: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = shutdown else {
        return std::future::pending::<()>().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        // Sender gone: nobody can ask for shutdown any more.
        if rx.changed().await.is_err() {
            return std::future::pending::<()>().await;
        }
    }
}

/// Run `send` until it succeeds, fails permanently, or runs out of attempts.
///
/// Attempts are strictly sequential. Only [`GatewayError::Transient`] is
/// retried. Returns the value and the number of attempts made.
pub async fn send_with_retry<T, F, Fut>(
    channel: Channel,
    policy: &RetryPolicy,
    cancel: &Cancellation,
    mut send: F,
) -> Result<(T, u32), DeliveryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    if let Err(reason) = cancel.check() {
        return Err(DeliveryError::Aborted {
            channel,
            attempts: 0,
            reason,
        });
    }

    let max_attempts = policy.max_attempts.max(1);
    let mut schedule = policy.schedule();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let error = match send().await {
            Ok(value) => return Ok((value, attempts)),
            Err(error) => error,
        };

        if !error.is_transient() {
            return Err(DeliveryError::Permanent {
                channel,
                attempts,
                error,
            });
        }

        if attempts >= max_attempts {
            warn!(%channel, attempts, error = %error, "delivery retries exhausted");
            return Err(DeliveryError::RetriesExhausted {
                channel,
                attempts,
                last: error,
            });
        }

        let delay = schedule.next_backoff().unwrap_or(policy.max_delay);
        warn!(
            %channel,
            attempt = attempts,
            backoff_ms = delay.as_millis() as u64,
            error = %error,
            "transient delivery failure, retrying"
        );

        if let Err(reason) = cancel.wait(delay).await {
            return Err(DeliveryError::Aborted {
                channel,
                attempts,
                reason,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn transient() -> GatewayError {
        GatewayError::Transient("503".to_string())
    }

    #[test]
    fn test_schedule_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            max_attempts: 5,
        };
        let mut schedule = policy.schedule();
        let delays: Vec<u128> = (0..4)
            .map(|_| schedule.next_backoff().unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 300, 300]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_with_growing_delays() {
        let policy = RetryPolicy::new(Duration::from_millis(100));
        let calls = Mutex::new(Vec::new());

        let result = send_with_retry(Channel::Push, &policy, &Cancellation::none(), || {
            let mut calls = calls.lock().unwrap();
            calls.push(Instant::now());
            let n = calls.len();
            async move { if n < 3 { Err(transient()) } else { Ok("sent") } }
        })
        .await;

        assert_eq!(result, Ok(("sent", 3)));
        let calls = calls.into_inner().unwrap();
        assert_eq!(calls.len(), 3);
        let first_gap = calls[1] - calls[0];
        let second_gap = calls[2] - calls[1];
        assert!(first_gap >= Duration::from_millis(100));
        assert!(second_gap > first_gap);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(Duration::from_millis(10));
        let calls = Mutex::new(0u32);

        let result: Result<((), u32), _> =
            send_with_retry(Channel::Email, &policy, &Cancellation::none(), || {
                *calls.lock().unwrap() += 1;
                async { Err(transient()) }
            })
            .await;

        assert_eq!(*calls.lock().unwrap(), 3);
        match result {
            Err(DeliveryError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let policy = RetryPolicy::default();
        let calls = Mutex::new(0u32);

        let result: Result<((), u32), _> =
            send_with_retry(Channel::Push, &policy, &Cancellation::none(), || {
                *calls.lock().unwrap() += 1;
                async { Err(GatewayError::EndpointInvalid("gone".into())) }
            })
            .await;

        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(matches!(
            result,
            Err(DeliveryError::Permanent { attempts: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_backoff_without_another_attempt() {
        let policy = RetryPolicy::new(Duration::from_secs(10));
        let cancel = Cancellation::none().with_deadline(Instant::now() + Duration::from_secs(1));
        let calls = Mutex::new(0u32);

        let result: Result<((), u32), _> = send_with_retry(Channel::Push, &policy, &cancel, || {
            *calls.lock().unwrap() += 1;
            async { Err(transient()) }
        })
        .await;

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(
            result,
            Err(DeliveryError::Aborted {
                channel: Channel::Push,
                attempts: 1,
                reason: WaitAborted::DeadlineExceeded,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_wait() {
        let (tx, rx) = watch::channel(false);
        let cancel = Cancellation::none().with_shutdown(rx);

        let waiter = tokio::spawn(async move { cancel.wait(Duration::from_secs(60)).await });
        tokio::task::yield_now().await;
        tx.send(true).unwrap();

        assert_eq!(waiter.await.unwrap(), Err(WaitAborted::Shutdown));
    }

    #[tokio::test]
    async fn test_expired_deadline_prevents_first_attempt() {
        let cancel = Cancellation::none().with_deadline(Instant::now());
        let result: Result<((), u32), _> =
            send_with_retry(Channel::Email, &RetryPolicy::default(), &cancel, || async {
                Ok(())
            })
            .await;
        assert!(matches!(
            result,
            Err(DeliveryError::Aborted { attempts: 0, .. })
        ));
    }
}
