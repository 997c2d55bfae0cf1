//! Daemon and one-shot scan commands.
//!
//! The daemon runs three kinds of task:
//! - A scan loop that wakes once a day at the configured UTC hour
//! - A bounded work queue drained by a pool of notification workers
//! - A sweeper that drops expired dedup claims

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use miette::Result;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use tendril_notify::{
    BatchSummary, Cancellation, DedupStore, EmailDispatcher, EmailGateway, HandlerTable,
    HttpEmailGateway, HttpPushGateway, InMemoryDedupStore, LogEmailGateway, LogPushGateway,
    NotificationEvent, Outcome, Processor, PushDispatcher, PushGateway, RetryPolicy,
};
use tendril_scheduler::{CollectingSink, EventSink, ScanReport, SchedulerError, TaskDueScanner};

use crate::snapshot::{Snapshot, Stores};

/// Default number of notification workers.
const DEFAULT_WORKER_COUNT: usize = 4;

/// Default work queue size.
const DEFAULT_QUEUE_SIZE: usize = 256;

/// Default hour of day (UTC) for the daily scan.
const DEFAULT_SCAN_HOUR: u32 = 7;

/// Default time budget for delivering one scan's events, in seconds.
const DEFAULT_BATCH_TIMEOUT: u64 = 15 * 60;

/// Default delay before the first delivery retry, in milliseconds.
const DEFAULT_RETRY_BASE_MS: u64 = 500;

/// Default dedup claim lifetime in seconds.
const DEFAULT_DEDUP_TTL: u64 = 24 * 60 * 60;

/// Default interval between dedup sweeps in seconds.
const DEFAULT_SWEEP_INTERVAL: u64 = 10 * 60;

/// Default HTTP timeout for gateway calls in seconds.
const DEFAULT_GATEWAY_TIMEOUT: u64 = 10;

/// Where notifications are sent.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// Push relay base URL. Pushes are only logged when unset.
    pub push_url: Option<String>,
    pub push_token: Option<String>,
    /// Email API base URL. Emails are only logged when unset.
    pub email_url: Option<String>,
    pub email_token: Option<String>,
    pub email_from: String,
    /// HTTP timeout in seconds (default 10).
    pub timeout: Option<u64>,
}

/// Configuration for the daemon and the one-shot scan.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub snapshot: PathBuf,
    pub gateways: GatewayConfig,
    /// Hour of day (UTC, 0-23) for the daily scan (default 7).
    pub scan_hour: Option<u32>,
    /// Scan immediately on startup as well as at the scheduled hour.
    pub scan_on_start: bool,
    /// Number of notification workers (default 4).
    pub worker_count: Option<usize>,
    /// Work queue size (default 256).
    pub queue_size: Option<usize>,
    /// Seconds allowed for delivering one scan's events (default 900).
    pub batch_timeout: Option<u64>,
    /// First retry delay in milliseconds (default 500).
    pub retry_base_ms: Option<u64>,
    /// Dedup claim lifetime in seconds (default 86400).
    pub dedup_ttl: Option<u64>,
    /// Seconds between dedup sweeps (default 600).
    pub sweep_interval: Option<u64>,
}

impl DaemonConfig {
    pub fn new(snapshot: PathBuf, gateways: GatewayConfig) -> Self {
        Self {
            snapshot,
            gateways,
            scan_hour: None,
            scan_on_start: false,
            worker_count: None,
            queue_size: None,
            batch_timeout: None,
            retry_base_ms: None,
            dedup_ttl: None,
            sweep_interval: None,
        }
    }

    fn scan_hour(&self) -> Result<u32> {
        let hour = self.scan_hour.unwrap_or(DEFAULT_SCAN_HOUR);
        if hour > 23 {
            return Err(miette::miette!("scan hour must be 0-23, got {}", hour));
        }
        Ok(hour)
    }

    fn worker_count(&self) -> usize {
        self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT).max(1)
    }

    fn queue_size(&self) -> usize {
        self.queue_size.unwrap_or(DEFAULT_QUEUE_SIZE).max(1)
    }

    fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout.unwrap_or(DEFAULT_BATCH_TIMEOUT))
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(
            self.retry_base_ms.unwrap_or(DEFAULT_RETRY_BASE_MS),
        ))
    }

    fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl.unwrap_or(DEFAULT_DEDUP_TTL))
    }

    fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval.unwrap_or(DEFAULT_SWEEP_INTERVAL).max(1))
    }
}

/// Everything needed to scan and deliver.
pub struct Pipeline {
    pub processor: Arc<Processor>,
    pub scanner: Arc<TaskDueScanner>,
    pub dedup: Arc<InMemoryDedupStore>,
    /// The stores behind the processor and scanner, refreshed before each daily scan.
    pub stores: Stores,
}

/// Wire stores, gateways and dispatchers together.
pub fn build_pipeline(stores: Stores, config: &DaemonConfig) -> Result<Pipeline> {
    let gateways = &config.gateways;
    let timeout = Duration::from_secs(gateways.timeout.unwrap_or(DEFAULT_GATEWAY_TIMEOUT));

    let push_gateway: Arc<dyn PushGateway> = match &gateways.push_url {
        Some(url) => Arc::new(
            HttpPushGateway::new(url.as_str(), gateways.push_token.clone(), timeout)
                .map_err(|e| miette::miette!("failed to build push client: {}", e))?,
        ),
        None => {
            warn!("no push gateway configured, pushes will only be logged");
            Arc::new(LogPushGateway::default())
        }
    };
    let email_gateway: Arc<dyn EmailGateway> = match &gateways.email_url {
        Some(url) => Arc::new(
            HttpEmailGateway::new(
                url.as_str(),
                gateways.email_token.clone(),
                gateways.email_from.as_str(),
                timeout,
            )
            .map_err(|e| miette::miette!("failed to build email client: {}", e))?,
        ),
        None => {
            warn!("no email gateway configured, emails will only be logged");
            Arc::new(LogEmailGateway::default())
        }
    };

    let policy = config.retry_policy();
    let dedup = Arc::new(InMemoryDedupStore::new());
    let dedup_store: Arc<dyn DedupStore> = dedup.clone();

    let processor = Processor::new(
        stores.users.clone(),
        dedup_store,
        HandlerTable::standard(),
        PushDispatcher::new(push_gateway, Arc::clone(&stores.devices), policy),
        EmailDispatcher::new(email_gateway, policy),
    )
    .with_claim_ttl(config.dedup_ttl());

    Ok(Pipeline {
        processor: Arc::new(processor),
        scanner: Arc::new(TaskDueScanner::new(stores.tasks.clone())),
        dedup,
        stores,
    })
}

/// The next time the daily scan should run, strictly after `now`.
pub fn next_scan_at(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

/// An event plus the deadline of the scan that produced it.
struct EventWork {
    event: NotificationEvent,
    deadline: Instant,
}

/// Feeds scan output into the work queue, stamped with the batch deadline.
///
/// A send blocked on a full queue gives up at the batch deadline or on
/// shutdown, whichever comes first.
struct BatchSink {
    tx: mpsc::Sender<EventWork>,
    deadline: Instant,
    shutdown: watch::Receiver<bool>,
}

#[async_trait]
impl EventSink for BatchSink {
    async fn emit(&self, event: NotificationEvent) -> Result<(), SchedulerError> {
        let work = EventWork {
            event,
            deadline: self.deadline,
        };

        tokio::select! {
            biased;

            _ = shutdown_requested(self.shutdown.clone()) => {
                Err(SchedulerError::Sink("shutdown requested".to_string()))
            }

            sent = tokio::time::timeout_at(self.deadline, self.tx.send(work)) => match sent {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(SchedulerError::Sink("work queue closed".to_string())),
                Err(_) => Err(SchedulerError::Sink(
                    "work queue stayed full until the batch deadline".to_string(),
                )),
            },
        }
    }
}

/// Resolves once shutdown is requested; never if the sender is gone.
async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending::<()>().await;
        }
    }
}

/// Result of a one-shot scan.
#[derive(Debug, Serialize)]
pub struct ScanRun {
    pub report: ScanReport,
    pub summary: BatchSummary,
}

/// Scan `as_of` and deliver everything it produced before returning.
pub async fn scan_and_deliver(
    pipeline: &Pipeline,
    as_of: NaiveDate,
    concurrency: usize,
    batch_timeout: Duration,
) -> std::result::Result<ScanRun, SchedulerError> {
    let cancel = Cancellation::none().with_deadline(Instant::now() + batch_timeout);
    let sink = CollectingSink::new();

    let report = pipeline.scanner.scan(as_of, &sink).await?;
    let summary = pipeline
        .processor
        .process_all(sink.take(), concurrency, &cancel)
        .await;

    info!(
        %as_of,
        delivered = summary.delivered,
        partial = summary.partial,
        skipped = summary.skipped,
        failed = summary.failed,
        "batch delivered"
    );
    Ok(ScanRun { report, summary })
}

/// Run a single scan for `as_of` (default: today, UTC) and print the result.
pub async fn run_scan(config: DaemonConfig, as_of: Option<NaiveDate>) -> Result<()> {
    let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
    let snapshot = Snapshot::load(&config.snapshot).map_err(|e| miette::miette!("{}", e))?;
    let pipeline = build_pipeline(snapshot.into_stores(), &config)?;

    let run = scan_and_deliver(
        &pipeline,
        as_of,
        config.worker_count(),
        config.batch_timeout(),
    )
    .await
    .map_err(|e| miette::miette!("scan failed: {}", e))?;

    let json = serde_json::to_string_pretty(&run).map_err(|e| miette::miette!("{}", e))?;
    println!("{}", json);
    Ok(())
}

/// Run the daemon until ctrl-c.
pub async fn run(config: DaemonConfig) -> Result<()> {
    info!("starting Tendril daemon");

    let scan_hour = config.scan_hour()?;
    let worker_count = config.worker_count();
    let queue_size = config.queue_size();
    let batch_timeout = config.batch_timeout();
    let sweep_interval = config.sweep_interval();

    let snapshot = Snapshot::load(&config.snapshot).map_err(|e| miette::miette!("{}", e))?;
    let pipeline = build_pipeline(snapshot.into_stores(), &config)?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(true);
    });

    // Create work queue for events
    let (work_tx, work_rx) = mpsc::channel::<EventWork>(queue_size);
    let work_rx = Arc::new(Mutex::new(work_rx));

    // Spawn worker pool
    let mut worker_handles = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        let work_rx = Arc::clone(&work_rx);
        let processor = Arc::clone(&pipeline.processor);
        let shutdown_rx = shutdown_rx.clone();
        worker_handles.push(tokio::spawn(run_worker(
            worker_id,
            work_rx,
            processor,
            shutdown_rx,
        )));
    }

    // Spawn scan loop
    let scan_handle = {
        let scanner = Arc::clone(&pipeline.scanner);
        let stores = pipeline.stores.clone();
        let snapshot_path = config.snapshot.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        let scan_on_start = config.scan_on_start;

        tokio::spawn(async move {
            info!(scan_hour, "scan loop started");

            if scan_on_start {
                let as_of = Utc::now().date_naive();
                run_daily_scan(&scanner, &work_tx, &shutdown_rx, as_of, batch_timeout).await;
            }

            loop {
                let now = Utc::now();
                let at = next_scan_at(now, scan_hour);
                let wait = (at - now).to_std().unwrap_or_default();
                debug!(next_scan = %at, "waiting for next scan");

                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }

                    _ = tokio::time::sleep(wait) => {}
                }

                reload_snapshot(&snapshot_path, &stores).await;
                run_daily_scan(&scanner, &work_tx, &shutdown_rx, at.date_naive(), batch_timeout)
                    .await;
            }

            info!("scan loop stopped");
        })
    };

    // Spawn dedup sweeper
    let sweep_handle = {
        let dedup = Arc::clone(&pipeline.dedup);
        let mut shutdown_rx = shutdown_rx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }

                    _ = interval.tick() => {
                        let removed = dedup.sweep();
                        if removed > 0 {
                            debug!(removed, live = dedup.len(), "swept expired dedup claims");
                        }
                    }
                }
            }
        })
    };

    // Wait for shutdown signal
    let mut main_shutdown_rx = shutdown_rx.clone();
    loop {
        if main_shutdown_rx.changed().await.is_err() || *main_shutdown_rx.borrow() {
            break;
        }
    }

    info!("shutting down daemon tasks");

    let _ = scan_handle.await;
    let _ = sweep_handle.await;
    for handle in worker_handles {
        let _ = handle.await;
    }

    info!("daemon shut down gracefully");
    Ok(())
}

async fn run_daily_scan(
    scanner: &TaskDueScanner,
    work_tx: &mpsc::Sender<EventWork>,
    shutdown_rx: &watch::Receiver<bool>,
    as_of: NaiveDate,
    batch_timeout: Duration,
) {
    let sink = BatchSink {
        tx: work_tx.clone(),
        deadline: Instant::now() + batch_timeout,
        shutdown: shutdown_rx.clone(),
    };
    match scanner.scan(as_of, &sink).await {
        Ok(report) => info!(%as_of, emitted = report.emitted, "daily scan queued events"),
        Err(e) => error!(%as_of, error = %e, "daily scan failed, waiting for next run"),
    }
}

/// Pick up changes made by the backend since the last load.
///
/// A snapshot that fails to load leaves the previous data in place.
async fn reload_snapshot(path: &Path, stores: &Stores) {
    match Snapshot::load(path) {
        Ok(snapshot) => snapshot.refresh(stores).await,
        Err(e) => warn!(error = %e, "snapshot reload failed, scanning previous data"),
    }
}

async fn run_worker(
    worker_id: usize,
    work_rx: Arc<Mutex<mpsc::Receiver<EventWork>>>,
    processor: Arc<Processor>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(worker_id, "notification worker started");

    loop {
        // Check for shutdown
        if *shutdown_rx.borrow() {
            break;
        }

        // Try to get work item
        let work = {
            let mut rx = work_rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                work = rx.recv() => work,
            }
        };

        let Some(EventWork { event, deadline }) = work else {
            // Channel closed
            break;
        };

        let cancel = Cancellation::none()
            .with_deadline(deadline)
            .with_shutdown(shutdown_rx.clone());

        match processor.process(&event, &cancel).await {
            Ok(Outcome::Skipped(reason)) => {
                debug!(worker_id, kind = %event.kind(), %reason, "event skipped")
            }
            Ok(outcome) => debug!(
                worker_id,
                kind = %event.kind(),
                channels = ?outcome.delivered_channels(),
                "event processed"
            ),
            Err(e) => error!(worker_id, kind = %event.kind(), error = %e, "event processing failed"),
        }
    }

    info!(worker_id, "notification worker stopped");
}
