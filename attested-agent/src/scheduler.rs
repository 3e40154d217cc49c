//! Heartbeat scheduler.
//!
//! Sleeps first, then runs a cycle, then records when it finished. Each
//! cycle runs in its own task so a panic is logged and the loop carries on.
//! Stopping cancels the pending sleep but never a cycle in flight.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::heartbeat::HeartbeatResult;

/// Work driven by the scheduler
#[async_trait]
pub trait HeartbeatTask: Send + Sync {
    async fn run(&self) -> HeartbeatResult;
}

pub struct HeartbeatScheduler {
    task: Arc<dyn HeartbeatTask>,
    interval_ms: AtomicU64,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    next_run: RwLock<Option<DateTime<Utc>>>,
    last_run: RwLock<Option<DateTime<Utc>>>,
    last_result: RwLock<Option<HeartbeatResult>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatScheduler {
    pub fn new(task: Arc<dyn HeartbeatTask>, interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            task,
            interval_ms: AtomicU64::new(interval.as_millis() as u64),
            running: AtomicBool::new(false),
            shutdown,
            next_run: RwLock::new(None),
            last_run: RwLock::new(None),
            last_result: RwLock::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Start the loop. Returns `false` if it was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return false;
        }
        self.shutdown.send_replace(false);
        let shutdown = self.shutdown.subscribe();

        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move { scheduler.run_loop(shutdown).await });
        if let Ok(mut slot) = self.handle.lock() {
            *slot = Some(handle);
        }

        info!(interval_secs = self.interval().as_secs(), "Scheduler started");
        true
    }

    /// Prevent further cycles. A cycle already running completes.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        debug!("Scheduler stop requested");
    }

    /// Stop and wait for the loop to exit
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.handle.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler loop ended abnormally");
            }
        }
    }

    /// Takes effect from the next wait
    pub fn set_interval(&self, interval: Duration) {
        self.interval_ms
            .store(interval.as_millis() as u64, Ordering::SeqCst);
        info!(interval_secs = interval.as_secs(), "Heartbeat interval changed");
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn next_run_time(&self) -> Option<DateTime<Utc>> {
        *self.next_run.read().await
    }

    pub async fn last_run_time(&self) -> Option<DateTime<Utc>> {
        *self.last_run.read().await
    }

    pub async fn last_result(&self) -> Option<HeartbeatResult> {
        self.last_result.read().await.clone()
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let interval = self.interval();
            let next = chrono::Duration::from_std(interval)
                .ok()
                .and_then(|delta| Utc::now().checked_add_signed(delta));
            *self.next_run.write().await = next;

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }

            let task = Arc::clone(&self.task);
            match tokio::spawn(async move { task.run().await }).await {
                Ok(result) => {
                    if !result.errors.is_empty() {
                        warn!(errors = ?result.errors, "Heartbeat finished with errors");
                    }
                    *self.last_run.write().await = Some(Utc::now());
                    *self.last_result.write().await = Some(result);
                }
                Err(e) => error!(error = %e, "Heartbeat task failed"),
            }
        }

        *self.next_run.write().await = None;
        self.running.store(false, Ordering::SeqCst);
        info!("Scheduler stopped");
    }
}
