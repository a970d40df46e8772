//! Background consolidation worker.
//!
//! Runs a cycle for every known project on a fixed interval, and for a single
//! project whenever an append reports buffer pressure. Stopping cancels the
//! token shared with in-flight cycles, so a cycle interrupted mid-way leaves
//! its unfinished items flagged pending.

use std::sync::Arc;
use std::time::Duration;

use mnemo_core::{BufferRegistry, ConsolidationEngine};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::stats::StatsRegistry;

/// Pending pressure notifications before new ones are dropped.
const NOTIFY_CAPACITY: usize = 64;

pub(crate) struct BackgroundWorker {
    cancel: CancellationToken,
    notify_tx: mpsc::Sender<String>,
    handle: JoinHandle<()>,
}

impl BackgroundWorker {
    pub(crate) fn spawn(
        engine: Arc<ConsolidationEngine>,
        buffers: Arc<BufferRegistry>,
        stats: Arc<StatsRegistry>,
        period: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let (notify_tx, mut notify_rx) = mpsc::channel::<String>(NOTIFY_CAPACITY);
        let token = cancel.clone();

        info!(interval_secs = period.as_secs(), "Starting background consolidation");

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    Some(project_id) = notify_rx.recv() => {
                        run_project(&engine, &stats, &project_id, &token).await;
                    }
                    _ = ticker.tick() => {
                        for project_id in buffers.projects().await {
                            if token.is_cancelled() {
                                break;
                            }
                            run_project(&engine, &stats, &project_id, &token).await;
                        }
                    }
                }
            }

            info!("Background consolidation stopped");
        });

        Self {
            cancel,
            notify_tx,
            handle,
        }
    }

    /// Ask for a cycle on one project. Never blocks the caller.
    pub(crate) fn notify(&self, project_id: &str) {
        if let Err(e) = self.notify_tx.try_send(project_id.to_string()) {
            debug!(project_id, error = %e, "Consolidation request not queued");
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Background consolidation task ended abnormally");
        }
    }
}

async fn run_project(
    engine: &ConsolidationEngine,
    stats: &StatsRegistry,
    project_id: &str,
    cancel: &CancellationToken,
) {
    let result = engine.run_cycle(project_id, cancel).await;
    match &result {
        Ok(report) if !report.is_complete() => warn!(
            project_id,
            cycle_id = %report.cycle_id,
            pending = report.pending_items,
            "Background consolidation left items pending"
        ),
        Ok(_) => {}
        Err(e) => warn!(project_id, error = %e, "Background consolidation failed"),
    }
    stats.record_cycle(project_id, &result).await;
}
