//! Per-project counters.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mnemo_core::{AppendOutcome, ConsolidationReport};
use serde::Serialize;
use tokio::sync::Mutex;

/// Counters accumulated since the orchestrator started.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LifetimeCounters {
    pub appended: u64,
    pub duplicates: u64,
    pub evictions: u64,
    /// Cycles that had at least one candidate.
    pub cycles: u64,
    /// Cycles that errored or left items pending.
    pub failed_cycles: u64,
    /// Buffer items moved to long-term storage.
    pub consolidated_items: u64,
    /// Long-term entries written by consolidation.
    pub long_term_writes: u64,
    pub pruned: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// Snapshot returned by `MemoryOrchestrator::stats`.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub project_id: String,
    pub buffer_len: usize,
    pub overflow_len: usize,
    pub pending: usize,
    /// `None` when the long-term store could not be reached.
    pub long_term: Option<usize>,
    #[serde(flatten)]
    pub counters: LifetimeCounters,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRegistry {
    projects: Mutex<HashMap<String, LifetimeCounters>>,
}

impl StatsRegistry {
    pub(crate) async fn record_append(&self, project_id: &str, outcome: &AppendOutcome) {
        let mut projects = self.projects.lock().await;
        let c = projects.entry(project_id.to_string()).or_default();
        if outcome.duplicate {
            c.duplicates += 1;
            return;
        }
        c.appended += 1;
        if outcome.evicted.is_some() {
            c.evictions += 1;
        }
    }

    pub(crate) async fn record_cycle(
        &self,
        project_id: &str,
        result: &mnemo_core::Result<ConsolidationReport>,
    ) {
        let mut projects = self.projects.lock().await;
        let c = projects.entry(project_id.to_string()).or_default();
        match result {
            Ok(report) if report.candidates == 0 => {}
            Ok(report) => {
                c.cycles += 1;
                c.consolidated_items += report.consolidated_items as u64;
                c.long_term_writes += report.written_groups as u64;
                if !report.is_complete() {
                    c.failed_cycles += 1;
                }
                c.last_cycle_at = Some(Utc::now());
            }
            Err(_) => {
                c.cycles += 1;
                c.failed_cycles += 1;
                c.last_cycle_at = Some(Utc::now());
            }
        }
    }

    pub(crate) async fn record_prune(&self, project_id: &str, pruned: usize) {
        let mut projects = self.projects.lock().await;
        projects.entry(project_id.to_string()).or_default().pruned += pruned as u64;
    }

    pub(crate) async fn snapshot(&self, project_id: &str) -> LifetimeCounters {
        self.projects
            .lock()
            .await
            .get(project_id)
            .cloned()
            .unwrap_or_default()
    }
}
