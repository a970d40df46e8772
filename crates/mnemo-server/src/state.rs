//! Application state.

use std::sync::Arc;
use std::time::Instant;

use mnemo_sdk::MemoryOrchestrator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Memory orchestrator
    pub memory: Arc<MemoryOrchestrator>,
    /// Server start time
    pub started_at: Instant,
}

impl AppState {
    pub fn new(memory: Arc<MemoryOrchestrator>) -> Self {
        Self {
            memory,
            started_at: Instant::now(),
        }
    }
}
