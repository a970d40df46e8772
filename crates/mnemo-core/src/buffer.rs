//! Short-term buffer.
//!
//! Each project owns one [`ShortTermBuffer`]: a capacity-bounded,
//! insertion-ordered window of recent items. When an append pushes the window
//! over capacity, the head item moves to an overflow list flagged
//! `PendingConsolidation` and stays there until consolidation writes it to the
//! long-term store. Overflow items remain searchable.
//!
//! [`BufferRegistry`] hands out one buffer per project behind its own mutex,
//! so appends for a project are serialized while different projects proceed
//! independently.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{ImportanceLevel, ItemState, MemoryItem};

/// Buffer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum number of items in the ordered window.
    pub capacity: usize,
    /// Minimum tier for an item to be consolidated while still in the window.
    pub consolidation_threshold: ImportanceLevel,
    /// Window length above which a consolidation cycle is requested.
    /// Defaults to `capacity`, so only an eviction raises pressure.
    pub pressure_threshold: Option<usize>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            consolidation_threshold: ImportanceLevel::High,
            pressure_threshold: None,
        }
    }
}

impl BufferConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_threshold(mut self, threshold: ImportanceLevel) -> Self {
        self.consolidation_threshold = threshold;
        self
    }

    /// Effective pressure threshold.
    pub fn pressure_at(&self) -> usize {
        self.pressure_threshold.unwrap_or(self.capacity)
    }

    pub fn validate(&self) -> std::result::Result<(), (&'static str, String)> {
        if self.capacity == 0 {
            return Err(("buffer.capacity", "must be greater than 0".into()));
        }
        if let Some(p) = self.pressure_threshold {
            if p == 0 || p > self.capacity {
                return Err((
                    "buffer.pressure_threshold",
                    format!("must be between 1 and capacity ({})", self.capacity),
                ));
            }
        }
        Ok(())
    }
}

/// What happened during an append.
#[derive(Debug, Clone, Default)]
pub struct AppendOutcome {
    /// Id of the item pushed out of the window, if any.
    pub evicted: Option<String>,
    /// The window went over the pressure threshold or holds evicted items.
    pub pressure: bool,
    /// The item was already present; nothing changed.
    pub duplicate: bool,
}

/// Bounded, insertion-ordered holding area for one project.
#[derive(Debug)]
pub struct ShortTermBuffer {
    project_id: String,
    config: BufferConfig,
    items: VecDeque<MemoryItem>,
    overflow: Vec<MemoryItem>,
}

impl ShortTermBuffer {
    pub fn new(project_id: impl Into<String>, config: BufferConfig) -> Self {
        Self {
            project_id: project_id.into(),
            items: VecDeque::with_capacity(config.capacity + 1),
            overflow: Vec::new(),
            config,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Items in the ordered window.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.overflow.is_empty()
    }

    /// Evicted items still waiting for consolidation.
    pub fn overflow_len(&self) -> usize {
        self.overflow.len()
    }

    /// Items flagged `PendingConsolidation`, in the window or the overflow.
    pub fn pending_count(&self) -> usize {
        self.iter()
            .filter(|i| i.state() == ItemState::PendingConsolidation)
            .count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.iter().any(|i| i.id == id)
    }

    /// All live items: overflow first, then the window, both oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &MemoryItem> {
        self.overflow.iter().chain(self.items.iter())
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut MemoryItem> {
        self.overflow.iter_mut().chain(self.items.iter_mut())
    }

    /// Append to the tail, evicting the head when over capacity. The evicted
    /// item is never discarded: it waits in the overflow until consolidated.
    pub fn append(&mut self, item: MemoryItem) -> Result<AppendOutcome> {
        if item.project_id() != self.project_id {
            return Err(Error::validation(format!(
                "item belongs to project '{}'",
                item.project_id()
            ))
            .with_project(&self.project_id)
            .with_item(&item.id));
        }
        if !item.state().is_short_term() {
            return Err(Error::validation(format!(
                "cannot buffer an item in state {}",
                item.state()
            ))
            .with_item(&item.id));
        }

        let mut outcome = AppendOutcome::default();
        if self.contains(&item.id) {
            debug!(project_id = %self.project_id, item_id = %item.id, "Duplicate append ignored");
            outcome.duplicate = true;
            return Ok(outcome);
        }

        self.items.push_back(item);

        if self.items.len() > self.config.capacity {
            if let Some(mut head) = self.items.pop_front() {
                outcome.evicted = Some(head.id.clone());
                head.transition(ItemState::PendingConsolidation)?;
                debug!(
                    project_id = %self.project_id,
                    item_id = %head.id,
                    importance = %head.importance_level(),
                    "Evicted item queued for consolidation"
                );
                self.overflow.push(head);
            }
        }

        outcome.pressure = !self.overflow.is_empty() || self.items.len() > self.config.pressure_at();
        Ok(outcome)
    }

    /// The `n` most recent items of the window, oldest first.
    pub fn window(&self, n: usize) -> Vec<MemoryItem> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }

    /// Items due for consolidation: everything evicted, plus window items at
    /// or above `threshold` or already flagged pending.
    pub fn pending_for_consolidation(&self, threshold: ImportanceLevel) -> Vec<MemoryItem> {
        self.overflow
            .iter()
            .chain(self.items.iter().filter(|i| {
                i.importance_level() >= threshold || i.state() == ItemState::PendingConsolidation
            }))
            .cloned()
            .collect()
    }

    /// Remove items that have been written to long-term storage.
    /// Ids no longer present are ignored. Returns the number removed.
    pub fn remove_ids(&mut self, ids: &HashSet<String>) -> usize {
        let before = self.items.len() + self.overflow.len();
        self.items.retain(|i| !ids.contains(&i.id));
        self.overflow.retain(|i| !ids.contains(&i.id));
        before - (self.items.len() + self.overflow.len())
    }

    /// Flag items whose consolidation did not complete.
    pub fn mark_pending(&mut self, ids: &HashSet<String>) -> usize {
        let mut marked = 0;
        for item in self.iter_mut().filter(|i| ids.contains(&i.id)) {
            match item.transition(ItemState::PendingConsolidation) {
                Ok(()) => {
                    item.consolidation_attempts += 1;
                    marked += 1;
                }
                Err(e) => warn!(error = %e, "Could not flag item pending"),
            }
        }
        marked
    }

    /// Increment access counts.
    pub fn touch(&mut self, ids: &HashSet<String>) {
        for item in self.iter_mut().filter(|i| ids.contains(&i.id)) {
            item.access_count = item.access_count.saturating_add(1);
        }
    }

    /// Cache a computed embedding on a buffered item.
    pub fn set_embedding(&mut self, id: &str, embedding: Vec<f32>) -> bool {
        match self.iter_mut().find(|i| i.id == id) {
            Some(item) => {
                item.embedding = Some(embedding);
                true
            }
            None => false,
        }
    }

    /// Clone of every live item.
    pub fn snapshot(&self) -> Vec<MemoryItem> {
        self.iter().cloned().collect()
    }
}

/// One buffer per project.
#[derive(Debug)]
pub struct BufferRegistry {
    config: BufferConfig,
    buffers: RwLock<HashMap<String, Arc<Mutex<ShortTermBuffer>>>>,
}

impl BufferRegistry {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            buffers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Buffer for a project, created on first use.
    pub async fn get_or_create(&self, project_id: &str) -> Arc<Mutex<ShortTermBuffer>> {
        if let Some(buffer) = self.buffers.read().await.get(project_id) {
            return Arc::clone(buffer);
        }

        let mut buffers = self.buffers.write().await;
        Arc::clone(buffers.entry(project_id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(ShortTermBuffer::new(project_id, self.config.clone())))
        }))
    }

    pub async fn get(&self, project_id: &str) -> Option<Arc<Mutex<ShortTermBuffer>>> {
        self.buffers.read().await.get(project_id).cloned()
    }

    /// Known project ids, sorted.
    pub async fn projects(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.buffers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
