//! Named streaming tasks polled to generate outbound frames.
//!
//! A task is identified by its `(symbol, request_id)` key and carries a
//! polling interval plus a producer callback. The table is shared between
//! arbitrary callers and the poll cycle; every mutation happens under the
//! map's own exclusion so the cycle never observes a half-updated entry.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub symbol: String,
    pub request_id: String,
}

/// Recognized per-task options. An explicit structure, not a bag of
/// keyword arguments: unknown options cannot exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskParams {
    /// Bar period in minutes, for bar-producing tasks.
    pub timeframe: Option<i64>,
    /// How many ticks a snapshot task should carry.
    pub tick_depth: Option<usize>,
}

pub type Producer = Arc<dyn Fn(&str, &TaskParams) -> Option<Value> + Send + Sync>;

struct StreamTask {
    interval: Duration,
    producer: Producer,
    params: TaskParams,
    next_run: Instant,
}

#[derive(Default)]
pub struct TaskTable {
    tasks: DashMap<TaskKey, StreamTask>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one task per symbol. Re-subscribing an existing
    /// `(symbol, request_id)` key is a no-op. Returns how many tasks were
    /// actually added.
    pub fn subscribe(
        &self,
        request_id: &str,
        symbols: &[String],
        interval: Duration,
        producer: Producer,
        params: TaskParams,
    ) -> usize {
        let mut added = 0;
        for symbol in symbols {
            let key = TaskKey {
                symbol: symbol.clone(),
                request_id: request_id.to_string(),
            };
            match self.tasks.entry(key) {
                Entry::Occupied(_) => {
                    debug!(request_id, %symbol, "already subscribed");
                }
                Entry::Vacant(slot) => {
                    slot.insert(StreamTask {
                        interval,
                        producer: producer.clone(),
                        params: params.clone(),
                        next_run: Instant::now(),
                    });
                    added += 1;
                }
            }
        }
        if added > 0 {
            info!(request_id, added, total = self.tasks.len(), "stream tasks subscribed");
        }
        added
    }

    /// Removes the tasks for `(symbol, request_id)`. Unsubscribing an absent
    /// key is a no-op. Returns how many tasks were removed.
    pub fn unsubscribe(&self, request_id: &str, symbols: &[String]) -> usize {
        let mut removed = 0;
        for symbol in symbols {
            let key = TaskKey {
                symbol: symbol.clone(),
                request_id: request_id.to_string(),
            };
            if self.tasks.remove(&key).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(request_id, removed, total = self.tasks.len(), "stream tasks unsubscribed");
        }
        removed
    }

    pub fn contains(&self, symbol: &str, request_id: &str) -> bool {
        self.tasks.contains_key(&TaskKey {
            symbol: symbol.to_string(),
            request_id: request_id.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks whose interval has elapsed. Each returned task has its next run
    /// already scheduled, so one poll cycle fires it at most once.
    pub fn due(&self) -> Vec<(TaskKey, Producer, TaskParams)> {
        let now = Instant::now();
        let mut due = Vec::new();
        for mut entry in self.tasks.iter_mut() {
            if now >= entry.next_run {
                entry.next_run = now + entry.interval;
                due.push((entry.key().clone(), entry.producer.clone(), entry.params.clone()));
            }
        }
        due
    }
}
