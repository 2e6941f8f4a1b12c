use crate::model::{ExecutionStatus, RunStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Run-scoped events fanned out to live observers. At-most-once, best-effort
/// delivery; no replay for late subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum RunEvent {
    #[serde(rename = "connected")]
    Connected { run_id: i64 },
    #[serde(rename = "execution.dispatched")]
    ExecutionDispatched {
        execution_id: i64,
        query_id: i64,
        iteration: u32,
    },
    #[serde(rename = "execution.completed")]
    ExecutionCompleted {
        execution_id: i64,
        query_id: i64,
        iteration: u32,
        status: ExecutionStatus,
        duration_ms: u64,
    },
    #[serde(rename = "run.statusChanged")]
    StatusChanged { status: RunStatus },
    #[serde(rename = "run.progress")]
    Progress { completed: u64, total: u64 },
}

/// In-process publish/subscribe hub keyed by run id.
///
/// Publishing never blocks: each subscriber owns an unbounded channel, so a
/// slow observer cannot delay the execution pipeline. Events for one run
/// reach each of its subscribers in publish order (the registry lock
/// serializes publishes); there is no cross-run ordering.
#[derive(Clone)]
pub struct ProgressHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    subscribers: Mutex<HashMap<i64, HashMap<u64, mpsc::UnboundedSender<RunEvent>>>>,
    next_id: AtomicU64,
}

pub struct Subscription {
    run_id: i64,
    id: u64,
    rx: mpsc::UnboundedReceiver<RunEvent>,
    inner: Arc<HubInner>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers an observer for a run. The first event delivered is a
    /// `connected` acknowledgment.
    pub fn subscribe(&self, run_id: i64) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(RunEvent::Connected { run_id });
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .entry(run_id)
            .or_default()
            .insert(id, tx);
        Subscription {
            run_id,
            id,
            rx,
            inner: self.inner.clone(),
        }
    }

    /// Idempotent; dropping the subscription has the same effect.
    pub fn unsubscribe(&self, sub: &Subscription) {
        HubInner::remove(&self.inner, sub.run_id, sub.id);
    }

    /// Fans the event out to every current subscriber of the run id; a no-op
    /// when there are none.
    pub fn publish(&self, run_id: i64, event: RunEvent) {
        let mut map = self.inner.subscribers.lock().unwrap();
        if let Some(subs) = map.get_mut(&run_id) {
            // A send only fails when the receiver is gone; purge those.
            subs.retain(|_, tx| tx.send(event.clone()).is_ok());
            if subs.is_empty() {
                map.remove(&run_id);
            }
        }
    }

    pub fn subscriber_count(&self, run_id: i64) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .get(&run_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Number of run ids with at least one subscriber.
    pub fn tracked_runs(&self) -> usize {
        self.inner.subscribers.lock().unwrap().len()
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

impl HubInner {
    fn remove(inner: &Arc<HubInner>, run_id: i64, id: u64) {
        let mut map = inner.subscribers.lock().unwrap();
        if let Some(subs) = map.get_mut(&run_id) {
            subs.remove(&id);
            // Last subscriber gone: drop the run id entry to bound memory.
            if subs.is_empty() {
                map.remove(&run_id);
            }
        }
    }
}

impl Subscription {
    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Next event, or None once the subscription is unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        self.rx.recv().await
    }

    /// Non-blocking variant for observers polling between other work.
    pub fn try_recv(&mut self) -> Option<RunEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        HubInner::remove(&self.inner, self.run_id, self.id);
    }
}
