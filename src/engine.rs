use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::config::MonitorConfig;
use crate::models::PerceptionEvent;
use crate::store::MonitorStore;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *lock(&self.now) = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// An event whose evaluation failed after it was persisted.
#[derive(Debug, Clone)]
pub(crate) struct PendingEvaluation {
    pub event: PerceptionEvent,
    pub attempts: u32,
}

/// The monitoring and alerting engine.
///
/// Stateless across calls apart from the retry queue: every windowed figure is
/// recomputed from the store.
pub struct Monitor<S> {
    pub(crate) store: Arc<S>,
    pub(crate) config: MonitorConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) pending: Mutex<VecDeque<PendingEvaluation>>,
}

impl<S: MonitorStore> Monitor<S> {
    pub fn new(store: Arc<S>, config: MonitorConfig) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(SystemClock),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn pending_evaluations(&self) -> usize {
        lock(&self.pending).len()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
