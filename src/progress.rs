//! Phase-transition progress events.
//!
//! The notifier keeps a process-wide set of active attempt identifiers and a
//! subscriber registry. Emission is fire-and-forget over unbounded channels:
//! a slow or vanished subscriber never blocks the migration's critical path.
//! Dropping the notifier force-clears any still-registered attempts so
//! repeated failed attempts cannot accumulate across a process lifetime.

use std::collections::HashSet;
use std::sync::mpsc::{channel, Receiver, Sender};

use parking_lot::Mutex;
use serde::Serialize;

/// Executor phases, in forward order. `Failed` and `RolledBack` are the two
/// off-path transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Locked,
    BackingUp,
    Cleanup,
    SchemaApplied,
    DataMigrated,
    Verified,
    Committed,
    Failed,
    RolledBack,
}

impl MigrationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationPhase::Locked => "locked",
            MigrationPhase::BackingUp => "backing_up",
            MigrationPhase::Cleanup => "cleanup",
            MigrationPhase::SchemaApplied => "schema_applied",
            MigrationPhase::DataMigrated => "data_migrated",
            MigrationPhase::Verified => "verified",
            MigrationPhase::Committed => "committed",
            MigrationPhase::Failed => "failed",
            MigrationPhase::RolledBack => "rolled_back",
        }
    }
}

/// One event per phase transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub attempt_id: String,
    pub phase: MigrationPhase,
    /// Optional phase-specific measure (rows migrated, categories repaired).
    pub measure: Option<u64>,
}

/// Token handed out by [`ProgressNotifier::subscribe`]; pass it back to
/// `unsubscribe` to stop receiving events.
pub type SubscriptionToken = u64;

#[derive(Default)]
struct NotifierInner {
    active: HashSet<String>,
    subscribers: Vec<(SubscriptionToken, Sender<ProgressEvent>)>,
    next_token: SubscriptionToken,
}

/// Process-wide progress registry. One per engine.
#[derive(Default)]
pub struct ProgressNotifier {
    inner: Mutex<NotifierInner>,
}

impl ProgressNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Events are delivered over an unbounded channel;
    /// the receiver side decides how to drain it.
    pub fn subscribe(&self) -> (SubscriptionToken, Receiver<ProgressEvent>) {
        let (tx, rx) = channel();
        let mut inner = self.inner.lock();
        let token = inner.next_token;
        inner.next_token += 1;
        inner.subscribers.push((token, tx));
        (token, rx)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) {
        self.inner.lock().subscribers.retain(|(t, _)| *t != token);
    }

    /// Register an attempt as active.
    pub fn begin_attempt(&self, attempt_id: &str) {
        self.inner.lock().active.insert(attempt_id.to_string());
    }

    /// Remove an attempt from the active set once it reaches a terminal phase.
    pub fn end_attempt(&self, attempt_id: &str) {
        self.inner.lock().active.remove(attempt_id);
    }

    pub fn active_attempts(&self) -> usize {
        self.inner.lock().active.len()
    }

    /// Emit one phase-transition event to every subscriber. Disconnected
    /// subscribers are pruned; sends never block.
    pub fn emit(&self, attempt_id: &str, phase: MigrationPhase, measure: Option<u64>) {
        let event = ProgressEvent {
            attempt_id: attempt_id.to_string(),
            phase,
            measure,
        };
        log::debug!("migration {}: phase {}", attempt_id, phase.as_str());

        let mut inner = self.inner.lock();
        inner
            .subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

impl Drop for ProgressNotifier {
    fn drop(&mut self) {
        // Shutdown hook: clear anything an aborted attempt left registered.
        let mut inner = self.inner.lock();
        if !inner.active.is_empty() {
            log::warn!(
                "clearing {} active migration attempt(s) at shutdown",
                inner.active.len()
            );
            inner.active.clear();
        }
    }
}
