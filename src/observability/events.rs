/// Structured lifecycle events for the startup sandbox
///
/// Events carry a sequence number rather than a wall-clock timestamp so that
/// the log captured into a snapshot is itself deterministic.
use crate::config::types::CallbackFailure;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Types of lifecycle events we track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    TopLevelArmed,
    ModuleIntercepted,
    EntropyDenied,
    LeftoverAllowance,
    CallsBlocked,
    CallbackQueued,
    TransitionStarted,
    ModuleRestored,
    CallbackFailed,
    TransitionCompleted,
}

impl LifecycleEventKind {
    fn log(&self, module: Option<&str>, detail: &str) {
        let module = module.unwrap_or("-");
        match self {
            LifecycleEventKind::CallbackFailed | LifecycleEventKind::LeftoverAllowance => {
                error!("sandbox: {:?} [{}] {}", self, module, detail)
            }
            LifecycleEventKind::EntropyDenied => {
                warn!("sandbox: {:?} [{}] {}", self, module, detail)
            }
            LifecycleEventKind::TopLevelArmed
            | LifecycleEventKind::TransitionStarted
            | LifecycleEventKind::TransitionCompleted => {
                info!("sandbox: {:?} [{}] {}", self, module, detail)
            }
            _ => debug!("sandbox: {:?} [{}] {}", self, module, detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub seq: u64,
    pub kind: LifecycleEventKind,
    pub module: Option<String>,
    pub detail: String,
}

/// Append-only in-memory event log
#[derive(Debug, Default)]
pub struct EventLog {
    next_seq: AtomicU64,
    events: Mutex<Vec<LifecycleEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: LifecycleEventKind, module: Option<&str>, detail: impl Into<String>) {
        let detail = detail.into();
        kind.log(module, &detail);
        let event = LifecycleEvent {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            kind,
            module: module.map(str::to_string),
            detail,
        };
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn snapshot(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, kind: LifecycleEventKind) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the first-request transition did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionReport {
    pub transition_id: Uuid,
    pub restored_modules: Vec<String>,
    pub callbacks_run: Vec<String>,
    pub failures: Vec<CallbackFailure>,
    pub deterministic_draws: u64,
}

impl TransitionReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_sequenced() {
        let log = EventLog::new();
        log.record(LifecycleEventKind::TopLevelArmed, None, "armed");
        log.record(LifecycleEventKind::ModuleIntercepted, Some("random"), "exec");

        let events = log.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 0);
        assert_eq!(events[1].seq, 1);
        assert_eq!(events[1].module.as_deref(), Some("random"));
        assert_eq!(log.count(LifecycleEventKind::ModuleIntercepted), 1);
    }

    #[test]
    fn test_event_serializes_snake_case() {
        let event = LifecycleEvent {
            seq: 3,
            kind: LifecycleEventKind::CallsBlocked,
            module: Some("numpy.random".to_string()),
            detail: "allowlist=default_rng".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"calls_blocked\""));
    }
}
