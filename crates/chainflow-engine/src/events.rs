//! Step progress events for observability.
//!
//! The engine reports every step transition as a [`StepEvent`] to its
//! registered [`ProgressObserver`]s. [`EventEmitter`] forwards the same events
//! onto a [`tokio::sync::broadcast`] channel so async subscribers (loggers, a
//! UI, tests) can follow a run without coupling to the engine internals.

use serde::{Deserialize, Serialize};

use chainflow_types::StepUsage;

/// Events emitted while a chain runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepEvent {
    Started {
        step: String,
        index: usize,
        total: usize,
    },
    Completed {
        step: String,
        usage: StepUsage,
        duration_ms: u64,
    },
    /// Always preceded by a `Started` for the same step. A chain rejected
    /// before its first step runs only moves the engine to `RunState::Failed`.
    Failed {
        step: String,
        error: String,
    },
}

impl StepEvent {
    /// Output name of the step the event belongs to.
    pub fn step(&self) -> &str {
        match self {
            StepEvent::Started { step, .. }
            | StepEvent::Completed { step, .. }
            | StepEvent::Failed { step, .. } => step,
        }
    }
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// Receives step events synchronously, in order, on the engine's task.
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: &StepEvent);
}

/// Adapts a closure into a [`ProgressObserver`].
pub struct FnObserver<F>(pub F);

impl<F> ProgressObserver for FnObserver<F>
where
    F: Fn(&StepEvent) + Send + Sync,
{
    fn on_event(&self, event: &StepEvent) {
        (self.0)(event)
    }
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<StepEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: StepEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StepEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressObserver for EventEmitter {
    fn on_event(&self, event: &StepEvent) {
        self.emit(event.clone());
    }
}
