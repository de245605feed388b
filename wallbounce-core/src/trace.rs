//! Flow traces — per-request, append-only debug event sequences.
//!
//! Every `analyze` call owns one [`FlowRecorder`]. Components append
//! events tagged with a monotonically increasing step index and a
//! wall-clock timestamp; the finished trace ships in the response's debug
//! section. Traces are introspection only and never drive control
//! decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Which component emitted a flow event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowActor {
    Orchestrator,
    Provider,
    Tool,
    Approval,
}

/// A single event within a request's flow trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEvent {
    /// Monotonically increasing within the request; tie-breaker when two
    /// events share a wall-clock timestamp.
    pub step_index: usize,
    pub actor: FlowActor,
    pub event: String,
    pub at: DateTime<Utc>,
    /// Opaque payload, never interpreted by the engine.
    pub payload: serde_json::Value,
}

/// The finished trace: events in step order.
pub type FlowTrace = Vec<FlowEvent>;

/// Collects flow events for one request.
#[derive(Debug, Default)]
pub struct FlowRecorder {
    events: Mutex<Vec<FlowEvent>>,
    next_step: AtomicUsize,
}

impl FlowRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event. Step indices are handed out atomically, so
    /// concurrent provider completions record in a total order.
    pub fn record(&self, actor: FlowActor, event: impl Into<String>, payload: serde_json::Value) {
        let step_index = self.next_step.fetch_add(1, Ordering::Relaxed);
        let entry = FlowEvent {
            step_index,
            actor,
            event: event.into(),
            at: Utc::now(),
            payload,
        };
        self.events.lock().expect("flow recorder poisoned").push(entry);
    }

    /// Number of events recorded so far.
    pub fn len(&self) -> usize {
        self.events.lock().expect("flow recorder poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume the recorder, returning events sorted by step index.
    pub fn into_trace(self) -> FlowTrace {
        let mut events = self.events.into_inner().expect("flow recorder poisoned");
        events.sort_by_key(|e| e.step_index);
        events
    }

    /// Snapshot the trace without consuming the recorder.
    pub fn snapshot(&self) -> FlowTrace {
        let mut events = self
            .events
            .lock()
            .expect("flow recorder poisoned")
            .clone();
        events.sort_by_key(|e| e.step_index);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_indices_are_monotonic() {
        let recorder = FlowRecorder::new();
        recorder.record(FlowActor::Orchestrator, "request_started", json!({}));
        recorder.record(FlowActor::Provider, "vote_collected", json!({"p": "a"}));
        recorder.record(FlowActor::Orchestrator, "consensus_built", json!({}));

        let trace = recorder.into_trace();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace[0].step_index, 0);
        assert_eq!(trace[1].step_index, 1);
        assert_eq!(trace[2].step_index, 2);
        assert_eq!(trace[1].actor, FlowActor::Provider);
    }

    #[test]
    fn test_snapshot_does_not_consume() {
        let recorder = FlowRecorder::new();
        recorder.record(FlowActor::Tool, "tool_executed", json!({"label": "dmesg"}));
        assert_eq!(recorder.snapshot().len(), 1);
        recorder.record(FlowActor::Approval, "auto_approved", json!({}));
        assert_eq!(recorder.snapshot().len(), 2);
    }

    #[test]
    fn test_concurrent_recording_yields_unique_steps() {
        use std::sync::Arc;
        let recorder = Arc::new(FlowRecorder::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let recorder = Arc::clone(&recorder);
            handles.push(std::thread::spawn(move || {
                recorder.record(FlowActor::Provider, format!("vote_{i}"), json!({}));
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let trace = Arc::try_unwrap(recorder).unwrap().into_trace();
        let mut steps: Vec<usize> = trace.iter().map(|e| e.step_index).collect();
        steps.dedup();
        assert_eq!(steps.len(), 8);
        assert!(steps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_event_serializes_with_actor_tag() {
        let recorder = FlowRecorder::new();
        recorder.record(FlowActor::Approval, "pending", json!({"risk": "high"}));
        let trace = recorder.into_trace();
        let json = serde_json::to_value(&trace[0]).unwrap();
        assert_eq!(json["actor"], "approval");
        assert_eq!(json["payload"]["risk"], "high");
    }
}
