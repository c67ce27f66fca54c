// Typed events carried by the comparison stream
//
// One frame payload maps to at most one event. Malformed payloads and
// unknown kinds are dropped here so a single corrupt frame can never take
// down the whole run.

use serde::Deserialize;

use crate::models::{ModelResult, ResultSummary, Session};

/// Closed set of event kinds pushed by the comparison backend
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Stream handshake acknowledged
    SessionStart { session_id: String },
    /// Authoritative progress tick for one worker
    ModelProgress {
        model: String,
        stage: String,
        elapsed: f64,
        progress: f64,
    },
    /// Worker finished successfully
    ModelComplete {
        model: String,
        elapsed: f64,
        summary: ResultSummary,
        #[serde(default)]
        result: Option<ModelResult>,
    },
    /// Worker failed
    ModelError {
        model: String,
        #[serde(default)]
        stage: Option<String>,
        #[serde(default)]
        elapsed: Option<f64>,
        #[serde(default)]
        progress: Option<f64>,
        #[serde(default)]
        message: Option<String>,
    },
    /// Stream-level failure, not tied to any worker
    Error { message: String },
    /// Run finished; carries the authoritative consolidated session
    SessionComplete { session: Session },
    /// Liveness signal only, no state change
    Heartbeat,
    /// Forward compatibility: kinds this version does not know about
    #[serde(other)]
    Unknown,
}

/// Parse one frame payload into an event
///
/// Returns `None` for malformed payloads and unknown kinds; both are
/// dropped without surfacing an error and the stream continues.
pub fn interpret(payload: &str) -> Option<StreamEvent> {
    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(StreamEvent::Unknown) => {
            log::debug!("Ignoring unknown event kind: {}", payload);
            None
        }
        Ok(event) => Some(event),
        Err(e) => {
            log::debug!("Dropping malformed event frame ({}): {}", e, payload);
            None
        }
    }
}

/// Normalize a wire progress value into the displayed 0-100 range
pub fn clamp_progress(progress: f64) -> u8 {
    progress.clamp(0.0, 100.0).round() as u8
}
