// Domain models for multi-model research comparison runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::Instant;

// Stage labels shown for worker lifecycle transitions that do not come
// from the server
pub const STAGE_QUEUED: &str = "Queued";
pub const STAGE_STARTING: &str = "Starting";
pub const STAGE_DONE: &str = "Complete";
pub const STAGE_STOPPED: &str = "Stopped by user";
pub const STAGE_ERROR: &str = "Error";
pub const STAGE_TIMED_OUT: &str = "Timed out";
pub const STAGE_STREAM_ENDED: &str = "Stream ended";

// ============================================================================
// Worker Lifecycle
// ============================================================================

/// Lifecycle state of a single worker (one backend model) within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Pending => "pending",
            WorkerState::Running => "running",
            WorkerState::Completed => "completed",
            WorkerState::Failed => "failed",
        }
    }

    /// Terminal states accept no further transitions for the run
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Completed | WorkerState::Failed)
    }
}

impl Default for WorkerState {
    fn default() -> Self {
        WorkerState::Pending
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WorkerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(WorkerState::Pending),
            "running" => Ok(WorkerState::Running),
            "completed" => Ok(WorkerState::Completed),
            "failed" => Ok(WorkerState::Failed),
            _ => Err(format!(
                "Invalid worker state: '{}'. Expected 'pending', 'running', 'completed', or 'failed'",
                s
            )),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Per-stage timing breakdown of a research run, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct StageTimings {
    #[serde(default)]
    pub planning: f64,
    #[serde(default)]
    pub searching: f64,
    #[serde(default)]
    pub analyzing: f64,
    #[serde(default)]
    pub writing: f64,
}

impl StageTimings {
    pub fn total(&self) -> f64 {
        self.planning + self.searching + self.analyzing + self.writing
    }

    /// All stage timings must be non-negative
    pub fn is_valid(&self) -> bool {
        self.planning >= 0.0 && self.searching >= 0.0 && self.analyzing >= 0.0 && self.writing >= 0.0
    }

    /// Whether the stage breakdown can be rendered proportionally against
    /// the given total duration (stages sum to at most the total)
    pub fn fits_within(&self, duration: f64) -> bool {
        self.is_valid() && self.total() <= duration + f64::EPSILON
    }
}

/// Lightweight result summary pushed before the full result is available
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub word_count: u64,
    pub sources_found: u64,
    pub duration: f64,
}

/// Full per-worker outcome of a comparison run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResult {
    pub model: String,
    pub duration: f64,
    #[serde(default)]
    pub stages: StageTimings,
    pub sources_found: u64,
    pub word_count: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub report: String,
    #[serde(default)]
    pub tools_used: Vec<String>,
}

impl ModelResult {
    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            word_count: self.word_count,
            sources_found: self.sources_found,
            duration: self.duration,
        }
    }

    /// Stage timings of a failed result are not meaningful and must not be
    /// used for proportional rendering
    pub fn stage_breakdown(&self) -> Option<&StageTimings> {
        if self.success && self.stages.fits_within(self.duration) {
            Some(&self.stages)
        } else {
            None
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Immutable finalized outcome of a comparison run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub results: Vec<ModelResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<HashMap<String, String>>,
}

impl Session {
    /// Assemble a session locally from accumulated results (used when a run
    /// ends without a server-pushed consolidated session)
    pub fn from_results(query: String, results: Vec<ModelResult>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            query,
            created_at: Utc::now(),
            results,
            feedback: None,
        }
    }
}

// ============================================================================
// Aggregate Metrics
// ============================================================================

/// Historical aggregate metrics for one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub model: String,
    pub total_requests: u64,
    pub average_duration: f64,
    pub success_rate: f64,
    pub average_sources_found: f64,
    pub average_word_count: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_stages: Option<StageTimings>,
}

/// Response body of the comparison-summary endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub models: Vec<ModelMetrics>,
    pub total_requests: u64,
    pub generated_at: String,
}

// ============================================================================
// Compare Request
// ============================================================================

/// Request body for starting a comparison run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareRequest {
    pub query: String,
    pub models: Vec<String>,
    pub api_keys: HashMap<String, String>,
}

impl CompareRequest {
    /// Validate the request before any stream is opened
    pub fn validate(&self) -> Result<(), String> {
        if self.query.trim().is_empty() {
            return Err("Query must not be empty".to_string());
        }
        if self.models.is_empty() {
            return Err("At least one model must be selected".to_string());
        }
        for model in &self.models {
            match self.api_keys.get(model) {
                Some(key) if !key.trim().is_empty() => {}
                _ => return Err(format!("Missing API key for model '{}'", model)),
            }
        }
        Ok(())
    }
}

// ============================================================================
// Per-Worker Progress State Machine
// ============================================================================

/// Live progress of a single worker within a run
///
/// All transitions are one-way into terminal states; events arriving for an
/// already-terminal worker are ignored.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerProgress {
    pub model: String,
    /// Position within the selected-model list, used by the synthetic
    /// progress estimator to give each worker a distinct curve
    pub index: usize,
    pub state: WorkerState,
    pub stage: String,
    pub elapsed_secs: f64,
    /// Displayed completion percentage, non-decreasing while running
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ResultSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ModelResult>,
    /// Set once the server has reported an authoritative elapsed value;
    /// local ticks stop overwriting elapsed after that
    #[serde(skip)]
    pub server_elapsed: bool,
    #[serde(skip)]
    pub started_at: Option<Instant>,
}

impl WorkerProgress {
    pub fn new(model: impl Into<String>, index: usize) -> Self {
        Self {
            model: model.into(),
            index,
            state: WorkerState::Pending,
            stage: STAGE_QUEUED.to_string(),
            elapsed_secs: 0.0,
            progress: 0,
            summary: None,
            result: None,
            server_elapsed: false,
            started_at: None,
        }
    }

    /// Optimistic transition to Running at run start, before any server event
    pub fn begin(&mut self, now: Instant) {
        if self.state.is_terminal() {
            return;
        }
        self.state = WorkerState::Running;
        self.stage = STAGE_STARTING.to_string();
        self.started_at = Some(now);
    }

    /// Apply an authoritative progress tick from the server
    pub fn apply_progress(&mut self, stage: &str, elapsed_secs: f64, progress: u8) {
        if self.state.is_terminal() {
            return;
        }
        self.state = WorkerState::Running;
        self.stage = stage.to_string();
        self.elapsed_secs = elapsed_secs;
        self.server_elapsed = true;
        // Displayed progress never regresses
        self.progress = self.progress.max(progress.min(100));
    }

    /// Advance wall-clock elapsed time on a local tick; server-reported
    /// elapsed takes precedence once seen
    pub fn apply_tick(&mut self, now: Instant) {
        if self.state != WorkerState::Running {
            return;
        }
        if !self.server_elapsed {
            if let Some(started) = self.started_at {
                self.elapsed_secs = now.duration_since(started).as_secs_f64();
            }
        }
    }

    /// Raise displayed progress to at least the given estimate
    pub fn raise_progress(&mut self, estimate: u8) {
        if self.state != WorkerState::Running {
            return;
        }
        self.progress = self.progress.max(estimate.min(100));
    }

    /// Terminal transition on successful completion
    pub fn complete(
        &mut self,
        elapsed_secs: f64,
        summary: ResultSummary,
        result: Option<ModelResult>,
    ) {
        if self.state.is_terminal() {
            return;
        }
        self.state = WorkerState::Completed;
        self.stage = STAGE_DONE.to_string();
        self.elapsed_secs = elapsed_secs;
        self.server_elapsed = true;
        self.progress = 100;
        self.summary = Some(summary);
        self.result = result;
    }

    /// Terminal transition on failure (server error, user stop, or timeout)
    pub fn fail(&mut self, stage_label: &str) {
        if self.state.is_terminal() {
            return;
        }
        self.state = WorkerState::Failed;
        self.stage = stage_label.to_string();
    }
}

// ============================================================================
// Tests
// ============================================================================
