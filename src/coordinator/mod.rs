// Session coordinator: owns the per-worker state machines, the
// cancellation/timeout policy, early-result accumulation, and final session
// assembly for one comparison run at a time.
//
// All run state lives behind a single mutex and is mutated only by the run
// task and the coordinator's control surface; stream frames are processed
// strictly in arrival order.

pub mod estimator;

use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
// tokio's Instant, so local ticks line up with the runtime clock (and with
// paused time in tests); it falls back to the system clock outside a runtime
use tokio::time::{interval, sleep_until, Duration, Instant, MissedTickBehavior};

use crate::models::{
    CompareRequest, MetricsSummary, ModelResult, Session, StageTimings, WorkerProgress,
    STAGE_ERROR, STAGE_STOPPED, STAGE_STREAM_ENDED, STAGE_TIMED_OUT,
};
use crate::stores::SessionHistoryStore;
use crate::stream::events::clamp_progress;
use crate::stream::{interpret, FrameDecoder, StreamEvent};
use crate::transport::EventStreamTransport;

use estimator::synthetic_progress;

/// Hard ceiling: a run with no terminal signal for this long is cancelled
pub const RUN_TIMEOUT: Duration = Duration::from_secs(360);

/// Local estimator tick period
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Timing policy for a run; configurable so deployments behind slow
/// backends can widen the ceiling without a rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTiming {
    /// Hard ceiling from run start to forced cancellation; covers opening
    /// the stream as well as consuming it
    pub run_timeout: Duration,
    /// Local estimator tick period
    pub tick_interval: Duration,
}

impl Default for RunTiming {
    fn default() -> Self {
        Self {
            run_timeout: RUN_TIMEOUT,
            tick_interval: TICK_INTERVAL,
        }
    }
}

/// Recover the inner value of a poisoned mutex; run state must stay
/// observable even if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Run State
// ============================================================================

/// Mutable aggregate of one comparison run
#[derive(Debug, Default)]
pub struct RunState {
    pub query: String,
    pub running: bool,
    /// Server-acknowledged stream session id
    pub session_id: Option<String>,
    /// Single run-level error string; worker failures do not land here
    pub error: Option<String>,
    /// Finalized session, server-pushed or locally assembled
    pub session: Option<Session>,
    /// Last fetched aggregate metrics
    pub metrics: Option<MetricsSummary>,
    workers: HashMap<String, WorkerProgress>,
    /// Selected-model order, preserved for display and estimator indexing
    order: Vec<String>,
    /// Early results keyed by model: at most one result per worker, newer
    /// results replace older ones
    results: HashMap<String, ModelResult>,
}

impl RunState {
    /// Reset to a fresh run for the given query and model set; every worker
    /// starts Pending and is optimistically moved to Running
    fn init(&mut self, query: &str, models: &[String], now: Instant) {
        self.clear();
        self.query = query.to_string();
        self.running = true;
        for (index, model) in models.iter().enumerate() {
            let mut worker = WorkerProgress::new(model.clone(), index);
            worker.begin(now);
            self.workers.insert(model.clone(), worker);
            self.order.push(model.clone());
        }
    }

    fn clear(&mut self) {
        *self = RunState::default();
    }

    pub fn worker(&self, model: &str) -> Option<&WorkerProgress> {
        self.workers.get(model)
    }

    /// Workers in selected-model order
    pub fn workers_in_order(&self) -> Vec<&WorkerProgress> {
        self.order
            .iter()
            .filter_map(|model| self.workers.get(model))
            .collect()
    }

    /// Accumulated early results in selected-model order
    pub fn early_results(&self) -> Vec<ModelResult> {
        self.order
            .iter()
            .filter_map(|model| self.results.get(model).cloned())
            .collect()
    }

    /// Dispatch one decoded event; returns true when the run is finalized
    fn apply_event(&mut self, event: StreamEvent) -> bool {
        match event {
            StreamEvent::SessionStart { session_id } => {
                log::info!("Comparison stream acknowledged, session {}", session_id);
                self.session_id = Some(session_id);
            }
            StreamEvent::ModelProgress {
                model,
                stage,
                elapsed,
                progress,
            } => match self.workers.get_mut(&model) {
                Some(worker) => worker.apply_progress(&stage, elapsed, clamp_progress(progress)),
                None => log::warn!("Progress event for unselected model '{}'", model),
            },
            StreamEvent::ModelComplete {
                model,
                elapsed,
                summary,
                result,
            } => {
                let result = result.unwrap_or_else(|| ModelResult {
                    model: model.clone(),
                    duration: summary.duration,
                    stages: StageTimings::default(),
                    sources_found: summary.sources_found,
                    word_count: summary.word_count,
                    success: true,
                    error: None,
                    report: String::new(),
                    tools_used: Vec::new(),
                });
                match self.workers.get_mut(&model) {
                    Some(worker) => {
                        worker.complete(elapsed, summary, Some(result.clone()));
                        // Upsert: a newer result for the same worker replaces
                        // the older entry
                        self.results.insert(model, result);
                    }
                    None => log::warn!("Completion event for unselected model '{}'", model),
                }
            }
            StreamEvent::ModelError {
                model,
                stage,
                elapsed,
                message,
                ..
            } => match self.workers.get_mut(&model) {
                Some(worker) => {
                    if let Some(elapsed) = elapsed {
                        worker.elapsed_secs = elapsed;
                        worker.server_elapsed = true;
                    }
                    let label = stage
                        .or(message)
                        .unwrap_or_else(|| STAGE_ERROR.to_string());
                    worker.fail(&label);
                }
                None => log::warn!("Error event for unselected model '{}'", model),
            },
            StreamEvent::Error { message } => {
                // Stream-level failure: surfaces as the run error but does
                // not fail individual workers; the run keeps consuming
                log::warn!("Stream-level error: {}", message);
                self.error = Some(message);
            }
            StreamEvent::SessionComplete { session } => {
                log::info!("Run finalized by server, session {}", session.id);
                self.session = Some(session);
                return true;
            }
            StreamEvent::Heartbeat | StreamEvent::Unknown => {}
        }
        false
    }

    /// One local estimator tick: advance wall-clock elapsed and raise each
    /// running worker to its synthetic estimate
    fn apply_tick(&mut self, now: Instant) {
        for model in &self.order {
            if let Some(worker) = self.workers.get_mut(model) {
                worker.apply_tick(now);
                worker.raise_progress(synthetic_progress(worker.elapsed_secs, worker.index));
            }
        }
    }

    /// Force every non-terminal worker into Failed with the given stage label
    fn fail_non_terminal(&mut self, label: &str) {
        for worker in self.workers.values_mut() {
            worker.fail(label);
        }
    }
}

/// Read-only snapshot of the current run, for observers
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSnapshot {
    pub query: String,
    pub running: bool,
    pub session_id: Option<String>,
    pub error: Option<String>,
    pub workers: Vec<WorkerProgress>,
    pub early_results: Vec<ModelResult>,
    pub session: Option<Session>,
    pub metrics: Option<MetricsSummary>,
}

// ============================================================================
// Coordinator
// ============================================================================

struct RunHandle {
    cancel: Arc<AtomicBool>,
    notify: Arc<Notify>,
    task: Option<tokio::task::JoinHandle<()>>,
}

/// Single control surface for comparison runs
///
/// Owns at most one live stream; starting a new run stops the previous one
/// first. Public operations never fail outward: all failures are absorbed
/// into the observable run state.
pub struct Coordinator<T: EventStreamTransport> {
    transport: Arc<T>,
    history: Arc<dyn SessionHistoryStore>,
    timing: RunTiming,
    state: Arc<Mutex<RunState>>,
    current: Mutex<Option<RunHandle>>,
}

impl<T: EventStreamTransport> Coordinator<T> {
    pub fn new(transport: T, history: Arc<dyn SessionHistoryStore>) -> Self {
        Self {
            transport: Arc::new(transport),
            history,
            timing: RunTiming::default(),
            state: Arc::new(Mutex::new(RunState::default())),
            current: Mutex::new(None),
        }
    }

    /// Override the default timeout/tick policy
    pub fn with_timing(mut self, timing: RunTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Start a comparison run, replacing any previous run's state
    ///
    /// Validation failures are recorded in the observable error field and no
    /// stream is opened.
    pub async fn start(&self, request: CompareRequest) {
        self.shutdown_current().await;

        if let Err(message) = request.validate() {
            log::warn!("Rejecting comparison run: {}", message);
            let mut state = lock(&self.state);
            state.clear();
            state.query = request.query.clone();
            state.error = Some(message);
            return;
        }

        lock(&self.state).init(&request.query, &request.models, Instant::now());

        let cancel = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let task = tokio::spawn(run_stream(
            Arc::clone(&self.transport),
            Arc::clone(&self.state),
            Arc::clone(&self.history),
            Arc::clone(&cancel),
            Arc::clone(&notify),
            self.timing,
            request,
        ));

        *lock(&self.current) = Some(RunHandle {
            cancel,
            notify,
            task: Some(task),
        });
    }

    /// Cancel the in-flight run; idempotent and never a user-visible error
    ///
    /// Every non-terminal worker transitions to Failed with a "stopped by
    /// user" label; events already buffered are not processed afterwards.
    pub fn stop(&self) {
        {
            let mut current = lock(&self.current);
            if let Some(handle) = current.as_mut() {
                if !handle.cancel.swap(true, Ordering::SeqCst) {
                    handle.notify.notify_one();
                }
            }
        }

        let mut state = lock(&self.state);
        if state.running {
            state.fail_non_terminal(STAGE_STOPPED);
            state.running = false;
        }
    }

    /// Stop the run and clear all run state
    pub fn reset(&self) {
        self.stop();
        lock(&self.state).clear();
    }

    /// Await completion of the current run task, if any
    pub async fn wait(&self) {
        let task = lock(&self.current)
            .as_mut()
            .and_then(|handle| handle.task.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Snapshot of the observable run state
    pub fn snapshot(&self) -> RunSnapshot {
        let state = lock(&self.state);
        RunSnapshot {
            query: state.query.clone(),
            running: state.running,
            session_id: state.session_id.clone(),
            error: state.error.clone(),
            workers: state
                .workers_in_order()
                .into_iter()
                .cloned()
                .collect(),
            early_results: state.early_results(),
            session: state.session.clone(),
            metrics: state.metrics.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn error(&self) -> Option<String> {
        lock(&self.state).error.clone()
    }

    /// Cancel and join the previous run so exactly one stream is ever open
    async fn shutdown_current(&self) {
        let task = {
            let mut current = lock(&self.current);
            match current.take() {
                Some(mut handle) => {
                    handle.cancel.store(true, Ordering::SeqCst);
                    handle.notify.notify_one();
                    handle.task.take()
                }
                None => None,
            }
        };
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

// ============================================================================
// Run Task
// ============================================================================

/// Why the consume loop ended
enum RunEnd {
    /// Stream closed or server finalized the run
    Stream,
    Cancelled,
    TimedOut,
}

async fn run_stream<T: EventStreamTransport>(
    transport: Arc<T>,
    state: Arc<Mutex<RunState>>,
    history: Arc<dyn SessionHistoryStore>,
    cancel: Arc<AtomicBool>,
    notify: Arc<Notify>,
    timing: RunTiming,
    request: CompareRequest,
) {
    let query = request.query.clone();

    // The ceiling starts counting before the stream is opened: a backend
    // that never finishes the handshake must not strand the run task
    let deadline = sleep_until(Instant::now() + timing.run_timeout);
    tokio::pin!(deadline);

    let open = transport.open_stream(request);
    tokio::pin!(open);
    let mut stream = tokio::select! {
        _ = notify.notified() => {
            let mut state = lock(&state);
            state.fail_non_terminal(STAGE_STOPPED);
            state.running = false;
            return;
        }
        _ = &mut deadline => {
            log::warn!(
                "Opening the comparison stream exceeded the {}s run ceiling",
                timing.run_timeout.as_secs()
            );
            let mut state = lock(&state);
            state.error = Some("Timed out opening comparison stream".to_string());
            state.fail_non_terminal(STAGE_TIMED_OUT);
            state.running = false;
            return;
        }
        opened = &mut open => match opened {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("Failed to open comparison stream: {}", e);
                let mut state = lock(&state);
                state.error = Some(format!("Failed to open comparison stream: {}", e));
                state.fail_non_terminal(STAGE_ERROR);
                state.running = false;
                return;
            }
        }
    };

    let mut decoder = FrameDecoder::new();
    let mut ticker = interval(timing.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let end = 'consume: loop {
        tokio::select! {
            _ = notify.notified() => {
                break 'consume RunEnd::Cancelled;
            }
            _ = &mut deadline => {
                log::warn!(
                    "Run exceeded {}s without a terminal signal",
                    timing.run_timeout.as_secs()
                );
                break 'consume RunEnd::TimedOut;
            }
            _ = ticker.tick() => {
                if cancel.load(Ordering::SeqCst) {
                    break 'consume RunEnd::Cancelled;
                }
                lock(&state).apply_tick(Instant::now());
            }
            chunk = stream.next() => {
                if cancel.load(Ordering::SeqCst) {
                    break 'consume RunEnd::Cancelled;
                }
                match chunk {
                    None => {
                        // Flush a final unterminated record before closing
                        if let Some(payload) = decoder.finish() {
                            if let Some(event) = interpret(&payload) {
                                lock(&state).apply_event(event);
                            }
                        }
                        break 'consume RunEnd::Stream;
                    }
                    Some(Err(e)) => {
                        log::error!("Comparison stream failed: {}", e);
                        lock(&state).error = Some(format!("Stream error: {}", e));
                        break 'consume RunEnd::Stream;
                    }
                    Some(Ok(text)) => {
                        for payload in decoder.push(&text) {
                            // Cancellation wins over already-buffered frames
                            if cancel.load(Ordering::SeqCst) {
                                break 'consume RunEnd::Cancelled;
                            }
                            if let Some(event) = interpret(&payload) {
                                if lock(&state).apply_event(event) {
                                    break 'consume RunEnd::Stream;
                                }
                            }
                        }
                    }
                }
            }
        }
    };

    // Release the transport on every exit path
    drop(stream);

    let session = {
        let mut state = lock(&state);
        match end {
            RunEnd::TimedOut => state.fail_non_terminal(STAGE_TIMED_OUT),
            RunEnd::Cancelled => state.fail_non_terminal(STAGE_STOPPED),
            // Workers stranded without a terminal event when the stream ends
            // are force-failed rather than left Running forever
            RunEnd::Stream => state.fail_non_terminal(STAGE_STREAM_ENDED),
        }
        if state.session.is_none() && matches!(end, RunEnd::Stream) {
            let results = state.early_results();
            if !results.is_empty() {
                state.session = Some(Session::from_results(query, results));
            }
        }
        state.running = false;
        state.session.clone()
    };

    if let Some(session) = session {
        history.persist(&session);
    }

    // Best-effort metrics refresh after normal termination only
    if matches!(end, RunEnd::Stream) {
        match transport.fetch_metrics().await {
            Ok(metrics) => lock(&state).metrics = Some(metrics),
            Err(e) => log::warn!("Metrics refresh failed: {}", e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
