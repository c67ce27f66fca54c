// Synthetic progress estimation for the quiet interval before the first
// server progress tick arrives

/// Ceiling for synthetic progress; the estimate must never be mistaken for
/// real progress
pub const SYNTHETIC_PROGRESS_CAP: u8 = 15;

/// Per-worker onset delay in seconds: workers start visibly diverging
/// instead of showing identical percentages while genuinely idle
fn onset_delay(worker_index: usize) -> f64 {
    2.0 + 1.2 * worker_index as f64
}

/// Per-worker growth rate in percent per second
fn growth_rate(worker_index: usize) -> f64 {
    0.35 + 0.12 * worker_index as f64
}

/// Estimate progress for a worker that has not yet received a server tick
///
/// Pure function of elapsed time and the worker's position in the run;
/// monotonically non-decreasing in elapsed time and capped at
/// [`SYNTHETIC_PROGRESS_CAP`].
pub fn synthetic_progress(elapsed_secs: f64, worker_index: usize) -> u8 {
    let active = elapsed_secs - onset_delay(worker_index);
    if active <= 0.0 {
        return 0;
    }
    let estimate = active * growth_rate(worker_index);
    (estimate.floor() as u64).min(SYNTHETIC_PROGRESS_CAP as u64) as u8
}
