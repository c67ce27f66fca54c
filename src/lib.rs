// Streaming progress coordinator for side-by-side deep-research model
// comparisons: one long-lived event stream in, per-worker progress state
// and a consolidated session out.

// Module declarations
pub mod config;
pub mod coordinator;
pub mod models;
pub mod stores;
pub mod stream;
pub mod transport;

// Re-export the surface most callers need
pub use coordinator::{Coordinator, RunSnapshot, RunTiming, RUN_TIMEOUT, TICK_INTERVAL};
pub use models::{
    CompareRequest, MetricsSummary, ModelMetrics, ModelResult, ResultSummary, Session,
    StageTimings, WorkerProgress, WorkerState,
};
pub use stores::{MemoryHistoryStore, NullHistoryStore, SessionHistoryStore};
pub use transport::{EventStreamTransport, HttpTransport, TransportError};
