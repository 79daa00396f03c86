//! QuakeRun Controller Library
//!
//! This crate provides the controller side of QuakeRun: the worker pool,
//! the task dispatcher with retries and deadlines, the liveness prober,
//! execution metrics, result assembly and the HTTP registration API.

pub mod assembler;
pub mod calculation;
pub mod config;
pub mod dispatcher;
pub mod http;
pub mod metrics;
pub mod pool;
pub mod prober;
pub mod state;
pub mod transport;

pub use assembler::ResultAssembler;
pub use config::Config;
pub use dispatcher::{DispatchError, Dispatcher, ResultSink, TaskOutcome, TaskTicket};
pub use metrics::MetricsAggregator;
pub use pool::WorkerPool;
pub use prober::LivenessProber;
pub use state::AppState;
pub use transport::{HttpTransport, TransportError, WorkerTransport};
