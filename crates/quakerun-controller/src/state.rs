//! Shared application state.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::assembler::ResultAssembler;
use crate::config::Config;
use crate::dispatcher::{Dispatcher, ResultSink};
use crate::metrics::MetricsAggregator;
use crate::pool::WorkerPool;
use crate::prober::LivenessProber;
use crate::transport::{HttpTransport, TransportError, WorkerTransport};

/// Everything the controller's tasks and HTTP handlers share.
pub struct AppState {
    pub config: Config,

    /// Registered workers.
    pub pool: Arc<WorkerPool>,

    pub dispatcher: Dispatcher,

    /// Per-operation duration statistics.
    pub metrics: Arc<MetricsAggregator>,

    /// Composite report under construction.
    pub assembler: Arc<ResultAssembler>,

    transport: Arc<dyn WorkerTransport>,
}

impl AppState {
    /// Create state talking to workers over HTTP.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: Config) -> Result<Arc<Self>, TransportError> {
        let transport = HttpTransport::new(config.request_timeout)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create state on top of an arbitrary transport.
    pub fn with_transport(config: Config, transport: Arc<dyn WorkerTransport>) -> Arc<Self> {
        let pool = WorkerPool::new(config.probe_failure_threshold);
        let metrics = MetricsAggregator::new();
        let assembler = ResultAssembler::new(metrics.clone(), config.top_k_sources);

        let sinks: Vec<Arc<dyn ResultSink>> = vec![metrics.clone(), assembler.clone()];
        let dispatcher = Dispatcher::start(pool.clone(), transport.clone(), sinks, &config);

        Arc::new(Self {
            config,
            pool,
            dispatcher,
            metrics,
            assembler,
            transport,
        })
    }

    /// Spawn the liveness prober; it runs until `shutdown` is cancelled.
    pub fn spawn_prober(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let prober = LivenessProber::new(self.pool.clone(), self.transport.clone(), &self.config);
        tokio::spawn(prober.run(shutdown))
    }
}
