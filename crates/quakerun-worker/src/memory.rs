//! Peak memory sampling while a task runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Samples the process's physical memory in the background and keeps the
/// highest value seen.
pub struct PeakMemorySampler {
    peak: Arc<AtomicU64>,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeakMemorySampler {
    /// Take a first sample and keep sampling every `interval`.
    pub fn start(interval: Duration) -> Self {
        let peak = Arc::new(AtomicU64::new(0));
        let stop = CancellationToken::new();
        update_peak(&peak);

        let handle = tokio::spawn({
            let peak = peak.clone();
            let stop = stop.clone();
            async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => update_peak(&peak),
                    }
                }
            }
        });

        Self { peak, stop, handle }
    }

    /// Stop sampling and return the peak in MB.
    pub async fn finish(self) -> f64 {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            debug!(error = %e, "Memory sampler ended abnormally");
        }
        update_peak(&self.peak);
        self.peak.load(Ordering::Relaxed) as f64 / BYTES_PER_MB
    }
}

fn update_peak(peak: &AtomicU64) {
    let Some(stats) = memory_stats::memory_stats() else {
        return;
    };
    let current = stats.physical_mem as u64;

    let mut seen = peak.load(Ordering::Relaxed);
    while current > seen {
        match peak.compare_exchange_weak(seen, current, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => seen = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peak_is_non_negative() {
        let sampler = PeakMemorySampler::start(Duration::from_millis(5));
        let buf = vec![1u8; 4 * 1024 * 1024];
        tokio::time::sleep(Duration::from_millis(20)).await;
        let peak = sampler.finish().await;

        assert!(buf.iter().all(|b| *b == 1));
        assert!(peak >= 0.0);
    }

    #[test]
    fn test_peak_only_grows() {
        let peak = AtomicU64::new(u64::MAX);
        update_peak(&peak);
        assert_eq!(peak.load(Ordering::Relaxed), u64::MAX);
    }
}
