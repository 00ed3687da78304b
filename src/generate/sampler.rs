//! Process resource sampling during generation

use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use sysinfo::System;
use tracing::debug;

/// CPU and memory observed while a sampler was running
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_avg_percent: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_peak_percent: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rss_peak_bytes: Option<u64>,
    pub samples: usize,
}

#[derive(Default)]
struct Accumulator {
    cpu_total: f32,
    cpu_peak: f32,
    rss_peak: u64,
    samples: usize,
}

impl Accumulator {
    fn record(&mut self, cpu: f32, rss: u64) {
        self.cpu_total += cpu;
        self.cpu_peak = self.cpu_peak.max(cpu);
        self.rss_peak = self.rss_peak.max(rss);
        self.samples += 1;
    }

    fn finish(self) -> ResourceUsage {
        if self.samples == 0 {
            return ResourceUsage::default();
        }
        ResourceUsage {
            cpu_avg_percent: Some(self.cpu_total / self.samples as f32),
            cpu_peak_percent: Some(self.cpu_peak),
            rss_peak_bytes: Some(self.rss_peak),
            samples: self.samples,
        }
    }
}

/// Samples the current process on a plain thread until stopped.
///
/// Any failure to start or sample yields empty stats.
pub struct ResourceSampler {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<ResourceUsage>>,
}

impl ResourceSampler {
    /// Start sampling every `interval`
    pub fn start(interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel::<()>();

        let spawned = std::thread::Builder::new()
            .name("resource-sampler".to_string())
            .spawn(move || {
                let mut acc = Accumulator::default();
                let Ok(pid) = sysinfo::get_current_pid() else {
                    return acc.finish();
                };
                let mut sys = System::new();

                loop {
                    if sys.refresh_process(pid) {
                        if let Some(process) = sys.process(pid) {
                            acc.record(process.cpu_usage(), process.memory());
                        }
                    }

                    match rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }

                acc.finish()
            });

        match spawned {
            Ok(handle) => Self {
                stop: Some(tx),
                handle: Some(handle),
            },
            Err(e) => {
                debug!(error = %e, "Resource sampler unavailable");
                Self {
                    stop: None,
                    handle: None,
                }
            }
        }
    }

    /// Stop the thread, wait for it, and return what it saw
    pub fn stop(mut self) -> ResourceUsage {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => ResourceUsage::default(),
        }
    }

    /// `stop` for async callers; the join runs on the blocking pool
    pub async fn finish(self) -> ResourceUsage {
        tokio::task::spawn_blocking(move || self.stop())
            .await
            .unwrap_or_default()
    }
}

impl Drop for ResourceSampler {
    fn drop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_stats() {
        let mut acc = Accumulator::default();
        acc.record(10.0, 100);
        acc.record(30.0, 300);
        acc.record(20.0, 200);

        let usage = acc.finish();
        assert_eq!(usage.samples, 3);
        assert_eq!(usage.cpu_avg_percent, Some(20.0));
        assert_eq!(usage.cpu_peak_percent, Some(30.0));
        assert_eq!(usage.rss_peak_bytes, Some(300));
    }

    #[test]
    fn test_empty_accumulator_has_no_stats() {
        let usage = Accumulator::default().finish();
        assert_eq!(usage, ResourceUsage::default());
    }

    #[test]
    fn test_sampler_stops_and_joins() {
        let sampler = ResourceSampler::start(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(30));
        let usage = sampler.stop();
        // Sampling may be unsupported on the host; stats are then empty
        if usage.samples > 0 {
            assert!(usage.rss_peak_bytes.is_some());
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_finish_leaves_runtime_free() {
        let sampler = ResourceSampler::start(Duration::from_millis(5));
        let ticker = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            true
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let usage = sampler.finish().await;
        assert!(ticker.await.unwrap());
        if usage.samples > 0 {
            assert!(usage.cpu_peak_percent.is_some());
        }
    }
}
