use std::time::Duration;

use serde::Serialize;
use sysinfo::System;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// CPU and memory of the load-generating host over the timed phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostUsage {
    pub samples: usize,
    pub avg_cpu_percent: f32,
    pub max_cpu_percent: f32,
    pub max_memory_mb: f64,
}

pub struct HostSampler {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<HostUsage>,
}

impl HostSampler {
    /// Must be called from within a tokio runtime.
    pub fn start(every: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut sys = System::new();
            // cpu usage is a delta; the first refresh only primes it
            sys.refresh_cpu();
            let mut usage = HostUsage::default();
            let mut cpu_sum = 0.0_f32;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep(every) => {
                        sys.refresh_cpu();
                        sys.refresh_memory();
                        let cpu = sys.global_cpu_info().cpu_usage();
                        let mem_mb = sys.used_memory() as f64 / 1024.0 / 1024.0;
                        usage.samples += 1;
                        cpu_sum += cpu;
                        usage.max_cpu_percent = usage.max_cpu_percent.max(cpu);
                        usage.max_memory_mb = usage.max_memory_mb.max(mem_mb);
                    }
                }
            }
            if usage.samples > 0 {
                usage.avg_cpu_percent = cpu_sum / usage.samples as f32;
            }
            usage
        });
        Self { stop_tx, handle }
    }

    /// `None` when no sample was taken (very short runs) or the sampler task died.
    pub async fn stop(self) -> Option<HostUsage> {
        let _ = self.stop_tx.send(());
        match self.handle.await {
            Ok(usage) if usage.samples > 0 => Some(usage),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(target: "obs", "host sampler failed: {}", e);
                None
            }
        }
    }
}
