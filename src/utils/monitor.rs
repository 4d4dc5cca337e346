use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// 本行程的 CPU 與記憶體取樣
#[derive(Debug, Clone, Copy)]
pub struct ProcessSample {
    pub cpu_percent: f32,
    pub rss_mb: u64,
    pub peak_rss_mb: u64,
    pub uptime: Duration,
}

/// Periodic resource logging for long capture runs (`run --monitor`).
pub struct SystemMonitor {
    system: System,
    pid: Option<Pid>,
    started: Instant,
    peak_rss_mb: u64,
    enabled: bool,
}

impl SystemMonitor {
    pub fn new(enabled: bool) -> Self {
        Self {
            system: System::new(),
            pid: enabled.then(|| sysinfo::get_current_pid().ok()).flatten(),
            started: Instant::now(),
            peak_rss_mb: 0,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn sample(&mut self) -> Option<ProcessSample> {
        let pid = self.pid?;
        // cpu_usage 需要兩次刷新之間的差值，第一次取樣為 0
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
        let process = self.system.process(pid)?;
        let rss_mb = process.memory() / 1024 / 1024;
        self.peak_rss_mb = self.peak_rss_mb.max(rss_mb);

        Some(ProcessSample {
            cpu_percent: process.cpu_usage(),
            rss_mb,
            peak_rss_mb: self.peak_rss_mb,
            uptime: self.started.elapsed(),
        })
    }

    pub fn log_stats(&mut self, phase: &str) {
        if let Some(sample) = self.sample() {
            tracing::info!(
                "📊 {} - CPU: {:.1}%, RSS: {}MB, Peak: {}MB, Uptime: {:?}",
                phase,
                sample.cpu_percent,
                sample.rss_mb,
                sample.peak_rss_mb,
                sample.uptime
            );
        }
    }

    pub fn log_final_stats(&mut self) {
        if let Some(sample) = self.sample() {
            tracing::info!(
                "📊 Final - Uptime: {:?}, Peak RSS: {}MB",
                sample.uptime,
                sample.peak_rss_mb
            );
        }
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}
