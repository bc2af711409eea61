//! Built-in host and process metrics, read from `/proc`. On platforms
//! without it the producer reports nothing.

use super::producer::MetricProducer;
use crate::domain::Metric;
use chrono::Utc;
use parking_lot::Mutex;
use std::path::Path;
use tracing::debug;

pub const AVAILABLE_MEMORY: &str = "\\Memory\\Available Bytes";
pub const PROCESS_PRIVATE_BYTES: &str = "\\Process(??APP_WIN32_PROC??)\\Private Bytes";
pub const PROCESSOR_TIME: &str = "\\Processor(_Total)\\% Processor Time";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    total: u64,
    idle: u64,
}

#[derive(Debug, Default)]
pub struct StandardMetricsProducer {
    last_cpu: Mutex<Option<CpuTimes>>,
}

impl StandardMetricsProducer {
    pub fn new() -> Self {
        Self::default()
    }

    fn processor_time(&self) -> Option<f64> {
        let current = parse_cpu_times(&read_proc("/proc/stat")?)?;
        let previous = self.last_cpu.lock().replace(current)?;
        cpu_percent(previous, current)
    }
}

impl MetricProducer for StandardMetricsProducer {
    fn get_metrics(&self) -> Vec<Metric> {
        let now = Utc::now();
        let mut metrics = Vec::with_capacity(3);

        if let Some(bytes) = read_proc("/proc/meminfo").and_then(|s| parse_meminfo_available(&s)) {
            metrics.push(Metric::gauge(AVAILABLE_MEMORY, bytes as f64, now));
        }
        if let Some(bytes) = read_proc("/proc/self/status").and_then(|s| parse_private_bytes(&s)) {
            metrics.push(Metric::gauge(PROCESS_PRIVATE_BYTES, bytes as f64, now));
        }
        // The first sample only primes the counters.
        if let Some(percent) = self.processor_time() {
            metrics.push(Metric::gauge(PROCESSOR_TIME, percent, now));
        }

        metrics
    }
}

fn read_proc(path: &str) -> Option<String> {
    let path = Path::new(path);
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            debug!("Standard metric source {} unavailable: {e}", path.display());
            None
        }
    }
}

fn kib_field(content: &str, field: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let rest = line.strip_prefix(field)?.strip_prefix(':')?;
        let kib: u64 = rest.split_whitespace().next()?.parse().ok()?;
        Some(kib * 1024)
    })
}

fn parse_meminfo_available(content: &str) -> Option<u64> {
    kib_field(content, "MemAvailable")
}

/// Anonymous resident memory is the closest match to private bytes; older
/// kernels only expose the full resident set.
fn parse_private_bytes(content: &str) -> Option<u64> {
    kib_field(content, "RssAnon").or_else(|| kib_field(content, "VmRSS"))
}

fn parse_cpu_times(content: &str) -> Option<CpuTimes> {
    let line = content.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    // guest time is already included in user time
    let total: u64 = fields.iter().take(8).sum();
    Some(CpuTimes { total, idle })
}

fn cpu_percent(previous: CpuTimes, current: CpuTimes) -> Option<f64> {
    let total = current.total.checked_sub(previous.total)?;
    let idle = current.idle.checked_sub(previous.idle)?;
    if total == 0 {
        return None;
    }
    Some(100.0 * (1.0 - idle as f64 / total as f64))
}
