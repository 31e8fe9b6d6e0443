use num_traits::ToPrimitive;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

const MAX_SORTED_DURATIONS: usize = 1000;

fn to_f64(value: u64) -> f64 {
    value.to_f64().unwrap_or(f64::MAX)
}

fn usize_to_f64(value: usize) -> f64 {
    value.to_f64().unwrap_or(f64::MAX)
}

fn percentile(sorted_data: &[u64], p: u8) -> u64 {
    if sorted_data.is_empty() {
        return 0;
    }

    // Integer math avoids float-to-int truncation.
    let clamped = u128::from(p.min(100));
    let len = sorted_data.len() as u128;
    let raw_index = (len * clamped).div_ceil(100);
    let safe_index = raw_index.saturating_sub(1).min(len.saturating_sub(1));
    let index = usize::try_from(safe_index).unwrap_or(sorted_data.len().saturating_sub(1));

    sorted_data.get(index).copied().unwrap_or_default()
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct MetricsStats {
    pub total_calls: u64,
    pub failed_calls: u64,
    pub success_rate: f64,
    pub total_attempts: u64,
    pub retries: u64,
    pub circuit_rejections: u64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
}

#[derive(Default)]
struct Counters {
    total_calls: u64,
    failed_calls: u64,
    total_attempts: u64,
    retries: u64,
    circuit_rejections: u64,
}

/// Call outcomes for one target. Never consulted for control flow.
#[derive(Clone, Default)]
pub struct ClientMetrics {
    counters: Arc<RwLock<Counters>>,
    call_durations_ms: Arc<RwLock<VecDeque<u64>>>,
}

impl ClientMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_call(&self, success: bool, attempts: u32, duration_ms: u64) {
        {
            let mut counters = self.counters.write().await;
            counters.total_calls += 1;
            if !success {
                counters.failed_calls += 1;
            }
            counters.total_attempts += u64::from(attempts);
            counters.retries += u64::from(attempts.saturating_sub(1));
        }

        let mut durations = self.call_durations_ms.write().await;
        durations.push_back(duration_ms);
        if durations.len() > MAX_SORTED_DURATIONS {
            durations.pop_front();
        }
    }

    pub async fn record_rejection(&self) {
        self.counters.write().await.circuit_rejections += 1;
    }

    pub async fn get_stats(&self) -> MetricsStats {
        let (total_calls, failed_calls, total_attempts, retries, circuit_rejections) = {
            let c = self.counters.read().await;
            (
                c.total_calls,
                c.failed_calls,
                c.total_attempts,
                c.retries,
                c.circuit_rejections,
            )
        };

        let success_rate = if total_calls > 0 {
            to_f64(total_calls - failed_calls) / to_f64(total_calls) * 100.0
        } else {
            0.0
        };

        let durations = self.call_durations_ms.read().await;
        let avg_latency_ms = if durations.is_empty() {
            0.0
        } else {
            to_f64(durations.iter().sum::<u64>()) / usize_to_f64(durations.len())
        };
        let mut sorted: Vec<u64> = durations.iter().copied().collect();
        drop(durations);
        sorted.sort_unstable();

        MetricsStats {
            total_calls,
            failed_calls,
            success_rate,
            total_attempts,
            retries,
            circuit_rejections,
            avg_latency_ms,
            p50_latency_ms: percentile(&sorted, 50),
            p95_latency_ms: percentile(&sorted, 95),
            p99_latency_ms: percentile(&sorted, 99),
        }
    }
}
