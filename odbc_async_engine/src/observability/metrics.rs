use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const MAX_LATENCY_SAMPLES: usize = 1000;

lazy_static::lazy_static! {
    static ref METRICS: Arc<Metrics> = Arc::new(Metrics::new());
    static ref GAUGES: HandleGauges = HandleGauges::default();
}

/// Process-wide metrics shared by every environment.
pub fn global_metrics() -> Arc<Metrics> {
    Arc::clone(&METRICS)
}

pub fn handle_gauges() -> &'static HandleGauges {
    &GAUGES
}

#[derive(Debug, Clone)]
pub struct QueryMetrics {
    pub query_count: u64,
    pub total_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub latency_samples: VecDeque<Duration>,
}

impl Default for QueryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryMetrics {
    pub fn new() -> Self {
        Self {
            query_count: 0,
            total_latency: Duration::ZERO,
            min_latency: Duration::MAX,
            max_latency: Duration::ZERO,
            latency_samples: VecDeque::new(),
        }
    }

    pub fn record_query(&mut self, latency: Duration) {
        self.query_count += 1;
        self.total_latency += latency;
        self.min_latency = self.min_latency.min(latency);
        self.max_latency = self.max_latency.max(latency);

        self.latency_samples.push_back(latency);
        if self.latency_samples.len() > MAX_LATENCY_SAMPLES {
            self.latency_samples.pop_front();
        }
    }

    pub fn average_latency(&self) -> Duration {
        if self.query_count == 0 {
            return Duration::ZERO;
        }
        self.total_latency / self.query_count as u32
    }

    pub fn percentile(&self, p: f64) -> Duration {
        if self.latency_samples.is_empty() {
            return Duration::ZERO;
        }

        let mut sorted: Vec<Duration> = self.latency_samples.iter().copied().collect();
        sorted.sort();

        let index = ((sorted.len() - 1) as f64 * p / 100.0) as usize;
        sorted[index]
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p95(&self) -> Duration {
        self.percentile(95.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionMetrics {
    pub opened: u64,
    pub open_failures: u64,
    pub closed: u64,
}

pub struct Metrics {
    query_metrics: Mutex<QueryMetrics>,
    connection_metrics: Mutex<ConnectionMetrics>,
    error_count: Mutex<u64>,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            query_metrics: Mutex::new(QueryMetrics::new()),
            connection_metrics: Mutex::new(ConnectionMetrics::default()),
            error_count: Mutex::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_query(&self, latency: Duration) {
        if let Ok(mut metrics) = self.query_metrics.lock() {
            metrics.record_query(latency);
        }
    }

    pub fn record_error(&self) {
        if let Ok(mut count) = self.error_count.lock() {
            *count += 1;
        }
    }

    pub fn record_open(&self, succeeded: bool) {
        if let Ok(mut m) = self.connection_metrics.lock() {
            if succeeded {
                m.opened += 1;
            } else {
                m.open_failures += 1;
            }
        }
    }

    pub fn record_close(&self) {
        if let Ok(mut m) = self.connection_metrics.lock() {
            m.closed += 1;
        }
    }

    pub fn get_query_metrics(&self) -> QueryMetrics {
        self.query_metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_else(|_| QueryMetrics::new())
    }

    pub fn get_connection_metrics(&self) -> ConnectionMetrics {
        self.connection_metrics
            .lock()
            .map(|m| *m)
            .unwrap_or_default()
    }

    pub fn get_error_count(&self) -> u64 {
        self.error_count.lock().map(|c| *c).unwrap_or(0)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts of resources that must return to their starting value once all
/// work completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gauge {
    /// Parameter buffers materialized for binding.
    ParamBuffers,
    /// Statement handles owned by the engine.
    Statements,
    /// Tasks submitted to a worker whose completion has not run yet.
    TasksInFlight,
}

#[derive(Debug, Default)]
pub struct HandleGauges {
    param_buffers: AtomicUsize,
    statements: AtomicUsize,
    tasks_in_flight: AtomicUsize,
}

impl HandleGauges {
    fn cell(&self, gauge: Gauge) -> &AtomicUsize {
        match gauge {
            Gauge::ParamBuffers => &self.param_buffers,
            Gauge::Statements => &self.statements,
            Gauge::TasksInFlight => &self.tasks_in_flight,
        }
    }

    pub fn get(&self, gauge: Gauge) -> usize {
        self.cell(gauge).load(Ordering::SeqCst)
    }
}

/// Holds one unit of a [`Gauge`] until dropped.
#[derive(Debug)]
pub struct GaugeGuard(Gauge);

impl GaugeGuard {
    pub fn acquire(gauge: Gauge) -> Self {
        GAUGES.cell(gauge).fetch_add(1, Ordering::SeqCst);
        Self(gauge)
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        GAUGES.cell(self.0).fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_metrics_new() {
        let metrics = QueryMetrics::new();
        assert_eq!(metrics.query_count, 0);
        assert_eq!(metrics.total_latency, Duration::ZERO);
        assert_eq!(metrics.min_latency, Duration::MAX);
        assert_eq!(metrics.max_latency, Duration::ZERO);
        assert!(metrics.latency_samples.is_empty());
    }

    #[test]
    fn test_query_metrics_record_multiple_queries() {
        let mut metrics = QueryMetrics::new();
        metrics.record_query(Duration::from_millis(50));
        metrics.record_query(Duration::from_millis(100));
        metrics.record_query(Duration::from_millis(75));

        assert_eq!(metrics.query_count, 3);
        assert_eq!(metrics.min_latency, Duration::from_millis(50));
        assert_eq!(metrics.max_latency, Duration::from_millis(100));
        assert_eq!(metrics.latency_samples.len(), 3);
    }

    #[test]
    fn test_query_metrics_average_latency() {
        let mut metrics = QueryMetrics::new();
        assert_eq!(metrics.average_latency(), Duration::ZERO);

        metrics.record_query(Duration::from_millis(100));
        metrics.record_query(Duration::from_millis(200));
        assert_eq!(metrics.average_latency(), Duration::from_millis(150));
    }

    #[test]
    fn test_query_metrics_p50_p95_p99() {
        let mut metrics = QueryMetrics::new();
        for i in 1..=100 {
            metrics.record_query(Duration::from_millis(i));
        }

        assert!(metrics.p50() > Duration::ZERO);
        assert!(metrics.p95() > metrics.p50());
        assert!(metrics.p99() >= metrics.p95());
    }

    #[test]
    fn test_query_metrics_sample_limit() {
        let mut metrics = QueryMetrics::new();
        for i in 0..1500 {
            metrics.record_query(Duration::from_millis(i));
        }
        assert_eq!(metrics.latency_samples.len(), MAX_LATENCY_SAMPLES);
        assert_eq!(metrics.latency_samples.front(), Some(&Duration::from_millis(500)));
        assert_eq!(metrics.query_count, 1500);
    }

    #[test]
    fn test_metrics_connection_counters() {
        let metrics = Metrics::new();
        metrics.record_open(true);
        metrics.record_open(false);
        metrics.record_close();
        assert_eq!(
            metrics.get_connection_metrics(),
            ConnectionMetrics {
                opened: 1,
                open_failures: 1,
                closed: 1,
            }
        );
    }

    #[test]
    fn test_metrics_record_error() {
        let metrics = Metrics::new();
        metrics.record_error();
        metrics.record_error();
        assert_eq!(metrics.get_error_count(), 2);
    }

    #[test]
    fn test_global_metrics_is_shared() {
        assert!(Arc::ptr_eq(&global_metrics(), &global_metrics()));
    }
}
