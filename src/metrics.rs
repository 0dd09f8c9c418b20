use crate::records::TableCounts;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub cycles_total: CounterVec,
    pub endpoint_failures_total: CounterVec,
    pub last_cycle_duration_seconds: Gauge,
    pub last_success_timestamp_seconds: Gauge,
    pub published_records: GaugeVec,
    pub scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let cycles_total = CounterVec::new(
            opts!("vinventd_cycles_total", "Refresh cycles by result"),
            &["result"],
        )?;
        let endpoint_failures_total = CounterVec::new(
            opts!(
                "vinventd_endpoint_failures_total",
                "Endpoints excluded from a published snapshot"
            ),
            &["endpoint"],
        )?;
        let last_cycle_duration_seconds = Gauge::with_opts(opts!(
            "vinventd_last_cycle_duration_seconds",
            "Wall-clock duration of the last finished cycle"
        ))?;
        let last_success_timestamp_seconds = Gauge::with_opts(opts!(
            "vinventd_last_success_timestamp_seconds",
            "Unix timestamp of the last published snapshot"
        ))?;
        let published_records = GaugeVec::new(
            opts!(
                "vinventd_published_records",
                "Records in the current snapshot by kind"
            ),
            &["kind"],
        )?;
        let scrape_count_total = Counter::with_opts(opts!(
            "vinventd_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &cycles_total)?;
        register(&registry, &endpoint_failures_total)?;
        register(&registry, &last_cycle_duration_seconds)?;
        register(&registry, &last_success_timestamp_seconds)?;
        register(&registry, &published_records)?;
        register(&registry, &scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            cycles_total,
            endpoint_failures_total,
            last_cycle_duration_seconds,
            last_success_timestamp_seconds,
            published_records,
            scrape_count_total,
        }))
    }

    pub fn record_cycle(&self, result: &str, duration_secs: f64) {
        self.cycles_total.with_label_values(&[result]).inc();
        self.last_cycle_duration_seconds.set(duration_secs);
    }

    pub fn record_published(&self, counts: &TableCounts, at_unix: i64) {
        for (kind, count) in counts.by_kind() {
            self.published_records
                .with_label_values(&[kind])
                .set(count as f64);
        }
        self.last_success_timestamp_seconds.set(at_unix as f64);
    }

    pub fn inc_endpoint_failure(&self, endpoint: &str) {
        self.endpoint_failures_total
            .with_label_values(&[endpoint])
            .inc();
    }

    pub fn inc_scrape_count(&self) {
        self.scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_counts_are_exported_by_kind() {
        let metrics = Metrics::new().expect("инициализация метрик");
        let counts = TableCounts {
            hosts: 3,
            clusters: 2,
            virtual_machines: 10,
            snapshots: 1,
            endpoint_health: 2,
            affinity_rules: 0,
        };
        metrics.record_published(&counts, 1_700_000_000);
        metrics.record_cycle("success", 12.5);
        metrics.inc_endpoint_failure("vc-b");

        let text = String::from_utf8(metrics.encode_metrics().expect("кодирование")).unwrap();
        assert!(text.contains("vinventd_published_records{kind=\"virtual_machines\"} 10"));
        assert!(text.contains("vinventd_cycles_total{result=\"success\"} 1"));
        assert!(text.contains("vinventd_endpoint_failures_total{endpoint=\"vc-b\"} 1"));
        assert!(text.contains("vinventd_last_cycle_duration_seconds 12.5"));
    }
}
