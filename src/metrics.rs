use anyhow::Context;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static DESCRIBED: OnceCell<()> = OnceCell::new();

/// Register help text for every series once per process.
pub fn describe_metrics() {
    DESCRIBED.get_or_init(|| {
        describe_counter!("research_items_total", "Pipeline runs by terminal outcome");
        describe_counter!("research_admissions_total", "Admission decisions by result");
        describe_counter!(
            "research_provider_calls_total",
            "Provider calls by provider and outcome class"
        );
        describe_counter!("research_provider_attempts_total", "Network attempts per provider");
        describe_gauge!("research_circuit_open", "1 while a provider's circuit is open");
        describe_histogram!("research_fanout_ms", "Wall time of one fan-out call in ms");
        describe_counter!(
            "research_ledger_persist_errors_total",
            "Failed ledger file writes"
        );
        describe_gauge!("research_last_cycle_ts", "Unix time of the last finished poll cycle");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if one is already installed.
    pub fn install() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_metrics();
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}
