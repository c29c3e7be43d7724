use crate::classify::Tier;
use crate::state::State;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub fleet_devices_total: Gauge,
    pub fleet_devices_by_tier: GaugeVec,
    pub fleet_avg_battery_health_percent: Gauge,
    pub fleet_avg_co2_kg: Gauge,
    pub fleet_avg_energy_wh: Gauge,
    pub fleet_healthy_percent: Gauge,
    pub fleet_manufacturer_devices: GaugeVec,
    pub fleet_ingest_skipped_rows: Gauge,
    pub fleet_ingest_coerced_cells: Gauge,
    pub fleet_unreconciled_devices: Gauge,
    pub fleet_last_load_timestamp_seconds: Gauge,
    pub fleet_uptime_seconds: Gauge,
    pub fleet_scrape_count_total: Counter,
    pub fleet_load_errors_total: CounterVec,
    pub fleet_dataset_replacements_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let fleet_devices_total =
            Gauge::with_opts(opts!("fleet_devices_total", "Devices in the current dataset"))?;
        let fleet_devices_by_tier = GaugeVec::new(
            opts!("fleet_devices_by_tier", "Devices per health tier"),
            &["tier"],
        )?;
        let fleet_avg_battery_health_percent = Gauge::with_opts(opts!(
            "fleet_avg_battery_health_percent",
            "Average battery health, rounded to an integer"
        ))?;
        let fleet_avg_co2_kg =
            Gauge::with_opts(opts!("fleet_avg_co2_kg", "Average CO2 emission per device in kg"))?;
        let fleet_avg_energy_wh = Gauge::with_opts(opts!(
            "fleet_avg_energy_wh",
            "Average total energy consumption per device in Wh"
        ))?;
        let fleet_healthy_percent = Gauge::with_opts(opts!(
            "fleet_healthy_percent",
            "Share of excellent and good devices in percent"
        ))?;
        let fleet_manufacturer_devices = GaugeVec::new(
            opts!("fleet_manufacturer_devices", "Devices per manufacturer"),
            &["manufacturer"],
        )?;
        let fleet_ingest_skipped_rows = Gauge::with_opts(opts!(
            "fleet_ingest_skipped_rows",
            "Rows skipped during the last successful load"
        ))?;
        let fleet_ingest_coerced_cells = Gauge::with_opts(opts!(
            "fleet_ingest_coerced_cells",
            "Numeric cells replaced by 0 during the last successful load"
        ))?;
        let fleet_unreconciled_devices = Gauge::with_opts(opts!(
            "fleet_unreconciled_devices",
            "Devices whose total energy differs from the component sum beyond tolerance"
        ))?;
        let fleet_last_load_timestamp_seconds = Gauge::with_opts(opts!(
            "fleet_last_load_timestamp_seconds",
            "Unix timestamp of the last successful load"
        ))?;
        let fleet_uptime_seconds =
            Gauge::with_opts(opts!("fleet_uptime_seconds", "Service uptime in seconds"))?;
        let fleet_scrape_count_total = Counter::with_opts(opts!(
            "fleet_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let fleet_load_errors_total = CounterVec::new(
            opts!("fleet_load_errors_total", "Failed dataset loads by source kind"),
            &["source"],
        )?;
        let fleet_dataset_replacements_total = Counter::with_opts(opts!(
            "fleet_dataset_replacements_total",
            "Number of times the dataset was replaced"
        ))?;

        register(&registry, &fleet_devices_total)?;
        register(&registry, &fleet_devices_by_tier)?;
        register(&registry, &fleet_avg_battery_health_percent)?;
        register(&registry, &fleet_avg_co2_kg)?;
        register(&registry, &fleet_avg_energy_wh)?;
        register(&registry, &fleet_healthy_percent)?;
        register(&registry, &fleet_manufacturer_devices)?;
        register(&registry, &fleet_ingest_skipped_rows)?;
        register(&registry, &fleet_ingest_coerced_cells)?;
        register(&registry, &fleet_unreconciled_devices)?;
        register(&registry, &fleet_last_load_timestamp_seconds)?;
        register(&registry, &fleet_uptime_seconds)?;
        register(&registry, &fleet_scrape_count_total)?;
        register(&registry, &fleet_load_errors_total)?;
        register(&registry, &fleet_dataset_replacements_total)?;

        Ok(Arc::new(Self {
            registry,
            fleet_devices_total,
            fleet_devices_by_tier,
            fleet_avg_battery_health_percent,
            fleet_avg_co2_kg,
            fleet_avg_energy_wh,
            fleet_healthy_percent,
            fleet_manufacturer_devices,
            fleet_ingest_skipped_rows,
            fleet_ingest_coerced_cells,
            fleet_unreconciled_devices,
            fleet_last_load_timestamp_seconds,
            fleet_uptime_seconds,
            fleet_scrape_count_total,
            fleet_load_errors_total,
            fleet_dataset_replacements_total,
        }))
    }

    pub fn update_from_state(&self, state: &State) {
        let snapshot = state.snapshot();
        let agg = &snapshot.aggregate;

        self.fleet_devices_total.set(agg.total_devices as f64);
        self.fleet_avg_battery_health_percent
            .set(agg.avg_battery_health as f64);
        self.fleet_avg_co2_kg.set(agg.avg_co2_emission);
        self.fleet_avg_energy_wh.set(agg.avg_energy_consumption);
        self.fleet_healthy_percent.set(agg.healthy_percentage as f64);
        self.fleet_ingest_skipped_rows
            .set(snapshot.report.rows_skipped as f64);
        self.fleet_ingest_coerced_cells
            .set(snapshot.report.coerced_cells as f64);
        self.fleet_unreconciled_devices
            .set(snapshot.energy.unreconciled_devices as f64);
        self.fleet_last_load_timestamp_seconds
            .set(snapshot.loaded_at_unix as f64);

        self.fleet_devices_by_tier.reset();
        self.fleet_manufacturer_devices.reset();

        for tier in Tier::ALL {
            self.fleet_devices_by_tier
                .with_label_values(&[tier.as_str()])
                .set(agg.count_for(tier) as f64);
        }
        for share in snapshot.manufacturers() {
            self.fleet_manufacturer_devices
                .with_label_values(&[&share.manufacturer])
                .set(share.count as f64);
        }

        let now = now_unix();
        let uptime = now.saturating_sub(state.started_at_unix) as f64;
        self.fleet_uptime_seconds.set(uptime);
    }

    pub fn inc_scrape_count(&self) {
        self.fleet_scrape_count_total.inc();
    }

    pub fn inc_load_error(&self, source_kind: &str) {
        self.fleet_load_errors_total
            .with_label_values(&[source_kind])
            .inc();
    }

    pub fn inc_dataset_replacement(&self) {
        self.fleet_dataset_replacements_total.inc();
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

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
