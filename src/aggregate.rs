use crate::classify::{ClassifiedDevice, Tier};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetAggregate {
    pub total_devices: usize,
    pub avg_battery_health: i64,
    pub avg_co2_emission: f64,
    pub avg_energy_consumption: f64,
    pub excellent_count: usize,
    pub good_count: usize,
    pub warning_count: usize,
    pub critical_count: usize,
    pub healthy_percentage: u32,
}

impl FleetAggregate {
    pub fn compute(devices: &[ClassifiedDevice]) -> Self {
        let total_devices = devices.len();
        if total_devices == 0 {
            return Self::default();
        }
        let n = total_devices as f64;

        let health_sum: f64 = devices.iter().map(|d| d.record.battery_health_percent).sum();
        let co2_sum: f64 = devices.iter().map(|d| d.record.total_co2_kg).sum();
        let energy_sum: f64 = devices.iter().map(|d| d.record.total_energy_wh).sum();

        let count = |tier: Tier| devices.iter().filter(|d| d.tier == tier).count();
        let excellent_count = count(Tier::Excellent);
        let good_count = count(Tier::Good);
        let warning_count = count(Tier::Warning);
        let critical_count = count(Tier::Critical);

        Self {
            total_devices,
            avg_battery_health: (health_sum / n).round() as i64,
            avg_co2_emission: round_to(co2_sum / n, 6),
            avg_energy_consumption: round_to(energy_sum / n, 2),
            excellent_count,
            good_count,
            warning_count,
            critical_count,
            healthy_percentage: percent_of(
                devices.iter().filter(|d| d.tier.is_healthy()).count(),
                total_devices,
            ),
        }
    }

    pub fn count_for(&self, tier: Tier) -> usize {
        match tier {
            Tier::Excellent => self.excellent_count,
            Tier::Good => self.good_count,
            Tier::Warning => self.warning_count,
            Tier::Critical => self.critical_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManufacturerShare {
    pub manufacturer: String,
    pub count: usize,
    pub percentage: u32,
}

/// Device count per manufacturer, in order of first appearance.
pub fn manufacturer_distribution(devices: &[ClassifiedDevice]) -> Vec<ManufacturerShare> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut shares: Vec<ManufacturerShare> = Vec::new();
    for device in devices {
        let name = device.record.manufacturer.as_str();
        match index.get(name) {
            Some(&pos) => shares[pos].count += 1,
            None => {
                index.insert(name, shares.len());
                shares.push(ManufacturerShare {
                    manufacturer: name.to_string(),
                    count: 1,
                    percentage: 0,
                });
            }
        }
    }

    let total = devices.len();
    for share in &mut shares {
        share.percentage = percent_of(share.count, total);
    }
    shares
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ManufacturerProfile {
    pub manufacturer: String,
    pub devices: usize,
    pub battery_health: f64,
    pub cpu_energy_wh: f64,
    pub disk_energy_wh: f64,
    pub display_energy_wh: f64,
    pub network_energy_wh: f64,
    pub total_energy_wh: f64,
    pub co2_kg: f64,
}

/// Unrounded averages over one manufacturer's devices. Unknown manufacturers yield zeros.
pub fn manufacturer_profile(devices: &[ClassifiedDevice], manufacturer: &str) -> ManufacturerProfile {
    let own: Vec<&ClassifiedDevice> = devices
        .iter()
        .filter(|d| d.record.manufacturer == manufacturer)
        .collect();
    let mut profile = ManufacturerProfile {
        manufacturer: manufacturer.to_string(),
        devices: own.len(),
        ..ManufacturerProfile::default()
    };
    if own.is_empty() {
        return profile;
    }

    let n = own.len() as f64;
    let avg = |f: fn(&ClassifiedDevice) -> f64| own.iter().map(|d| f(d)).sum::<f64>() / n;
    profile.battery_health = avg(|d| d.record.battery_health_percent);
    profile.cpu_energy_wh = avg(|d| d.record.cpu_energy_wh);
    profile.disk_energy_wh = avg(|d| d.record.disk_energy_wh);
    profile.display_energy_wh = avg(|d| d.record.display_energy_wh);
    profile.network_energy_wh = avg(|d| d.record.network_energy_wh);
    profile.total_energy_wh = avg(|d| d.record.total_energy_wh);
    profile.co2_kg = avg(|d| d.record.total_co2_kg);
    profile
}

pub fn compare_manufacturers(devices: &[ClassifiedDevice], names: &[&str]) -> Vec<ManufacturerProfile> {
    names
        .iter()
        .filter(|name| !name.is_empty())
        .map(|name| manufacturer_profile(devices, name))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnergyBreakdown {
    pub cpu_wh: f64,
    pub disk_wh: f64,
    pub display_wh: f64,
    pub network_wh: f64,
    pub total_wh: f64,
    pub tolerance_wh: f64,
    pub unreconciled_devices: usize,
}

/// Fleet averages per subsystem, rounded to one decimal.
///
/// `unreconciled_devices` counts records whose total drifts from the component
/// sum by more than `tolerance_wh`.
pub fn energy_breakdown(devices: &[ClassifiedDevice], tolerance_wh: f64) -> EnergyBreakdown {
    let unreconciled_devices = devices
        .iter()
        .filter(|d| d.record.energy_gap_wh() > tolerance_wh)
        .count();
    if devices.is_empty() {
        return EnergyBreakdown {
            tolerance_wh,
            ..EnergyBreakdown::default()
        };
    }

    let n = devices.len() as f64;
    let avg = |f: fn(&ClassifiedDevice) -> f64| round_to(devices.iter().map(f).sum::<f64>() / n, 1);
    EnergyBreakdown {
        cpu_wh: avg(|d| d.record.cpu_energy_wh),
        disk_wh: avg(|d| d.record.disk_energy_wh),
        display_wh: avg(|d| d.record.display_energy_wh),
        network_wh: avg(|d| d.record.network_energy_wh),
        total_wh: avg(|d| d.record.total_energy_wh),
        tolerance_wh,
        unreconciled_devices,
    }
}

/// Fixed-point rounding of the exact binary value. A tie goes to the larger magnitude,
/// so `10.125` becomes `10.13` while `1.005` (stored as 1.00499...) becomes `1.0`.
pub fn round_to(value: f64, digits: usize) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    // 1074 fractional digits hold the exact expansion of any f64.
    let exact = format!("{:.1074}", value.abs());
    let (int_part, frac_part) = exact.split_once('.').unwrap_or((exact.as_str(), ""));
    let keep = digits.min(frac_part.len());

    let mut kept: Vec<u8> = int_part
        .bytes()
        .chain(frac_part.bytes().take(keep))
        .collect();
    if frac_part.as_bytes().get(keep).is_some_and(|d| *d >= b'5') {
        increment_decimal(&mut kept);
    }

    let split = kept.len() - keep;
    let (int_digits, frac_digits) = kept.split_at(split);
    let text = format!(
        "{}.{}0",
        String::from_utf8_lossy(int_digits),
        String::from_utf8_lossy(frac_digits)
    );
    let rounded: f64 = text.parse().unwrap_or(0.0);
    if value.is_sign_negative() {
        -rounded
    } else {
        rounded
    }
}

fn increment_decimal(digits: &mut Vec<u8>) {
    for d in digits.iter_mut().rev() {
        if *d == b'9' {
            *d = b'0';
        } else {
            *d += 1;
            return;
        }
    }
    digits.insert(0, b'1');
}

fn percent_of(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((part as f64 / total as f64) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Classifier;
    use crate::ingest::sample::load_sample;
    use crate::model::DeviceRecord;

    fn device(manufacturer: &str, health: f64, energy: f64, co2: f64) -> DeviceRecord {
        DeviceRecord {
            id: format!("{manufacturer}-{health}"),
            manufacturer: manufacturer.to_string(),
            battery_health_percent: health,
            total_energy_wh: energy,
            total_co2_kg: co2,
            ..DeviceRecord::default()
        }
    }

    fn sample_devices() -> Vec<ClassifiedDevice> {
        let ingested = load_sample().expect("встроенный набор должен разбираться");
        Classifier::flat().classify_all(ingested.records)
    }

    #[test]
    fn sample_fleet_aggregate() {
        let devices = sample_devices();
        let tiers: Vec<Tier> = devices.iter().map(|d| d.tier).collect();
        // The third device's stored status says "warning"; 71.246% / 20.1 Wh is good under flat cutoffs.
        assert_eq!(tiers, vec![Tier::Good, Tier::Excellent, Tier::Good]);

        let agg = FleetAggregate::compute(&devices);
        assert_eq!(agg.total_devices, 3);
        assert_eq!(agg.avg_battery_health, 86);
        assert_eq!(agg.avg_energy_consumption, 21.28);
        assert_eq!(agg.avg_co2_emission, 0.007024);
        assert_eq!(agg.excellent_count, 1);
        assert_eq!(agg.critical_count, 0);
        assert_eq!(agg.healthy_percentage, 100);
    }

    #[test]
    fn healthy_percentage_rounds_two_of_three() {
        let devices = Classifier::flat().classify_all(vec![
            device("Lenovo", 85.764, 36.6339, 0.0120892),
            device("Lenovo", 99.947, 7.10314, 0.00234404),
            device("Lenovo", 60.0, 50.0, 0.0066389),
        ]);
        let agg = FleetAggregate::compute(&devices);
        assert_eq!(agg.excellent_count, 1);
        assert_eq!(agg.good_count, 1);
        assert_eq!(agg.warning_count, 1);
        assert_eq!(agg.healthy_percentage, 67);
    }

    #[test]
    fn empty_fleet_is_all_zero() {
        let agg = FleetAggregate::compute(&[]);
        assert_eq!(agg, FleetAggregate::default());
        assert_eq!(agg.total_devices, 0);
        assert_eq!(agg.avg_co2_emission, 0.0);
        assert_eq!(agg.healthy_percentage, 0);
    }

    #[test]
    fn aggregate_ignores_order() {
        let mut devices = Classifier::flat().classify_all(vec![
            device("A", 95.0, 10.0, 0.01),
            device("B", 72.5, 33.3, 0.02),
            device("C", 40.0, 80.0, 0.03),
            device("D", 55.0, 59.0, 0.004),
        ]);
        let forward = FleetAggregate::compute(&devices);
        devices.reverse();
        assert_eq!(FleetAggregate::compute(&devices), forward);
        devices.swap(0, 2);
        assert_eq!(FleetAggregate::compute(&devices), forward);
    }

    #[test]
    fn union_mean_lies_between_part_means() {
        let c = Classifier::flat();
        let a = c.classify_all(vec![device("A", 91.0, 12.0, 0.01), device("A", 77.0, 30.0, 0.02)]);
        let b = c.classify_all(vec![
            device("B", 52.0, 55.0, 0.05),
            device("B", 64.0, 41.0, 0.04),
            device("B", 49.0, 70.0, 0.06),
        ]);
        let mut both = a.clone();
        both.extend(b.iter().cloned());

        let (aa, ab, au) = (
            FleetAggregate::compute(&a),
            FleetAggregate::compute(&b),
            FleetAggregate::compute(&both),
        );
        let between = |u: f64, x: f64, y: f64| u >= x.min(y) && u <= x.max(y);
        assert!(between(
            au.avg_energy_consumption,
            aa.avg_energy_consumption,
            ab.avg_energy_consumption
        ));
        assert!(between(au.avg_co2_emission, aa.avg_co2_emission, ab.avg_co2_emission));
        assert!(between(
            au.avg_battery_health as f64,
            aa.avg_battery_health as f64,
            ab.avg_battery_health as f64
        ));
    }

    #[test]
    fn manufacturer_distribution_keeps_first_seen_order() {
        let devices = Classifier::flat().classify_all(vec![
            device("Lenovo", 90.0, 10.0, 0.0),
            device("Dell", 90.0, 10.0, 0.0),
            device("Lenovo", 90.0, 10.0, 0.0),
        ]);
        let shares = manufacturer_distribution(&devices);
        assert_eq!(shares.len(), 2);
        assert_eq!(shares[0].manufacturer, "Lenovo");
        assert_eq!(shares[0].count, 2);
        assert_eq!(shares[0].percentage, 67);
        assert_eq!(shares[1].percentage, 33);
        assert!(manufacturer_distribution(&[]).is_empty());
    }

    #[test]
    fn manufacturer_comparison_averages() {
        let devices = Classifier::flat().classify_all(vec![
            device("Lenovo", 80.0, 10.0, 0.02),
            device("Lenovo", 90.0, 30.0, 0.04),
            device("Dell", 70.0, 50.0, 0.01),
        ]);
        let profiles = compare_manufacturers(&devices, &["Lenovo", "HP", ""]);
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].devices, 2);
        assert!((profiles[0].battery_health - 85.0).abs() < 1e-9);
        assert!((profiles[0].total_energy_wh - 20.0).abs() < 1e-9);
        assert!((profiles[0].co2_kg - 0.03).abs() < 1e-9);
        assert_eq!(profiles[1].devices, 0);
        assert_eq!(profiles[1].battery_health, 0.0);
    }

    #[test]
    fn energy_breakdown_rounds_and_flags_drift() {
        let devices = sample_devices();
        let breakdown = energy_breakdown(&devices, 1.0);
        assert_eq!(breakdown.cpu_wh, 10.5);
        assert_eq!(breakdown.total_wh, 21.3);
        // Only the third sample device reports a total close to its component sum.
        assert_eq!(breakdown.unreconciled_devices, 2);

        let empty = energy_breakdown(&[], 0.5);
        assert_eq!(empty.total_wh, 0.0);
        assert_eq!(empty.tolerance_wh, 0.5);
    }

    #[test]
    fn round_to_matches_fixed_decimal_output() {
        assert_eq!(round_to(21.284980, 2), 21.28);
        assert_eq!(round_to(0.00702404666, 6), 0.007024);
        assert_eq!(round_to(f64::NAN, 2), 0.0);
    }

    #[test]
    fn round_to_sends_exact_ties_up() {
        assert_eq!(round_to(10.125, 2), 10.13);
        assert_eq!(round_to(0.125, 2), 0.13);
        assert_eq!(round_to(2.5, 0), 3.0);
        assert_eq!(round_to(9.96, 1), 10.0);
        assert_eq!(round_to(10.25, 1), 10.3);
        // Stored below the tie, so it stays down.
        assert_eq!(round_to(1.005, 2), 1.0);
        assert_eq!(round_to(0.0, 2), 0.0);
    }

    #[test]
    fn average_energy_on_a_tie_rounds_up() {
        let devices = Classifier::flat().classify_all(vec![
            device("Lenovo", 90.0, 10.25, 0.0),
            device("Lenovo", 90.0, 10.0, 0.0),
        ]);
        let agg = FleetAggregate::compute(&devices);
        assert_eq!(agg.avg_energy_consumption, 10.13);

        let energy = energy_breakdown(&devices, 1.0);
        assert_eq!(energy.total_wh, 10.1);
    }
}
