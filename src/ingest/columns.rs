use crate::model::DeviceField;
use std::collections::{BTreeMap, HashMap};

/// Header names that carry a precomputed tier. They are never read.
const STATUS_HEADERS: &[&str] = &["status", "tier", "health status", "device status"];

/// Accepted header aliases per record field.
///
/// Headers are compared after trimming, lowercasing and collapsing inner whitespace,
/// so `Battery Designed Capacity (mAh  )` and `battery designed capacity (mah )` match.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMap {
    aliases: BTreeMap<DeviceField, Vec<String>>,
}

impl Default for ColumnMap {
    fn default() -> Self {
        let mut aliases = BTreeMap::new();
        for field in DeviceField::ALL {
            let mut names: Vec<String> = default_aliases(field).iter().map(|s| s.to_string()).collect();
            names.push(field.as_str().to_string());
            aliases.insert(field, names);
        }
        Self { aliases }
    }
}

impl ColumnMap {
    /// Replaces the alias list of every field present in `overrides`.
    pub fn with_overrides(mut self, overrides: &BTreeMap<DeviceField, Vec<String>>) -> Self {
        for (field, names) in overrides {
            if !names.is_empty() {
                self.aliases.insert(*field, names.clone());
            }
        }
        self
    }

    pub fn aliases(&self, field: DeviceField) -> &[String] {
        self.aliases.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First header name claimed by two different fields, with both owners.
    pub fn find_collision(&self) -> Option<(String, DeviceField, DeviceField)> {
        let mut owners: HashMap<String, DeviceField> = HashMap::new();
        for (field, names) in &self.aliases {
            for name in names {
                match owners.get(&normalize_header(name)) {
                    Some(owner) if owner != field => return Some((name.clone(), *owner, *field)),
                    Some(_) => {}
                    None => {
                        owners.insert(normalize_header(name), *field);
                    }
                }
            }
        }
        None
    }

    pub fn resolve(&self, headers: &[String]) -> ResolvedColumns {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
        let mut positions = BTreeMap::new();
        let mut missing = Vec::new();

        for field in DeviceField::ALL {
            let found = self.aliases(field).iter().find_map(|alias| {
                let alias = normalize_header(alias);
                normalized.iter().position(|h| *h == alias)
            });
            match found {
                Some(pos) => {
                    positions.insert(field, pos);
                }
                None => missing.push(field),
            }
        }

        let ignored = headers
            .iter()
            .zip(&normalized)
            .filter(|(_, norm)| STATUS_HEADERS.contains(&norm.as_str()))
            .map(|(raw, _)| raw.clone())
            .collect();

        ResolvedColumns {
            positions,
            missing,
            ignored,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedColumns {
    pub positions: BTreeMap<DeviceField, usize>,
    pub missing: Vec<DeviceField>,
    pub ignored: Vec<String>,
}

impl ResolvedColumns {
    pub fn position(&self, field: DeviceField) -> Option<usize> {
        self.positions.get(&field).copied()
    }

    /// True when no column other than the optional id was recognised.
    pub fn has_no_data_columns(&self) -> bool {
        self.positions.keys().all(|f| *f == DeviceField::Id)
    }
}

pub fn normalize_header(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn default_aliases(field: DeviceField) -> &'static [&'static str] {
    match field {
        DeviceField::Id => &["id", "Device ID", "deviceId"],
        DeviceField::Manufacturer => &["Device manufacturer", "deviceManufacturer", "manufacturer"],
        DeviceField::ProductVersion => &["Device product version", "deviceProductVersion", "model"],
        DeviceField::CpuModel => &["CPU model", "cpuModel"],
        DeviceField::TotalRamGb => &["Total RAM [GB]", "totalRam", "RAM [GB]", "ram"],
        DeviceField::GraphicsCards => &["Graphical cards", "graphicalCards"],
        DeviceField::GraphicsCardCount => &["Number of graphical cards", "numberOfGraphicalCards"],
        DeviceField::GraphicsCardRamGb => &["Graphical card RAM [GB]", "graphicalCardRam"],
        DeviceField::BatteryDesignedCapacityMah => &[
            "Battery Designed Capacity (mAh  )",
            "batteryDesignedCapacity",
        ],
        DeviceField::BatteryFullChargeCapacityMah => &[
            "Battery Full Charge Capacity (mAh  )",
            "batteryFullChargeCapacity",
        ],
        DeviceField::BatteryHealthPercent => &[
            "Battery Health (Get Battery Status) [%]",
            "Battery Health [%]",
            "batteryHealth",
        ],
        DeviceField::EstimatedBatteryLifeHours => &[
            "Estimated Battery Life (Hours)",
            "estimatedBatteryLife",
        ],
        DeviceField::CpuEnergyWh => &[
            "CPU Energy Consumption (Watt Hours)",
            "cpuEnergyConsumption",
        ],
        DeviceField::DiskEnergyWh => &[
            "Disk Energy Consumption (Watt Hours)",
            "diskEnergyConsumption",
        ],
        DeviceField::DisplayEnergyWh => &[
            "Display Energy Consumption (Watt Hours)",
            "displayEnergyConsumption",
        ],
        DeviceField::NetworkEnergyWh => &[
            "Network Energy Consumption (Watt Hours)",
            "networkEnergyConsumption",
        ],
        DeviceField::TotalEnergyWh => &[
            "Total Energy Consumption (Watt Hours)",
            "totalEnergyConsumption",
        ],
        DeviceField::TotalCo2Kg => &["Total CO2 Emitted (CO2KG)", "totalCO2Emitted"],
        DeviceField::AcAdapterWatt => &["AC Adapter Watt", "acAdapterWatt"],
    }
}
