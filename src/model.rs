use serde::{Deserialize, Serialize};

/// Snapshot of one fleet device as it came out of ingestion.
///
/// Numeric fields are already coerced: they are finite and non-negative.
/// The health tier is not stored here, see [`crate::classify::Classifier`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub manufacturer: String,
    pub product_version: String,
    pub cpu_model: String,
    pub total_ram_gb: f64,
    pub graphics_cards: String,
    pub graphics_card_count: u32,
    pub graphics_card_ram_gb: f64,
    pub battery_designed_capacity_mah: f64,
    pub battery_full_charge_capacity_mah: f64,
    pub battery_health_percent: f64,
    pub estimated_battery_life_hours: f64,
    pub cpu_energy_wh: f64,
    pub disk_energy_wh: f64,
    pub display_energy_wh: f64,
    pub network_energy_wh: f64,
    pub total_energy_wh: f64,
    pub total_co2_kg: f64,
    pub ac_adapter_watt: f64,
}

impl DeviceRecord {
    pub fn component_energy_wh(&self) -> f64 {
        self.cpu_energy_wh + self.disk_energy_wh + self.display_energy_wh + self.network_energy_wh
    }

    /// Absolute difference between the reported total and the sum of components.
    pub fn energy_gap_wh(&self) -> f64 {
        (self.total_energy_wh - self.component_energy_wh()).abs()
    }

    pub fn search_text(&self) -> String {
        format!(
            "{} {} {}",
            self.manufacturer, self.product_version, self.cpu_model
        )
        .to_lowercase()
    }

    pub fn text_field(&self, field: DeviceField) -> Option<&str> {
        match field {
            DeviceField::Id => Some(&self.id),
            DeviceField::Manufacturer => Some(&self.manufacturer),
            DeviceField::ProductVersion => Some(&self.product_version),
            DeviceField::CpuModel => Some(&self.cpu_model),
            DeviceField::GraphicsCards => Some(&self.graphics_cards),
            _ => None,
        }
    }

    pub fn numeric_field(&self, field: DeviceField) -> Option<f64> {
        let value = match field {
            DeviceField::TotalRamGb => self.total_ram_gb,
            DeviceField::GraphicsCardCount => f64::from(self.graphics_card_count),
            DeviceField::GraphicsCardRamGb => self.graphics_card_ram_gb,
            DeviceField::BatteryDesignedCapacityMah => self.battery_designed_capacity_mah,
            DeviceField::BatteryFullChargeCapacityMah => self.battery_full_charge_capacity_mah,
            DeviceField::BatteryHealthPercent => self.battery_health_percent,
            DeviceField::EstimatedBatteryLifeHours => self.estimated_battery_life_hours,
            DeviceField::CpuEnergyWh => self.cpu_energy_wh,
            DeviceField::DiskEnergyWh => self.disk_energy_wh,
            DeviceField::DisplayEnergyWh => self.display_energy_wh,
            DeviceField::NetworkEnergyWh => self.network_energy_wh,
            DeviceField::TotalEnergyWh => self.total_energy_wh,
            DeviceField::TotalCo2Kg => self.total_co2_kg,
            DeviceField::AcAdapterWatt => self.ac_adapter_watt,
            _ => return None,
        };
        Some(value)
    }
}

/// Every column a source table can map onto a [`DeviceRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceField {
    Id,
    Manufacturer,
    ProductVersion,
    CpuModel,
    TotalRamGb,
    GraphicsCards,
    GraphicsCardCount,
    GraphicsCardRamGb,
    BatteryDesignedCapacityMah,
    BatteryFullChargeCapacityMah,
    BatteryHealthPercent,
    EstimatedBatteryLifeHours,
    CpuEnergyWh,
    DiskEnergyWh,
    DisplayEnergyWh,
    NetworkEnergyWh,
    TotalEnergyWh,
    TotalCo2Kg,
    AcAdapterWatt,
}

impl DeviceField {
    pub const ALL: [DeviceField; 19] = [
        DeviceField::Id,
        DeviceField::Manufacturer,
        DeviceField::ProductVersion,
        DeviceField::CpuModel,
        DeviceField::TotalRamGb,
        DeviceField::GraphicsCards,
        DeviceField::GraphicsCardCount,
        DeviceField::GraphicsCardRamGb,
        DeviceField::BatteryDesignedCapacityMah,
        DeviceField::BatteryFullChargeCapacityMah,
        DeviceField::BatteryHealthPercent,
        DeviceField::EstimatedBatteryLifeHours,
        DeviceField::CpuEnergyWh,
        DeviceField::DiskEnergyWh,
        DeviceField::DisplayEnergyWh,
        DeviceField::NetworkEnergyWh,
        DeviceField::TotalEnergyWh,
        DeviceField::TotalCo2Kg,
        DeviceField::AcAdapterWatt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceField::Id => "id",
            DeviceField::Manufacturer => "manufacturer",
            DeviceField::ProductVersion => "product_version",
            DeviceField::CpuModel => "cpu_model",
            DeviceField::TotalRamGb => "total_ram_gb",
            DeviceField::GraphicsCards => "graphics_cards",
            DeviceField::GraphicsCardCount => "graphics_card_count",
            DeviceField::GraphicsCardRamGb => "graphics_card_ram_gb",
            DeviceField::BatteryDesignedCapacityMah => "battery_designed_capacity_mah",
            DeviceField::BatteryFullChargeCapacityMah => "battery_full_charge_capacity_mah",
            DeviceField::BatteryHealthPercent => "battery_health_percent",
            DeviceField::EstimatedBatteryLifeHours => "estimated_battery_life_hours",
            DeviceField::CpuEnergyWh => "cpu_energy_wh",
            DeviceField::DiskEnergyWh => "disk_energy_wh",
            DeviceField::DisplayEnergyWh => "display_energy_wh",
            DeviceField::NetworkEnergyWh => "network_energy_wh",
            DeviceField::TotalEnergyWh => "total_energy_wh",
            DeviceField::TotalCo2Kg => "total_co2_kg",
            DeviceField::AcAdapterWatt => "ac_adapter_watt",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }

    #[cfg(test)]
    pub fn is_text(self) -> bool {
        matches!(
            self,
            DeviceField::Id
                | DeviceField::Manufacturer
                | DeviceField::ProductVersion
                | DeviceField::CpuModel
                | DeviceField::GraphicsCards
        )
    }
}

impl std::fmt::Display for DeviceField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
