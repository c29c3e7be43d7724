use crate::classify::{ClassifiedDevice, Tier};
use crate::model::DeviceField;
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("неизвестное поле сортировки: {0}")]
    UnknownSortField(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Field(DeviceField),
    Tier,
}

/// Table filters. Blank strings and `all` mean "no filter", mirroring the dashboard widgets.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeviceQuery {
    pub search: Option<String>,
    pub manufacturer: Option<String>,
    pub cpu: Option<String>,
    #[serde(default, deserialize_with = "blank_or_number")]
    pub ram: Option<f64>,
    pub gpu: Option<String>,
    #[serde(default, deserialize_with = "blank_or_number")]
    pub health_min: Option<f64>,
    #[serde(default, deserialize_with = "blank_or_number")]
    pub health_max: Option<f64>,
    #[serde(default, deserialize_with = "blank_or_tier")]
    pub tier: Option<Tier>,
    pub sort: Option<String>,
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub total_matched: usize,
    pub critical_alerts: usize,
    pub devices: Vec<ClassifiedDevice>,
}

impl DeviceQuery {
    pub fn sort_key(&self) -> Result<SortKey, QueryError> {
        let name = match active(&self.sort) {
            None => return Ok(SortKey::Field(DeviceField::Manufacturer)),
            Some(name) => name,
        };
        if name == "tier" {
            return Ok(SortKey::Tier);
        }
        DeviceField::parse(name)
            .map(SortKey::Field)
            .ok_or_else(|| QueryError::UnknownSortField(name.to_string()))
    }

    pub fn matches(&self, device: &ClassifiedDevice) -> bool {
        let r = &device.record;
        if let Some(term) = active(&self.search) {
            if !r.search_text().contains(&term.to_lowercase()) {
                return false;
            }
        }
        if let Some(m) = active(&self.manufacturer) {
            if r.manufacturer != m {
                return false;
            }
        }
        if let Some(cpu) = active(&self.cpu) {
            if r.cpu_model != cpu {
                return false;
            }
        }
        if let Some(ram) = self.ram {
            if r.total_ram_gb != ram {
                return false;
            }
        }
        if let Some(gpu) = active(&self.gpu) {
            if !r.graphics_cards.to_lowercase().contains(&gpu.to_lowercase()) {
                return false;
            }
        }
        if let Some(min) = self.health_min {
            if r.battery_health_percent < min {
                return false;
            }
        }
        if let Some(max) = self.health_max {
            if r.battery_health_percent > max {
                return false;
            }
        }
        if let Some(tier) = self.tier {
            if device.tier != tier {
                return false;
            }
        }
        true
    }

    pub fn run(&self, devices: &[ClassifiedDevice]) -> Result<QueryResult, QueryError> {
        let key = self.sort_key()?;
        let mut matched: Vec<ClassifiedDevice> =
            devices.iter().filter(|d| self.matches(d)).cloned().collect();
        matched.sort_by(|a, b| {
            let ord = compare_by(key, a, b);
            match self.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        Ok(QueryResult {
            total_matched: matched.len(),
            critical_alerts: matched.iter().filter(|d| d.tier == Tier::Critical).count(),
            devices: matched,
        })
    }
}

fn active(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

fn blank_or_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match active(&raw) {
        None => Ok(None),
        Some(text) => text
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("ожидалось число, получено '{text}'"))),
    }
}

fn blank_or_tier<'de, D>(deserializer: D) -> Result<Option<Tier>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match active(&raw) {
        None => Ok(None),
        Some(text) => Tier::parse(text)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("неизвестный уровень '{text}'"))),
    }
}

fn compare_by(key: SortKey, a: &ClassifiedDevice, b: &ClassifiedDevice) -> Ordering {
    match key {
        SortKey::Tier => a.tier.cmp(&b.tier),
        SortKey::Field(field) => {
            if let (Some(x), Some(y)) = (a.record.text_field(field), b.record.text_field(field)) {
                return x.to_lowercase().cmp(&y.to_lowercase());
            }
            match (a.record.numeric_field(field), b.record.numeric_field(field)) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => Ordering::Equal,
            }
        }
    }
}
