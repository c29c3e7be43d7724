use crate::config::{ClassificationConfig, ClassificationPolicy};
use crate::model::DeviceRecord;
use serde::{Deserialize, Serialize};

/// Health tier of a device. Ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Critical,
    Warning,
    Good,
    Excellent,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Excellent, Tier::Good, Tier::Warning, Tier::Critical];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Excellent => "excellent",
            Tier::Good => "good",
            Tier::Warning => "warning",
            Tier::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "excellent" => Some(Tier::Excellent),
            "good" => Some(Tier::Good),
            "warning" => Some(Tier::Warning),
            "critical" => Some(Tier::Critical),
            _ => None,
        }
    }

    pub fn is_healthy(self) -> bool {
        matches!(self, Tier::Excellent | Tier::Good)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive cutoff pair: health must reach the floor, energy must stay under the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThreshold {
    pub min_battery_health: f64,
    pub max_energy_wh: f64,
}

impl TierThreshold {
    pub const fn new(min_battery_health: f64, max_energy_wh: f64) -> Self {
        Self {
            min_battery_health,
            max_energy_wh,
        }
    }

    pub fn matches(&self, battery_health: f64, energy_wh: f64) -> bool {
        battery_health >= self.min_battery_health && energy_wh <= self.max_energy_wh
    }

    /// True when `self` is at least as demanding as `looser` on both axes.
    pub fn is_stricter_than(&self, looser: &TierThreshold) -> bool {
        self.min_battery_health >= looser.min_battery_health
            && self.max_energy_wh <= looser.max_energy_wh
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RamClass {
    pub name: String,
    #[serde(default)]
    pub min_ram_gb: f64,
    pub excellent: TierThreshold,
    pub good: TierThreshold,
    pub warning: TierThreshold,
}

impl RamClass {
    fn evaluate(&self, battery_health: f64, energy_wh: f64) -> Tier {
        // Order matters once cutoffs are edited to overlap.
        if self.excellent.matches(battery_health, energy_wh) {
            return Tier::Excellent;
        }
        if self.good.matches(battery_health, energy_wh) {
            return Tier::Good;
        }
        if self.warning.matches(battery_health, energy_wh) {
            return Tier::Warning;
        }
        Tier::Critical
    }
}

/// RAM-class threshold table. The flat policy is a single class starting at 0 GB.
#[derive(Debug, Clone, PartialEq)]
pub struct Classifier {
    classes: Vec<RamClass>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::flat()
    }
}

impl Classifier {
    /// Classes are kept sorted by `min_ram_gb`, highest first. An empty list falls back to flat.
    pub fn new(mut classes: Vec<RamClass>) -> Self {
        if classes.is_empty() {
            return Self::flat();
        }
        classes.sort_by(|a, b| b.min_ram_gb.total_cmp(&a.min_ram_gb));
        Self { classes }
    }

    pub fn flat() -> Self {
        Self {
            classes: vec![flat_class()],
        }
    }

    pub fn ram_tiered() -> Self {
        Self::new(ram_tiered_classes())
    }

    pub fn from_config(cfg: &ClassificationConfig) -> Self {
        match cfg.policy {
            ClassificationPolicy::Flat => Self::flat(),
            ClassificationPolicy::RamTiered => Self::ram_tiered(),
            ClassificationPolicy::Custom => Self::new(cfg.classes.clone()),
        }
    }

    #[cfg(test)]
    pub fn classes(&self) -> &[RamClass] {
        &self.classes
    }

    /// First class whose floor the RAM reaches; devices below every floor use the lowest class.
    pub fn class_for(&self, ram_gb: f64) -> Option<&RamClass> {
        self.classes
            .iter()
            .find(|class| ram_gb >= class.min_ram_gb)
            .or_else(|| self.classes.last())
    }

    pub fn classify_values(&self, ram_gb: f64, battery_health: f64, energy_wh: f64) -> Tier {
        match self.class_for(ram_gb) {
            Some(class) => class.evaluate(battery_health, energy_wh),
            None => Tier::Critical,
        }
    }

    pub fn classify(&self, record: &DeviceRecord) -> Tier {
        self.classify_values(
            record.total_ram_gb,
            record.battery_health_percent,
            record.total_energy_wh,
        )
    }

    pub fn classify_all(&self, records: Vec<DeviceRecord>) -> Vec<ClassifiedDevice> {
        records
            .into_iter()
            .map(|record| {
                let tier = self.classify(&record);
                ClassifiedDevice { record, tier }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedDevice {
    #[serde(flatten)]
    pub record: DeviceRecord,
    pub tier: Tier,
}

pub fn flat_class() -> RamClass {
    RamClass {
        name: "default".to_string(),
        min_ram_gb: 0.0,
        excellent: TierThreshold::new(90.0, 20.0),
        good: TierThreshold::new(70.0, 40.0),
        warning: TierThreshold::new(50.0, 60.0),
    }
}

pub fn ram_tiered_classes() -> Vec<RamClass> {
    vec![
        RamClass {
            name: "high".to_string(),
            min_ram_gb: 64.0,
            excellent: TierThreshold::new(90.0, 30.0),
            good: TierThreshold::new(75.0, 50.0),
            warning: TierThreshold::new(55.0, 70.0),
        },
        RamClass {
            name: "mid".to_string(),
            min_ram_gb: 32.0,
            excellent: TierThreshold::new(85.0, 25.0),
            good: TierThreshold::new(70.0, 45.0),
            warning: TierThreshold::new(50.0, 65.0),
        },
        RamClass {
            name: "low".to_string(),
            min_ram_gb: 0.0,
            excellent: TierThreshold::new(80.0, 20.0),
            good: TierThreshold::new(65.0, 40.0),
            warning: TierThreshold::new(45.0, 60.0),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_boundaries_are_inclusive() {
        let c = Classifier::flat();
        assert_eq!(c.classify_values(8.0, 90.0, 20.0), Tier::Excellent);
        assert_ne!(c.classify_values(8.0, 89.999, 20.0), Tier::Excellent);
        assert_ne!(c.classify_values(8.0, 90.0, 20.001), Tier::Excellent);
        assert_eq!(c.classify_values(8.0, 70.0, 40.0), Tier::Good);
        assert_eq!(c.classify_values(8.0, 50.0, 60.0), Tier::Warning);
        assert_eq!(c.classify_values(8.0, 49.999, 10.0), Tier::Critical);
        assert_eq!(c.classify_values(8.0, 100.0, 60.001), Tier::Critical);
    }

    #[test]
    fn classification_is_total() {
        let classifiers = [Classifier::flat(), Classifier::ram_tiered()];
        let healths = [f64::NAN, -5.0, 0.0, 49.9, 50.0, 75.0, 90.0, 100.0, 250.0];
        let energies = [f64::NAN, 0.0, 19.0, 20.0, 45.0, 60.0, 1_000.0];
        let rams = [f64::NAN, 0.0, 8.0, 32.0, 64.0, 512.0];
        for c in &classifiers {
            for &h in &healths {
                for &e in &energies {
                    for &r in &rams {
                        let tier = c.classify_values(r, h, e);
                        assert!(Tier::ALL.contains(&tier));
                    }
                }
            }
        }
    }

    #[test]
    fn undefined_health_is_critical() {
        let c = Classifier::flat();
        assert_eq!(c.classify_values(16.0, f64::NAN, 5.0), Tier::Critical);
    }

    #[test]
    fn flat_tier_never_drops_as_health_grows() {
        let c = Classifier::flat();
        for energy_step in 0..=80 {
            let energy = energy_step as f64;
            let mut prev = Tier::Critical;
            for health_step in 0..=1000 {
                let health = health_step as f64 / 10.0;
                let tier = c.classify_values(0.0, health, energy);
                assert!(
                    tier >= prev,
                    "tier dropped at health={health} energy={energy}"
                );
                prev = tier;
            }
        }
    }

    #[test]
    fn ram_tiered_picks_class_by_total_ram() {
        let c = Classifier::ram_tiered();
        assert_eq!(c.class_for(64.0).map(|x| x.name.as_str()), Some("high"));
        assert_eq!(c.class_for(63.9).map(|x| x.name.as_str()), Some("mid"));
        assert_eq!(c.class_for(32.0).map(|x| x.name.as_str()), Some("mid"));
        assert_eq!(c.class_for(16.0).map(|x| x.name.as_str()), Some("low"));
        assert_eq!(c.class_for(f64::NAN).map(|x| x.name.as_str()), Some("low"));
    }

    #[test]
    fn ram_tiered_scenario() {
        let c = Classifier::ram_tiered();
        assert_eq!(c.classify_values(64.0, 91.0, 29.0), Tier::Excellent);
        // Low class: 29 Wh misses the 20 Wh excellent ceiling but fits good (>=65, <=40).
        assert_eq!(c.classify_values(16.0, 91.0, 29.0), Tier::Good);
        assert_eq!(c.classify_values(16.0, 91.0, 41.0), Tier::Warning);
        assert_eq!(c.classify_values(32.0, 85.0, 25.0), Tier::Excellent);
        assert_eq!(c.classify_values(32.0, 84.9, 25.0), Tier::Good);
    }

    #[test]
    fn custom_classes_are_sorted_and_empty_falls_back_to_flat() {
        let mut classes = ram_tiered_classes();
        classes.reverse();
        let c = Classifier::new(classes);
        let floors: Vec<f64> = c.classes().iter().map(|x| x.min_ram_gb).collect();
        assert_eq!(floors, vec![64.0, 32.0, 0.0]);

        assert_eq!(Classifier::new(Vec::new()), Classifier::flat());
    }

    #[test]
    fn lowest_class_catches_ram_below_every_floor() {
        let c = Classifier::new(vec![RamClass {
            name: "workstation".to_string(),
            min_ram_gb: 32.0,
            ..flat_class()
        }]);
        assert_eq!(c.classify_values(8.0, 95.0, 10.0), Tier::Excellent);
    }

    #[test]
    fn from_config_follows_policy() {
        let mut cfg = ClassificationConfig::default();
        assert_eq!(Classifier::from_config(&cfg), Classifier::flat());
        cfg.policy = ClassificationPolicy::RamTiered;
        assert_eq!(Classifier::from_config(&cfg).classes().len(), 3);
    }

    #[test]
    fn tier_parse_is_case_insensitive() {
        assert_eq!(Tier::parse(" Warning "), Some(Tier::Warning));
        assert_eq!(Tier::parse("ok"), None);
        assert!(Tier::Excellent > Tier::Good);
        assert!(Tier::Warning > Tier::Critical);
    }
}
