use crate::classify::RamClass;
use crate::ingest::columns::ColumnMap;
use crate::ingest::SourceFormat;
use crate::model::DeviceField;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    #[serde(default)]
    pub reload_interval_secs: u64,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub columns: BTreeMap<DeviceField, Vec<String>>,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default = "default_reconciliation_tolerance_wh")]
    pub reconciliation_tolerance_wh: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub format: SourceFormat,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationPolicy {
    #[default]
    Flat,
    RamTiered,
    Custom,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClassificationConfig {
    #[serde(default)]
    pub policy: ClassificationPolicy,
    #[serde(default)]
    pub classes: Vec<RamClass>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: None,
            url: None,
            format: SourceFormat::Auto,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9110".to_string(),
            reload_interval_secs: 0,
            source: SourceConfig::default(),
            columns: BTreeMap::new(),
            classification: ClassificationConfig::default(),
            reconciliation_tolerance_wh: default_reconciliation_tolerance_wh(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "поле listen обязательно".to_string(),
            ));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            ));
        }
        if !self.reconciliation_tolerance_wh.is_finite() || self.reconciliation_tolerance_wh < 0.0 {
            return Err(ConfigError::Validation(
                "reconciliation_tolerance_wh должно быть >= 0".to_string(),
            ));
        }

        validate_source(&self.source)?;
        validate_columns(&self.columns)?;
        validate_classification(&self.classification)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_source(cfg: &SourceConfig) -> Result<(), ConfigError> {
    let path = cfg.path.as_deref().map(str::trim);
    let url = cfg.url.as_deref().map(str::trim);
    if path.is_some() && url.is_some() {
        return Err(ConfigError::Validation(
            "source.path и source.url взаимоисключающие".to_string(),
        ));
    }
    if path == Some("") {
        return Err(ConfigError::Validation(
            "source.path не должен быть пустым".to_string(),
        ));
    }
    if let Some(url) = url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "source.url '{url}' должен начинаться с http:// или https://"
            )));
        }
    }
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "source.timeout_ms должен быть > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_columns(columns: &BTreeMap<DeviceField, Vec<String>>) -> Result<(), ConfigError> {
    for (field, aliases) in columns {
        if aliases.is_empty() || aliases.iter().any(|a| a.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "columns.{field}: список имён столбцов не должен быть пустым"
            )));
        }
    }
    if let Some((alias, owner, other)) = ColumnMap::default().with_overrides(columns).find_collision() {
        return Err(ConfigError::Validation(format!(
            "columns: имя столбца '{alias}' нужно одновременно полям {owner} и {other}"
        )));
    }
    Ok(())
}

fn validate_classification(cfg: &ClassificationConfig) -> Result<(), ConfigError> {
    if cfg.policy != ClassificationPolicy::Custom {
        if !cfg.classes.is_empty() {
            return Err(ConfigError::Validation(
                "classification.classes задаются только при policy: custom".to_string(),
            ));
        }
        return Ok(());
    }
    if cfg.classes.is_empty() {
        return Err(ConfigError::Validation(
            "classification.classes обязательно при policy: custom".to_string(),
        ));
    }

    let mut names = HashSet::new();
    let mut floors = Vec::new();
    for class in &cfg.classes {
        if class.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "classification.classes[*].name не должен быть пустым".to_string(),
            ));
        }
        if !names.insert(class.name.clone()) {
            return Err(ConfigError::Validation(format!(
                "имя класса '{}' должно быть уникальным",
                class.name
            )));
        }
        if !class.min_ram_gb.is_finite() || class.min_ram_gb < 0.0 {
            return Err(ConfigError::Validation(format!(
                "класс '{}': min_ram_gb должно быть >= 0",
                class.name
            )));
        }
        if floors.contains(&class.min_ram_gb) {
            return Err(ConfigError::Validation(format!(
                "класс '{}': min_ram_gb {} уже занят другим классом",
                class.name, class.min_ram_gb
            )));
        }
        floors.push(class.min_ram_gb);

        for (tier, t) in [
            ("excellent", &class.excellent),
            ("good", &class.good),
            ("warning", &class.warning),
        ] {
            if !t.min_battery_health.is_finite() || !t.max_energy_wh.is_finite() {
                return Err(ConfigError::Validation(format!(
                    "класс '{}': пороги {tier} должны быть конечными числами",
                    class.name
                )));
            }
        }
        if !class.excellent.is_stricter_than(&class.good)
            || !class.good.is_stricter_than(&class.warning)
        {
            return Err(ConfigError::Validation(format!(
                "класс '{}': пороги должны ужесточаться от warning к excellent",
                class.name
            )));
        }
    }
    Ok(())
}

const fn default_timeout_ms() -> u64 {
    10_000
}

const fn default_reconciliation_tolerance_wh() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{flat_class, TierThreshold};
    use std::io::Write;

    fn valid_config() -> Config {
        Config {
            listen: "127.0.0.1:9110".to_string(),
            source: SourceConfig {
                path: Some("./devices.csv".to_string()),
                ..SourceConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        Config::default()
            .validate()
            .expect("конфигурация по умолчанию должна проходить валидацию");
        valid_config().validate().expect("валидная конфигурация");
    }

    #[test]
    fn example_yaml_parses_and_validates() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).expect("пример должен разбираться");
        cfg.validate().expect("пример должен проходить валидацию");
    }

    #[test]
    fn path_and_url_are_exclusive() {
        let mut cfg = valid_config();
        cfg.source.url = Some("https://example.org/fleet.csv".to_string());
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));

        cfg.source.path = None;
        cfg.validate().expect("один url допустим");

        cfg.source.url = Some("ftp://example.org/fleet.csv".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_timeout_and_bad_listen_are_rejected() {
        let mut cfg = valid_config();
        cfg.source.timeout_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.listen = "not-an-address".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn custom_policy_requires_monotone_classes() {
        let mut cfg = valid_config();
        cfg.classification.policy = ClassificationPolicy::Custom;
        assert!(cfg.validate().is_err(), "custom без классов");

        cfg.classification.classes = vec![flat_class()];
        cfg.validate().expect("плоский класс допустим");

        let mut inverted = flat_class();
        inverted.name = "inverted".to_string();
        inverted.min_ram_gb = 16.0;
        inverted.excellent = TierThreshold::new(60.0, 20.0);
        cfg.classification.classes.push(inverted);
        assert!(cfg.validate().is_err(), "excellent мягче good");
    }

    #[test]
    fn classes_without_custom_policy_are_rejected() {
        let mut cfg = valid_config();
        cfg.classification.classes = vec![flat_class()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn column_aliases_must_not_collide() {
        let mut cfg = valid_config();
        cfg.columns.insert(DeviceField::CpuModel, vec!["Model".to_string()]);
        cfg.columns
            .insert(DeviceField::ProductVersion, vec![" model ".to_string()]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn column_override_must_not_take_another_fields_default() {
        let mut cfg = valid_config();
        cfg.columns.insert(DeviceField::CpuModel, vec!["model".to_string()]);
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));

        // Replacing product_version's own list frees "model" for cpu_model.
        cfg.columns.insert(
            DeviceField::ProductVersion,
            vec!["Device product version".to_string()],
        );
        cfg.validate().expect("model больше не занят");
    }

    #[test]
    fn load_from_file_reads_yaml_and_rejects_unknown_column_fields() {
        let mut file = tempfile::NamedTempFile::new().expect("временный файл");
        writeln!(
            file,
            "listen: 127.0.0.1:9110\nsource:\n  path: ./fleet.csv\nclassification:\n  policy: ram_tiered\ncolumns:\n  battery_health_percent: [\"Akku %\"]\n"
        )
        .expect("запись");
        let cfg = Config::load_from_file(file.path()).expect("конфигурация должна загружаться");
        assert_eq!(cfg.classification.policy, ClassificationPolicy::RamTiered);
        assert_eq!(
            cfg.columns.get(&DeviceField::BatteryHealthPercent),
            Some(&vec!["Akku %".to_string()])
        );

        let mut bad = tempfile::NamedTempFile::new().expect("временный файл");
        writeln!(bad, "listen: 127.0.0.1:9110\ncolumns:\n  status: [\"Status\"]\n").expect("запись");
        assert!(matches!(
            Config::load_from_file(bad.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
