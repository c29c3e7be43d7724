pub mod columns;
pub mod sample;
pub mod source;
pub mod table;

use crate::model::{DeviceField, DeviceRecord};
use columns::{ColumnMap, ResolvedColumns};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use table::{RawCell, RawTable};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("не удалось прочитать источник {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось загрузить {url}: {source}")]
    Fetch {
        url: String,
        source: reqwest::Error,
    },
    #[error("ошибка разбора CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("ошибка разбора JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("неверная структура таблицы: {0}")]
    Shape(String),
    #[error("таблица не содержит строк с данными (пропущено строк: {skipped})")]
    Empty { skipped: usize },
    #[error("ошибка чтения книги Excel: {0}")]
    Workbook(#[from] calamine::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    #[default]
    Auto,
    Csv,
    Json,
    /// Excel or OpenDocument workbook; only the first sheet is read.
    Xlsx,
}

impl SourceFormat {
    /// Guesses from a file name or URL path. `None` means the name says nothing.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name
            .split(['?', '#'])
            .next()
            .unwrap_or(name)
            .to_ascii_lowercase();
        let ext = match lower.rsplit_once('.') {
            Some((_, ext)) => ext,
            None => return None,
        };
        match ext {
            "csv" | "tsv" | "txt" => Some(SourceFormat::Csv),
            "json" => Some(SourceFormat::Json),
            "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => Some(SourceFormat::Xlsx),
            _ => None,
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let lower = content_type.to_ascii_lowercase();
        // Browsers also label plain CSV as application/vnd.ms-excel, so that one is sniffed.
        if lower.contains("spreadsheetml") || lower.contains("opendocument.spreadsheet") {
            Some(SourceFormat::Xlsx)
        } else if lower.contains("json") {
            Some(SourceFormat::Json)
        } else if lower.contains("csv") || lower.starts_with("text/plain") {
            Some(SourceFormat::Csv)
        } else {
            None
        }
    }

    fn sniff(bytes: &[u8]) -> Self {
        // Zip container (xlsx, ods) or OLE compound file (xls).
        if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"\xD0\xCF\x11\xE0") {
            return SourceFormat::Xlsx;
        }
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'[') | Some(b'{') => SourceFormat::Json,
            _ => SourceFormat::Csv,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub rows_total: usize,
    pub rows_skipped: usize,
    pub coerced_cells: usize,
    pub duplicate_ids: usize,
    pub missing_columns: Vec<DeviceField>,
    pub ignored_columns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ingested {
    pub records: Vec<DeviceRecord>,
    pub report: IngestReport,
}

pub fn ingest_bytes(
    bytes: &[u8],
    format: SourceFormat,
    columns: &ColumnMap,
) -> Result<Ingested, IngestError> {
    let format = match format {
        SourceFormat::Auto => SourceFormat::sniff(bytes),
        other => other,
    };
    let table = match format {
        SourceFormat::Json => table::read_json(bytes)?,
        SourceFormat::Xlsx => table::read_workbook(bytes)?,
        _ => table::read_csv(bytes)?,
    };
    ingest_table(table, columns)
}

pub fn ingest_table(table: RawTable, columns: &ColumnMap) -> Result<Ingested, IngestError> {
    let resolved = columns.resolve(&table.headers);
    if !table.rows.is_empty() && resolved.has_no_data_columns() {
        return Err(IngestError::Shape(format!(
            "ни один столбец не распознан, заголовки: {}",
            table.headers.join(", ")
        )));
    }
    for name in &resolved.ignored {
        debug!(column = %name, "столбец статуса игнорируется, уровень вычисляется заново");
    }
    if !resolved.missing.is_empty() {
        let names: Vec<&str> = resolved
            .missing
            .iter()
            .filter(|f| **f != DeviceField::Id)
            .map(|f| f.as_str())
            .collect();
        if !names.is_empty() {
            warn!(missing = ?names, "в источнике нет части столбцов, значения будут нулевыми");
        }
    }

    let mut report = IngestReport {
        rows_total: table.rows.len(),
        missing_columns: resolved.missing.clone(),
        ignored_columns: resolved.ignored.clone(),
        ..IngestReport::default()
    };
    let mut ids = HashSet::new();
    let mut records = Vec::with_capacity(table.rows.len());

    for (index, row) in table.rows.iter().enumerate() {
        let row = match row {
            Some(cells) if !cells.iter().all(RawCell::is_blank) => cells,
            _ => {
                report.rows_skipped += 1;
                continue;
            }
        };
        let mut record = build_record(row, &resolved, &mut report.coerced_cells);
        if record.id.is_empty() {
            record.id = (index + 1).to_string();
        }
        if !ids.insert(record.id.clone()) {
            report.duplicate_ids += 1;
            let unique = unique_id(&record.id, &ids);
            warn!(id = %record.id, replacement = %unique, "повторяющийся идентификатор устройства");
            ids.insert(unique.clone());
            record.id = unique;
        }
        records.push(record);
    }

    if records.is_empty() {
        return Err(IngestError::Empty {
            skipped: report.rows_skipped,
        });
    }

    Ok(Ingested { records, report })
}

fn build_record(row: &[RawCell], cols: &ResolvedColumns, coerced: &mut usize) -> DeviceRecord {
    let text = |field: DeviceField| coerce_text(RawTable::cell(row, cols.position(field)));
    let mut number = |field: DeviceField| {
        let (value, ok) = coerce_number(RawTable::cell(row, cols.position(field)));
        if !ok {
            *coerced += 1;
        }
        value
    };

    DeviceRecord {
        id: text(DeviceField::Id),
        manufacturer: text(DeviceField::Manufacturer),
        product_version: text(DeviceField::ProductVersion),
        cpu_model: text(DeviceField::CpuModel),
        total_ram_gb: number(DeviceField::TotalRamGb),
        graphics_cards: text(DeviceField::GraphicsCards),
        graphics_card_count: number(DeviceField::GraphicsCardCount).round() as u32,
        graphics_card_ram_gb: number(DeviceField::GraphicsCardRamGb),
        battery_designed_capacity_mah: number(DeviceField::BatteryDesignedCapacityMah),
        battery_full_charge_capacity_mah: number(DeviceField::BatteryFullChargeCapacityMah),
        battery_health_percent: number(DeviceField::BatteryHealthPercent),
        estimated_battery_life_hours: number(DeviceField::EstimatedBatteryLifeHours),
        cpu_energy_wh: number(DeviceField::CpuEnergyWh),
        disk_energy_wh: number(DeviceField::DiskEnergyWh),
        display_energy_wh: number(DeviceField::DisplayEnergyWh),
        network_energy_wh: number(DeviceField::NetworkEnergyWh),
        total_energy_wh: number(DeviceField::TotalEnergyWh),
        total_co2_kg: number(DeviceField::TotalCo2Kg),
        ac_adapter_watt: number(DeviceField::AcAdapterWatt),
    }
}

/// Returns the value and whether the cell was usable. Blank cells are 0 without complaint.
pub fn coerce_number(cell: &RawCell) -> (f64, bool) {
    let parsed = match cell {
        RawCell::Empty => return (0.0, true),
        RawCell::Number(n) => Some(*n),
        RawCell::Text(s) => parse_number_text(s),
        RawCell::Bool(_) => None,
    };
    match parsed {
        Some(v) if v.is_finite() && v >= 0.0 => (v, true),
        _ => (0.0, false),
    }
}

fn parse_number_text(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    let trimmed = trimmed.strip_suffix('%').unwrap_or(trimmed).trim_end();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }
    // Decimal comma, as written by spreadsheets in some locales.
    if trimmed.matches(',').count() == 1 && !trimmed.contains('.') {
        return trimmed.replace(',', ".").parse().ok();
    }
    None
}

pub fn coerce_text(cell: &RawCell) -> String {
    match cell {
        RawCell::Empty => String::new(),
        RawCell::Text(s) => s.trim().to_string(),
        RawCell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
        RawCell::Number(n) => n.to_string(),
        RawCell::Bool(b) => b.to_string(),
    }
}

fn unique_id(base: &str, taken: &HashSet<String>) -> String {
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
