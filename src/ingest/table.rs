use super::IngestError;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use serde_json::Value;
use std::collections::BTreeSet;
use std::io::Cursor;

static EMPTY_CELL: RawCell = RawCell::Empty;

#[derive(Debug, Clone, PartialEq)]
pub enum RawCell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl RawCell {
    pub fn is_blank(&self) -> bool {
        match self {
            RawCell::Empty => true,
            RawCell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

/// Header row plus data rows, as read from the source before any typing.
///
/// `None` rows stand for entries that could not be read as a row at all
/// (non-object JSON elements); they are counted as skipped downstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Option<Vec<RawCell>>>,
}

impl RawTable {
    pub fn cell(row: &[RawCell], pos: Option<usize>) -> &RawCell {
        pos.and_then(|p| row.get(p)).unwrap_or(&EMPTY_CELL)
    }
}

pub fn read_csv(bytes: &[u8]) -> Result<RawTable, IngestError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let delimiter = sniff_delimiter(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(bytes);

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(IngestError::Empty { skipped: 0 });
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let cells: Vec<RawCell> = record
            .iter()
            .map(|field| {
                if field.trim().is_empty() {
                    RawCell::Empty
                } else {
                    RawCell::Text(field.to_string())
                }
            })
            .collect();
        rows.push(Some(cells));
    }

    Ok(RawTable { headers, rows })
}

/// Accepts a top-level array of row objects, or an object with a `devices` array.
pub fn read_json(bytes: &[u8]) -> Result<RawTable, IngestError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let entries = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("devices") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(IngestError::Shape(
                    "ожидался массив строк или объект с полем devices".to_string(),
                ))
            }
        },
        _ => {
            return Err(IngestError::Shape(
                "ожидался массив строк или объект с полем devices".to_string(),
            ))
        }
    };

    let mut seen = BTreeSet::new();
    let mut headers = Vec::new();
    for entry in &entries {
        if let Value::Object(obj) = entry {
            for key in obj.keys() {
                if seen.insert(key.clone()) {
                    headers.push(key.clone());
                }
            }
        }
    }

    let rows: Vec<Option<Vec<RawCell>>> = entries
        .iter()
        .map(|entry| match entry {
            Value::Object(obj) => Some(
                headers
                    .iter()
                    .map(|h| obj.get(h).map(json_cell).unwrap_or(RawCell::Empty))
                    .collect(),
            ),
            _ => None,
        })
        .collect();

    Ok(RawTable { headers, rows })
}

fn json_cell(value: &Value) -> RawCell {
    match value {
        Value::Null => RawCell::Empty,
        Value::Bool(b) => RawCell::Bool(*b),
        Value::Number(n) => n.as_f64().map(RawCell::Number).unwrap_or(RawCell::Empty),
        Value::String(s) => RawCell::Text(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            RawCell::Text(parts.join(", "))
        }
        Value::Object(_) => RawCell::Text(value.to_string()),
    }
}

/// First sheet of an xlsx, xls or ods workbook. The first used row holds the headers.
pub fn read_workbook(bytes: &[u8]) -> Result<RawTable, IngestError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range?,
        None => return Err(IngestError::Empty { skipped: 0 }),
    };

    let mut sheet_rows = range.rows();
    let headers: Vec<String> = match sheet_rows.next() {
        Some(cells) => cells.iter().map(|c| c.to_string()).collect(),
        None => return Err(IngestError::Empty { skipped: 0 }),
    };
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(IngestError::Empty { skipped: 0 });
    }

    let rows: Vec<Option<Vec<RawCell>>> = sheet_rows
        .map(|cells| {
            let row: Vec<RawCell> = cells.iter().map(workbook_cell).collect();
            if row.iter().all(|c| *c == RawCell::Empty) {
                None
            } else {
                Some(row)
            }
        })
        .collect();
    Ok(RawTable { headers, rows })
}

fn workbook_cell(cell: &Data) -> RawCell {
    match cell {
        Data::Empty => RawCell::Empty,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => {
            if s.trim().is_empty() {
                RawCell::Empty
            } else {
                RawCell::Text(s.clone())
            }
        }
        Data::Float(f) => RawCell::Number(*f),
        Data::Int(i) => RawCell::Number(*i as f64),
        Data::Bool(b) => RawCell::Bool(*b),
        Data::DateTime(dt) => RawCell::Number(dt.as_f64()),
        // Formula errors such as #DIV/0! stay text and are coerced later.
        Data::Error(e) => RawCell::Text(e.to_string()),
    }
}

/// Semicolon-separated exports are common from spreadsheet tools in some locales.
fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let first_line = bytes.split(|b| *b == b'\n').next().unwrap_or(&[]);
    let commas = first_line.iter().filter(|b| **b == b',').count();
    let semicolons = first_line.iter().filter(|b| **b == b';').count();
    let tabs = first_line.iter().filter(|b| **b == b'\t').count();
    if tabs > commas && tabs > semicolons {
        b'\t'
    } else if semicolons > commas {
        b';'
    } else {
        b','
    }
}
