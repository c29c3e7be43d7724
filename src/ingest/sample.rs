use super::columns::ColumnMap;
use super::{ingest_bytes, IngestError, Ingested, SourceFormat};

const SAMPLE_DEVICES_JSON: &[u8] = include_bytes!("../../fixtures/sample_devices.json");

/// Built-in three-device fleet, read through the regular JSON ingestion path.
pub fn load_sample() -> Result<Ingested, IngestError> {
    ingest_bytes(SAMPLE_DEVICES_JSON, SourceFormat::Json, &ColumnMap::default())
}
