use super::columns::ColumnMap;
use super::sample::load_sample;
use super::{ingest_bytes, IngestError, Ingested, SourceFormat};
use crate::config::SourceConfig;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Path(PathBuf),
    Url(String),
    Sample,
}

impl Source {
    pub fn from_config(cfg: &SourceConfig) -> Self {
        if let Some(path) = &cfg.path {
            Source::Path(PathBuf::from(path))
        } else if let Some(url) = &cfg.url {
            Source::Url(url.clone())
        } else {
            Source::Sample
        }
    }

    /// Label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Source::Path(_) => "file",
            Source::Url(_) => "url",
            Source::Sample => "sample",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Path(path) => write!(f, "{}", path.display()),
            Source::Url(url) => f.write_str(url),
            Source::Sample => f.write_str("<sample>"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceLoader {
    pub source: Source,
    pub format: SourceFormat,
    pub timeout: Duration,
    pub columns: ColumnMap,
    client: Client,
}

impl SourceLoader {
    pub fn new(source: Source, format: SourceFormat, timeout: Duration, columns: ColumnMap) -> Self {
        let client = Client::builder()
            .user_agent("fleetdash/0.1.0")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            source,
            format,
            timeout,
            columns,
            client,
        }
    }

    /// Performs the single awaited read, then parses synchronously.
    pub async fn load(&self) -> Result<Ingested, IngestError> {
        match &self.source {
            Source::Sample => load_sample(),
            Source::Path(path) => {
                let display = path.display().to_string();
                let format = self.resolve_format(&display, None);
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|source| IngestError::Read {
                        path: display,
                        source,
                    })?;
                ingest_bytes(&bytes, format, &self.columns)
            }
            Source::Url(url) => {
                let fetch_err = |source| IngestError::Fetch {
                    url: url.clone(),
                    source,
                };
                let resp = self
                    .client
                    .get(url)
                    .timeout(self.timeout)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(fetch_err)?;
                let content_type = resp
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let format = self.resolve_format(url, content_type.as_deref());
                let bytes = resp.bytes().await.map_err(fetch_err)?;
                ingest_bytes(&bytes, format, &self.columns)
            }
        }
    }

    fn resolve_format(&self, name: &str, content_type: Option<&str>) -> SourceFormat {
        if self.format != SourceFormat::Auto {
            return self.format;
        }
        SourceFormat::from_name(name)
            .or_else(|| content_type.and_then(SourceFormat::from_content_type))
            .unwrap_or(SourceFormat::Auto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn loader(source: Source) -> SourceLoader {
        SourceLoader::new(
            source,
            SourceFormat::Auto,
            Duration::from_secs(5),
            ColumnMap::default(),
        )
    }

    #[tokio::test]
    async fn loads_csv_file_from_disk() {
        let mut file = tempfile::Builder::new()
            .suffix(".csv")
            .tempfile()
            .expect("временный файл");
        writeln!(file, "id,manufacturer,batteryHealth,totalEnergyConsumption").expect("запись");
        writeln!(file, "dev-1,Lenovo,92%,18").expect("запись");
        file.flush().expect("flush");

        let ingested = loader(Source::Path(file.path().to_path_buf()))
            .load()
            .await
            .expect("файл должен загружаться");
        assert_eq!(ingested.records.len(), 1);
        assert_eq!(ingested.records[0].id, "dev-1");
        assert_eq!(ingested.records[0].battery_health_percent, 92.0);
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let err = loader(Source::Path(PathBuf::from("/nonexistent/fleet.csv")))
            .load()
            .await
            .expect_err("файла нет");
        assert!(matches!(err, IngestError::Read { .. }));
    }

    #[tokio::test]
    async fn loads_excel_workbook_from_disk() {
        let mut file = tempfile::Builder::new()
            .suffix(".xlsx")
            .tempfile()
            .expect("временный файл");
        file.write_all(include_bytes!("../../fixtures/sample_devices.xlsx"))
            .expect("запись");
        file.flush().expect("flush");

        let ingested = loader(Source::Path(file.path().to_path_buf()))
            .load()
            .await
            .expect("книга должна загружаться");
        assert_eq!(ingested.records.len(), 3);
        assert_eq!(ingested.records[0].manufacturer, "Lenovo");
    }

    #[tokio::test]
    async fn sample_source_needs_no_io() {
        let ingested = loader(Source::Sample).load().await.expect("встроенный набор");
        assert_eq!(ingested.records.len(), 3);
    }

    #[test]
    fn source_from_config_prefers_path() {
        let cfg = SourceConfig {
            path: Some("devices.csv".to_string()),
            url: None,
            ..SourceConfig::default()
        };
        assert_eq!(Source::from_config(&cfg), Source::Path(PathBuf::from("devices.csv")));
        assert_eq!(Source::from_config(&SourceConfig::default()), Source::Sample);
        assert_eq!(Source::Sample.kind(), "sample");
    }
}
