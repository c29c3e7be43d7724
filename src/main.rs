mod aggregate;
mod classify;
mod config;
mod http;
mod ingest;
mod metrics;
mod model;
mod query;
mod state;

use axum::serve;
use clap::Parser;
use config::Config;
use http::{ApiSummary, HttpAppState};
use ingest::source::{Source, SourceLoader};
use metrics::{now_unix, Metrics};
use state::{Pipeline, State};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

#[derive(Parser, Debug)]
#[command(name = "fleetdash")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// CSV or JSON file to load instead of the configured source
    #[arg(long, conflicts_with = "sample")]
    source: Option<String>,
    /// Use the built-in three-device sample fleet
    #[arg(long, conflicts_with = "source")]
    sample: bool,
    /// Load once, print the summary as JSON and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };
    if let Some(path) = cli.source {
        cfg.source.path = Some(path);
        cfg.source.url = None;
    } else if cli.sample {
        cfg.source.path = None;
        cfg.source.url = None;
    }

    let pipeline = Arc::new(Pipeline::from_config(&cfg));
    let source = Source::from_config(&cfg.source);
    let loader = Arc::new(SourceLoader::new(
        source,
        cfg.source.format,
        Duration::from_millis(cfg.source.timeout_ms),
        pipeline.columns.clone(),
    ));

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            std::process::exit(1);
        }
    };
    let shared_state = Arc::new(RwLock::new(State::new(now_unix())));
    let app_state = HttpAppState {
        metrics: metrics.clone(),
        state: shared_state.clone(),
        pipeline: pipeline.clone(),
    };

    let loaded = reload(&app_state, &loader).await;

    if cli.once {
        let summary = {
            let guard = shared_state.read().await;
            ApiSummary::from(&*guard)
        };
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{text}"),
            Err(err) => error!(error = %err, "не удалось сериализовать сводку"),
        }
        if !loaded {
            std::process::exit(1);
        }
        return;
    }

    info!(
        listen = %cfg.listen,
        source = %loader.source,
        reload_interval_secs = cfg.reload_interval_secs,
        "запуск fleetdash"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let cfg = cfg.clone();
        let metrics = metrics.clone();
        let http_state = shared_state.clone();
        let pipeline = pipeline.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, http_state, pipeline);
            let addr: SocketAddr = match cfg.listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %cfg.listen, "некорректный адрес listen");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "не удалось запустить HTTP-сервер");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "ошибка HTTP-сервера");
            }
        })
    };

    let reload_task = if cfg.reload_interval_secs > 0 {
        let period = Duration::from_secs(cfg.reload_interval_secs);
        let app_state = app_state.clone();
        let loader = loader.clone();
        let mut shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("получен сигнал остановки цикла перезагрузки");
                        break;
                    }
                    _ = ticker.tick() => {
                        reload(&app_state, &loader).await;
                    }
                }
            }
        }))
    } else {
        None
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
    }
    info!("получен Ctrl+C, выполняется остановка");

    let _ = shutdown_tx.send(true);

    if let Some(task) = reload_task {
        let _ = task.await;
    }
    let _ = http_task.await;
}

/// A missing default config file means built-in defaults; an explicit path must exist.
fn load_config(path: &str) -> Result<Config, config::ConfigError> {
    if path == DEFAULT_CONFIG_PATH && !Path::new(path).exists() {
        warn!(path, "файл конфигурации не найден, используются значения по умолчанию");
        return Ok(Config::default());
    }
    Config::load_from_file(path)
}

async fn reload(app_state: &HttpAppState, loader: &SourceLoader) -> bool {
    let label = loader.source.to_string();
    let result = loader.load().await;
    app_state
        .apply_load(&label, loader.source.kind(), result)
        .await
        .is_ok()
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
