mod collectors;
mod config;
mod credentials;
mod health;
mod http;
mod inventory;
mod metrics;
mod orchestrator;
mod records;
mod store;
#[cfg(test)]
mod testing;
mod time;

use axum::serve;
use clap::Parser;
use collectors::api::HttpConnector;
use config::Config;
use metrics::Metrics;
use orchestrator::{CycleSettings, Orchestrator};
use std::net::SocketAddr;
use std::sync::Arc;
use store::Store;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "vinventd")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Run a single refresh cycle in the foreground and exit.
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

    let cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };
    let daily_offset = match cfg.schedule.daily_offset_secs() {
        Ok(offset) => offset,
        Err(err) => {
            error!(error = %err, "некорректное расписание");
            std::process::exit(1);
        }
    };

    info!(
        listen = %cfg.listen,
        endpoints = cfg.endpoints.len(),
        daily_at = %cfg.schedule.daily_at,
        "запуск vinventd"
    );
    if cfg.collection.accept_invalid_certs {
        warn!("проверка TLS-сертификатов конечных точек отключена (доверенная внутренняя сеть)");
    }

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            std::process::exit(1);
        }
    };
    let store = match Store::open(&cfg.database_path) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(error = %err, path = %cfg.database_path, "не удалось открыть хранилище");
            std::process::exit(1);
        }
    };
    let connector = match HttpConnector::new(&cfg.collection) {
        Ok(connector) => Arc::new(connector),
        Err(err) => {
            error!(error = %err, "не удалось создать HTTP-клиент");
            std::process::exit(1);
        }
    };
    let credentials = credentials::from_config(&cfg.credentials);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrator = Orchestrator::new(
        CycleSettings::from(&cfg),
        connector,
        credentials,
        store.clone(),
        metrics.clone(),
        shutdown_rx.clone(),
    );

    if cli.once {
        match orchestrator.run_once().await {
            Ok(summary) => {
                info!(
                    run_count = summary.run.run_count,
                    failed_endpoints = summary.failed_endpoints.len(),
                    "однократный сбор завершён"
                );
                return;
            }
            Err(err) => {
                error!(error = %err, "однократный сбор завершился ошибкой");
                std::process::exit(1);
            }
        }
    }

    let http_task = {
        let cfg = cfg.clone();
        let metrics = metrics.clone();
        let store = store.clone();
        let orchestrator = orchestrator.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, store, orchestrator);
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

    let scheduler_task = tokio::spawn(
        orchestrator
            .clone()
            .run_scheduler(daily_offset, cfg.schedule.run_on_start),
    );

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
    }
    info!("получен Ctrl+C, выполняется остановка");

    let _ = shutdown_tx.send(true);

    let _ = scheduler_task.await;
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
