//! # Proximity Receiver
//!
//! Receptor de telemetria de proximidade. Escuta pacotes JSON por UDP e,
//! opcionalmente, as linhas do classificador FOMO pela serial. Mantém um
//! store único com histórico, eventos e estado de alerta por fonte, e
//! publica um snapshot do dashboard a cada tick.
//!
//! Nível de log via `RUST_LOG` (padrão `info`).

mod dashboard;
mod error;
mod net_thread;
mod serial_thread;
mod shutdown;

use dashboard::PollerConfig;
use net_thread::UdpListener;
use shutdown::Shutdown;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use telemetry_core::alerts::AlertParams;
use telemetry_core::config::AppConfig;
use telemetry_core::store::{StoreLimits, TelemetryStore};
use telemetry_core::view::ViewParams;
use tracing::{debug, error, info, warn};

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);

    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar {}: {e}", config_path.display());
        }
    }
    for problem in config.validate() {
        warn!("Config: {problem}");
    }

    // ── Store ──
    let store = Arc::new(TelemetryStore::new(StoreLimits::from(&config.history)));
    store.reset();
    let alert_params = AlertParams::from(&config.alerts);
    let shutdown = Shutdown::new();

    // ── UDP ──
    let listener = match UdpListener::bind(&config.udp.bind_addr()) {
        Ok(listener) => listener,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let _udp = listener.spawn(Arc::clone(&store), alert_params, shutdown.clone());

    // ── Serial ──
    let _serial = config.serial.enabled.then(|| {
        serial_thread::spawn_serial_reader(config.serial.clone(), Arc::clone(&store), shutdown.clone())
    });

    // ── Snapshot ──
    let selected = config.dashboard.selected_source.trim();
    let poller = PollerConfig {
        params: ViewParams::from_config(&config),
        selected_source: (!selected.is_empty()).then(|| selected.to_owned()),
        interval: config.dashboard.refresh_interval(),
        export_dir: config.export.enabled.then(|| PathBuf::from(&config.export.directory)),
    };
    let rx = dashboard::spawn_snapshot_poller(Arc::clone(&store), poller, shutdown.clone());

    info!(
        "Receptor ativo (safe {} mm, histerese {} mm, dwell {} s)",
        alert_params.safe_distance_mm, alert_params.hysteresis_mm, alert_params.min_dwell_seconds
    );

    let mut last_summary = String::new();
    for view in rx {
        let summary = view.summary_text();
        if summary != last_summary {
            info!("\n{summary}");
            last_summary = summary;
        } else {
            debug!("Snapshot sem mudanças ({} fontes)", view.sources.len());
        }
    }

    shutdown.trigger();
    ExitCode::SUCCESS
}
