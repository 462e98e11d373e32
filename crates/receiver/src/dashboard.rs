//! Poller do snapshot do dashboard.
//!
//! A cada tick monta um [`DashboardView`] com uma única leitura do store e
//! entrega ao consumidor por um canal limitado. Se o consumidor estiver
//! atrasado o tick é descartado, nunca enfileirado.

use crate::shutdown::Shutdown;
use crossbeam_channel::{Receiver, TrySendError, bounded, tick};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use telemetry_core::store::TelemetryStore;
use telemetry_core::view::{DashboardView, ViewParams, build_view};
use tracing::{debug, info, warn};

/// Nome do arquivo escrito pela exportação.
pub const EXPORT_FILE: &str = "latest_view.json";

const CHANNEL_CAPACITY: usize = 4;

/// Configuração do poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub params: ViewParams,
    pub selected_source: Option<String>,
    pub interval: Duration,
    /// Diretório de exportação JSON (None = desligado)
    pub export_dir: Option<PathBuf>,
}

/// Inicia a thread que produz um snapshot por tick.
///
/// O canal fecha quando `shutdown` é acionado ou o receptor é descartado.
pub fn spawn_snapshot_poller(
    store: Arc<TelemetryStore>,
    cfg: PollerConfig,
    shutdown: Shutdown,
) -> Receiver<DashboardView> {
    let (tx, rx) = bounded(CHANNEL_CAPACITY);
    let interval = cfg.interval.max(Duration::from_millis(10));

    std::thread::Builder::new()
        .name("snapshot-poller".into())
        .spawn(move || {
            let ticker = tick(interval);
            while !shutdown.is_triggered() {
                if ticker.recv().is_err() {
                    break;
                }
                let view = build_view(&store, cfg.selected_source.as_deref(), &cfg.params);

                if let Some(dir) = &cfg.export_dir {
                    if let Err(e) = export_view(&view, dir) {
                        warn!("Falha ao exportar snapshot em {}: {e}", dir.display());
                    }
                }

                match tx.try_send(view) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => debug!("Consumidor atrasado, snapshot descartado"),
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            info!("Poller de snapshot encerrado");
        })
        .expect("Falha ao criar thread do poller");

    rx
}

/// Grava o snapshot como JSON indentado em `dir/latest_view.json`.
///
/// Escreve num arquivo temporário e renomeia, para quem lê nunca ver um
/// arquivo pela metade.
pub fn export_view(view: &DashboardView, dir: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let json = serde_json::to_vec_pretty(view)?;
    let path = dir.join(EXPORT_FILE);
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, &path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};
    use telemetry_core::alerts::AlertParams;
    use telemetry_core::normalize::ManualClock;
    use telemetry_core::protocol::decode_datagram;
    use telemetry_core::protocol::Packet;
    use telemetry_core::store::StoreLimits;

    const NOW: f64 = 1_760_000_000.0;

    fn params() -> ViewParams {
        ViewParams {
            safe_distance_mm: 400.0,
            window_seconds: 300.0,
            max_events: 0,
            classification_source: None,
        }
    }

    fn seeded_store() -> Arc<TelemetryStore> {
        let store = TelemetryStore::with_clock(StoreLimits::default(), Arc::new(ManualClock::new(NOW)));
        let alert = AlertParams {
            safe_distance_mm: 400.0,
            hysteresis_mm: 100.0,
            min_dwell_seconds: 0.0,
        };
        let addr = "10.0.0.7:5555".parse().unwrap();
        let Some(Packet::Telemetry(record)) =
            decode_datagram(br#"{"tof_mm": 150, "cam_id": "cam-1"}"#, &addr, 400.0).unwrap()
        else {
            panic!("esperava telemetria");
        };
        store.ingest_telemetry(record, &alert);
        Arc::new(store)
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir().join(format!("proximity-{tag}-{}-{nanos}", std::process::id()))
    }

    #[test]
    fn poller_delivers_views() {
        let shutdown = Shutdown::new();
        let rx = spawn_snapshot_poller(
            seeded_store(),
            PollerConfig {
                params: params(),
                selected_source: None,
                interval: Duration::from_millis(20),
                export_dir: None,
            },
            shutdown.clone(),
        );

        let view = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(view.active_source.as_deref(), Some("cam-1"));
        assert_eq!(view.events.len(), 1);
        assert!(view.summary_text().contains("cam-1 [ALERTA]"));

        shutdown.trigger();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while rx.recv_timeout(Duration::from_millis(100)).is_ok() {
            assert!(std::time::Instant::now() < deadline, "poller não encerrou");
        }
    }

    #[test]
    fn export_writes_latest_view() {
        let dir = scratch_dir("export");
        let view = build_view(&seeded_store(), None, &params());

        let path = export_view(&view, &dir).unwrap();
        assert_eq!(path, dir.join(EXPORT_FILE));

        let parsed: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed["active_source"], "cam-1");
        assert_eq!(parsed["summaries"][0]["cam_id"], "cam-1");
        assert!(!dir.join("latest_view.json.tmp").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
