//! Thread que lê o classificador FOMO pela porta serial.
//!
//! Cada linha `label=<token> ... prob=<float>` vira snapshot `fomo` + evento
//! `FOMO`. Qualquer falha de I/O fecha a porta e reabre após um atraso fixo.

use crate::error::ListenerError;
use crate::shutdown::Shutdown;
use std::io::{self, BufRead, BufReader};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use telemetry_core::config::SerialConfig;
use telemetry_core::protocol::parse_classification_line;
use telemetry_core::store::TelemetryStore;
use tracing::{debug, error, info, trace, warn};

const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Inicia a thread serial.
pub fn spawn_serial_reader(
    cfg: SerialConfig,
    store: Arc<TelemetryStore>,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("serial-{}", cfg.source_id))
        .spawn(move || serial_loop(&cfg, &store, &shutdown))
        .expect("Falha ao criar thread serial")
}

fn serial_loop(cfg: &SerialConfig, store: &TelemetryStore, shutdown: &Shutdown) {
    let retry = cfg.retry_delay();
    while !shutdown.is_triggered() {
        info!("[{}] Abrindo {} @ {} ...", cfg.source_id, cfg.port, cfg.baud);
        match open_port(cfg) {
            Ok(port) => {
                info!("[{}] OK, escutando", cfg.source_id);
                match pump_lines(BufReader::new(port), store, &cfg.source_id, shutdown) {
                    Ok(()) => debug!("[{}] Porta serial fechada", cfg.source_id),
                    Err(e) => warn!("[{}] Erro serial: {e}", cfg.source_id),
                }
            }
            Err(e) => error!("[{}] {e}", cfg.source_id),
        }
        if shutdown.is_triggered() {
            break;
        }
        std::thread::sleep(retry);
    }
    info!("[{}] Leitor serial encerrado", cfg.source_id);
}

fn open_port(cfg: &SerialConfig) -> Result<Box<dyn serialport::SerialPort>, ListenerError> {
    let map_err = |source| ListenerError::SerialOpen {
        port: cfg.port.clone(),
        source,
    };
    let port = serialport::new(&cfg.port, cfg.baud)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(map_err)?;
    port.clear(serialport::ClearBuffer::All).map_err(map_err)?;
    Ok(port)
}

/// Consome linhas até EOF, erro de I/O ou parada.
///
/// Timeouts de leitura não são erro: os bytes parciais ficam no buffer e a
/// linha é completada na próxima leitura.
pub fn pump_lines<R: BufRead>(
    mut reader: R,
    store: &TelemetryStore,
    source_id: &str,
    shutdown: &Shutdown,
) -> io::Result<()> {
    let mut buf = Vec::new();
    while !shutdown.is_triggered() {
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return Ok(()),
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if let Some((label, prob)) = parse_classification_line(line) {
                    store.ingest_classification(source_id, &label, prob);
                } else if !line.is_empty() {
                    trace!("[{source_id}] Linha ignorada: {line}");
                }
                buf.clear();
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
