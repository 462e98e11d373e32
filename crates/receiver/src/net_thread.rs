//! Thread de rede que escuta UDP e aplica cada pacote no store.

use crate::error::ListenerError;
use crate::shutdown::Shutdown;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use telemetry_core::alerts::AlertParams;
use telemetry_core::protocol::{MAX_UDP_PAYLOAD, Packet, PacketError, decode_datagram};
use telemetry_core::store::TelemetryStore;
use telemetry_core::types::{Event, EventKind};
use tracing::{debug, info, warn};

/// Timeout de leitura, para a thread enxergar o sinal de parada.
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// O que aconteceu com um datagrama.
#[derive(Debug, Clone, PartialEq)]
pub enum Handled {
    Empty,
    Telemetry {
        source_id: String,
        alert: Option<Event>,
    },
    Event {
        source_id: String,
    },
}

/// Socket UDP já em bind. Falha de bind é fatal na inicialização.
pub struct UdpListener {
    socket: UdpSocket,
}

impl UdpListener {
    pub fn bind(addr: &str) -> Result<Self, ListenerError> {
        let socket = UdpSocket::bind(addr).map_err(|source| ListenerError::Bind {
            addr: addr.to_owned(),
            source,
        })?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ListenerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Inicia a thread do listener.
    pub fn spawn(
        self,
        store: Arc<TelemetryStore>,
        params: AlertParams,
        shutdown: Shutdown,
    ) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("udp-listener".into())
            .spawn(move || self.run(&store, &params, &shutdown))
            .expect("Falha ao criar thread UDP")
    }

    /// Loop de recepção. Só retorna quando `shutdown` é acionado.
    pub fn run(&self, store: &TelemetryStore, params: &AlertParams, shutdown: &Shutdown) {
        if let Ok(addr) = self.socket.local_addr() {
            info!("UDP escutando em {addr}");
        }

        let mut buf = vec![0u8; MAX_UDP_PAYLOAD + 1];
        while !shutdown.is_triggered() {
            match self.socket.recv_from(&mut buf) {
                Ok((size, addr)) => match handle_datagram(&buf[..size], addr, store, params) {
                    Ok(Handled::Telemetry {
                        source_id,
                        alert: Some(event),
                    }) => log_transition(&source_id, &event),
                    Ok(_) => {}
                    Err(e) => debug!("Pacote inválido de {addr}: {e}"),
                },
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    // Timeout normal, continua
                }
                Err(e) => warn!("Erro ao receber UDP: {e}"),
            }
        }
        info!("Listener UDP encerrado");
    }
}

/// Decodifica um datagrama e aplica no store. Em erro o store não é tocado.
pub fn handle_datagram(
    data: &[u8],
    addr: SocketAddr,
    store: &TelemetryStore,
    params: &AlertParams,
) -> Result<Handled, PacketError> {
    match decode_datagram(data, &addr, params.safe_distance_mm)? {
        None => Ok(Handled::Empty),
        Some(Packet::Event(raw)) => {
            let event = store.ingest_event(raw);
            debug!("Evento {} de {}", event.event, event.cam_id);
            Ok(Handled::Event {
                source_id: event.cam_id,
            })
        }
        Some(Packet::Telemetry(record)) => {
            let source_id = record.source_id.clone();
            let outcome = store.ingest_telemetry(record, params);
            Ok(Handled::Telemetry {
                source_id,
                alert: outcome.alert,
            })
        }
    }
}

fn log_transition(source_id: &str, event: &Event) {
    let payload = serde_json::to_string(&event.payload).unwrap_or_default();
    match event.event {
        EventKind::AlertEnter => warn!("{source_id}: ALERTA {payload}"),
        _ => info!("{source_id}: {} {payload}", event.event),
    }
}
