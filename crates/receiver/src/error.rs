//! Erros fatais de transporte.

/// Falhas ao abrir um transporte de ingestão.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Falha ao bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Falha ao configurar socket: {0}")]
    Socket(#[from] std::io::Error),

    #[error("Falha ao abrir porta serial {port}: {source}")]
    SerialOpen {
        port: String,
        source: serialport::Error,
    },
}
