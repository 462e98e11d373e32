//! # Telemetry Core
//!
//! Crate compartilhada do receptor de telemetria de proximidade: tipos,
//! normalização de timestamps, store compartilhado, motor de alertas com
//! histerese/debounce, protocolo de ingestão e montagem do snapshot do
//! dashboard.
//!
//! ## Módulos
//! - [`types`] – Snapshot, ponto de histórico e eventos
//! - [`normalize`] – Timestamps ms/relativos → segundos Unix
//! - [`store`] – Store único protegido por um `Mutex`
//! - [`alerts`] – Máquina de estados de alerta por fonte
//! - [`protocol`] – Decode dos pacotes UDP JSON e das linhas seriais
//! - [`view`] – Snapshot consistente para o dashboard
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod normalize;
pub mod store;
pub mod alerts;
pub mod protocol;
pub mod view;
pub mod config;

// Re-exports convenientes
pub use alerts::{AlertParams, AlertState};
pub use config::AppConfig;
pub use protocol::{Packet, PacketError, decode_datagram};
pub use store::{StoreLimits, TelemetryStore};
pub use types::{Event, EventKind, HistoryPoint, TelemetrySnapshot};
pub use view::{DashboardView, ViewData, ViewParams, build_view};
