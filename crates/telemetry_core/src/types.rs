//! Definição de tipos/structs para telemetria de proximidade.
//!
//! O snapshot é um conjunto fechado de campos tipados mais um único mapa
//! `extra` com as chaves desconhecidas do pacote, preservadas como vieram.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Chave opaca de uma fonte (câmera/sensor).
pub type SourceId = String;

// ──────────────────────────────────────────────
// Modo de operação
// ──────────────────────────────────────────────

/// Modo de operação declarado pelo sensor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Mode {
    /// Sensor Time-of-Flight (distância em mm).
    #[default]
    Tof,
    /// Classificador FOMO (label + confiança).
    Fomo,
    /// Modos futuros, mantidos pelo nome.
    Other(String),
}

impl Mode {
    pub fn as_str(&self) -> &str {
        match self {
            Mode::Tof => "tof",
            Mode::Fomo => "fomo",
            Mode::Other(name) => name,
        }
    }
}

impl From<String> for Mode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "tof" => Mode::Tof,
            "fomo" => Mode::Fomo,
            _ => Mode::Other(value),
        }
    }
}

impl From<&str> for Mode {
    fn from(value: &str) -> Self {
        Mode::from(value.to_owned())
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.as_str().to_owned()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────────────────────────────────
// Snapshot
// ──────────────────────────────────────────────

/// Último estado conhecido de uma fonte. Sobrescrito por inteiro a cada pacote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Timestamp absoluto (segundos Unix)
    pub ts: f64,
    pub cam_id: SourceId,
    pub mode: Mode,
    /// Distância medida (mm)
    pub tof_mm: Option<f64>,
    pub fps: Option<f64>,
    /// Contagem de pessoas/objetos (ou proxy derivado da distância)
    pub people: Option<f64>,
    /// Classe reportada em modo `fomo`
    pub fomo_label: Option<String>,
    /// Confiança da classe (0–1)
    pub fomo_prob: Option<f64>,
    /// Campos não reconhecidos, preservados verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ──────────────────────────────────────────────
// Histórico
// ──────────────────────────────────────────────

/// Um ponto da série temporal de uma fonte.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub ts: f64,
    pub distance_mm: f64,
    pub fps: Option<f64>,
    pub count: Option<f64>,
}

// ──────────────────────────────────────────────
// Eventos
// ──────────────────────────────────────────────

/// Tipo de evento no log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    AlertEnter,
    AlertExit,
    /// Evento repassado como veio (ex: `"FOMO"`, `"manual_alarm"`).
    Raw(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::AlertEnter => "ALERT_ENTER",
            EventKind::AlertExit => "ALERT_EXIT",
            EventKind::Raw(name) => name,
        }
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ALERT_ENTER" => EventKind::AlertEnter,
            "ALERT_EXIT" => EventKind::AlertExit,
            _ => EventKind::Raw(value),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_owned()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registro imutável do log de eventos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Instante absoluto (segundos Unix)
    pub time: f64,
    pub cam_id: SourceId,
    pub event: EventKind,
    pub payload: Map<String, Value>,
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
