//! Sistema de alertas de proximidade – histerese + debounce por fonte.
//!
//! Dois estados (`in_alert` falso/verdadeiro). A faixa morta
//! `[safe - hyst, safe + hyst]` segura o estado atual; fora dela surge um
//! candidato, que só é aplicado se `min_dwell_seconds` já passou desde a
//! última transição aplicada.

use crate::config::AlertConfig;
use crate::types::EventKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Parâmetros de avaliação.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertParams {
    pub safe_distance_mm: f64,
    pub hysteresis_mm: f64,
    pub min_dwell_seconds: f64,
}

impl AlertParams {
    pub fn lower(&self) -> f64 {
        self.safe_distance_mm - self.hysteresis_mm
    }

    pub fn upper(&self) -> f64 {
        self.safe_distance_mm + self.hysteresis_mm
    }
}

impl From<&AlertConfig> for AlertParams {
    fn from(cfg: &AlertConfig) -> Self {
        Self {
            safe_distance_mm: cfg.safe_distance_mm,
            hysteresis_mm: cfg.hysteresis_mm,
            min_dwell_seconds: cfg.min_dwell_seconds,
        }
    }
}

/// Estado de alerta de uma fonte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    pub in_alert: bool,
    /// Início do alerta atual
    pub alert_start_time: Option<f64>,
    /// Última transição aplicada (base do debounce)
    pub last_change_time: Option<f64>,
}

/// Transição aplicada, pronta para virar evento.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertTransition {
    Enter {
        distance_mm: f64,
        safe_distance_mm: f64,
    },
    Exit {
        dwell_seconds: f64,
        safe_distance_mm: f64,
    },
}

impl AlertTransition {
    pub fn kind(&self) -> EventKind {
        match self {
            AlertTransition::Enter { .. } => EventKind::AlertEnter,
            AlertTransition::Exit { .. } => EventKind::AlertExit,
        }
    }

    pub fn payload(&self) -> Map<String, Value> {
        let value = match *self {
            AlertTransition::Enter {
                distance_mm,
                safe_distance_mm,
            } => json!({ "distance_mm": distance_mm, "safe_distance_mm": safe_distance_mm }),
            AlertTransition::Exit {
                dwell_seconds,
                safe_distance_mm,
            } => json!({ "dwell_seconds": dwell_seconds, "safe_distance_mm": safe_distance_mm }),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// Estado candidato pela regra de histerese.
pub fn candidate(in_alert: bool, distance_mm: f64, params: &AlertParams) -> bool {
    if distance_mm < params.lower() {
        true
    } else if distance_mm > params.upper() {
        false
    } else {
        in_alert
    }
}

/// Avalia uma leitura e retorna o novo estado + transição aplicada (se houver).
///
/// Sem `last_change_time` (fonte nova), a âncora do debounce é o próprio
/// `timestamp` desta leitura e fica gravada no estado: a primeira virada só
/// é aplicada na mesma leitura se `min_dwell_seconds == 0`.
pub fn evaluate(
    state: &AlertState,
    distance_mm: f64,
    timestamp: f64,
    params: &AlertParams,
) -> (AlertState, Option<AlertTransition>) {
    let mut next = *state;
    let last_change = *next.last_change_time.get_or_insert(timestamp);

    let wanted = candidate(state.in_alert, distance_mm, params);
    if wanted == state.in_alert {
        return (next, None);
    }
    if timestamp - last_change < params.min_dwell_seconds {
        return (next, None); // debounce
    }

    next.in_alert = wanted;
    next.last_change_time = Some(timestamp);

    let transition = if wanted {
        next.alert_start_time = Some(timestamp);
        AlertTransition::Enter {
            distance_mm,
            safe_distance_mm: params.safe_distance_mm,
        }
    } else {
        let start = state.alert_start_time.unwrap_or(timestamp);
        AlertTransition::Exit {
            dwell_seconds: round_centis(timestamp - start),
            safe_distance_mm: params.safe_distance_mm,
        }
    };
    (next, Some(transition))
}

fn round_centis(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}
