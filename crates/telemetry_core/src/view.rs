//! Montagem do snapshot consumido pelo dashboard.
//!
//! Só leitura. Tudo sai de uma única aquisição do lock do store, então as
//! tabelas de um mesmo snapshot são sempre do mesmo instante.

use crate::config::AppConfig;
use crate::store::{StoreView, TelemetryStore};
use crate::types::{Event, HistoryPoint, Mode, TelemetrySnapshot};
use chrono::DateTime;
use serde::Serialize;
use std::fmt::Write as _;

/// Confiança mínima para o badge verde de `person`.
pub const PERSON_CONFIDENCE: f64 = 0.70;

/// Parâmetros de leitura.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewParams {
    pub safe_distance_mm: f64,
    /// Janela da tabela e do gráfico (s)
    pub window_seconds: f64,
    /// Eventos mais recentes na tabela (0 = todos)
    pub max_events: usize,
    /// Fonte serial mostrada no badge de classificação
    pub classification_source: Option<String>,
}

impl ViewParams {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            safe_distance_mm: cfg.alerts.safe_distance_mm,
            window_seconds: cfg.history.window_seconds,
            max_events: cfg.history.max_events_in_table,
            classification_source: cfg.serial.enabled.then(|| cfg.serial.source_id.clone()),
        }
    }
}

/// Zona de uma leitura em relação à distância de segurança.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Zone {
    #[serde(rename = "SAFE")]
    Safe,
    #[serde(rename = "ALERT")]
    Alert,
    #[serde(rename = "N/A")]
    Unknown,
}

impl Zone {
    pub fn for_distance(distance_mm: Option<f64>, safe_distance_mm: f64) -> Self {
        match distance_mm {
            Some(d) if d >= safe_distance_mm => Zone::Safe,
            Some(_) => Zone::Alert,
            None => Zone::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Safe => "SAFE",
            Zone::Alert => "ALERT",
            Zone::Unknown => "N/A",
        }
    }
}

/// Resumo de uma fonte conforme o modo.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceStatus {
    Proximity {
        zone: Zone,
        distance_mm: Option<f64>,
        count: Option<f64>,
        fps: Option<f64>,
    },
    Classification {
        label: Option<String>,
        confidence: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub cam_id: String,
    pub mode: String,
    pub last_seen: f64,
    pub in_alert: bool,
    pub status: SourceStatus,
}

/// Linha da tabela de status (um ponto do histórico).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRow {
    pub ts: f64,
    pub time: String,
    pub cam_id: String,
    pub mode: String,
    pub distance_mm: f64,
    pub fps: Option<f64>,
    pub count: Option<f64>,
    pub zone: Zone,
}

/// Ponto do gráfico de distância.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartPoint {
    pub ts: f64,
    pub distance_mm: f64,
    pub zone: Zone,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRow {
    pub time: String,
    pub cam_id: String,
    pub event: String,
    /// Payload em JSON compacto
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeColor {
    Green,
    Yellow,
    Red,
}

impl BadgeColor {
    pub fn for_label(label: &str, confidence: f64) -> Self {
        let label = label.to_lowercase();
        if label == "person" && confidence >= PERSON_CONFIDENCE {
            BadgeColor::Green
        } else if label == "not_person" {
            BadgeColor::Red
        } else {
            BadgeColor::Yellow
        }
    }
}

/// Badge da fonte serial. `label` vazio = aguardando dados.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationBadge {
    pub cam_id: String,
    pub label: Option<String>,
    pub confidence: Option<f64>,
    pub color: Option<BadgeColor>,
}

/// Tudo que o dashboard precisa num tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub generated_at: f64,
    /// Opções do seletor de fonte
    pub sources: Vec<String>,
    pub active_source: Option<String>,
    pub summaries: Vec<SourceSummary>,
    pub status_table: Vec<StatusRow>,
    pub chart: Vec<ChartPoint>,
    pub events: Vec<EventRow>,
    pub last_snapshot: Option<TelemetrySnapshot>,
    pub classification: Option<ClassificationBadge>,
}

impl DashboardView {
    /// Resumo textual, uma linha por fonte.
    pub fn summary_text(&self) -> String {
        if self.summaries.is_empty() {
            return "Aguardando pacotes UDP ou serial...".into();
        }
        let mut out = String::new();
        for s in &self.summaries {
            let alert = if s.in_alert { " [ALERTA]" } else { "" };
            let _ = match &s.status {
                SourceStatus::Proximity {
                    zone,
                    distance_mm,
                    count,
                    fps,
                } => writeln!(
                    out,
                    "{}{alert}: {} | {} mm | count {} | fps {}",
                    s.cam_id,
                    zone.as_str(),
                    fmt_opt(*distance_mm),
                    fmt_opt(*count),
                    fmt_opt(*fps),
                ),
                SourceStatus::Classification { label, confidence } => writeln!(
                    out,
                    "{}{alert}: {} ({})",
                    s.cam_id,
                    label.as_deref().unwrap_or("?").to_uppercase(),
                    confidence.map_or_else(|| "N/A".to_string(), |c| format!("{c:.2}")),
                ),
            };
        }
        out.trim_end().to_owned()
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{v}"))
}

/// ISO-8601 (UTC, segundos) de um timestamp Unix.
pub fn iso_seconds(ts: f64) -> String {
    let secs = ts.floor();
    let nanos = ((ts - secs) * 1e9) as u32;
    DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Cópia mínima das tabelas, tirada sob o lock.
///
/// Só contém o que a renderização consome: snapshots, flag de alerta,
/// pontos dentro da janela e os eventos que vão para a tabela.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewData {
    pub now: f64,
    /// Uma entrada por fonte, em ordem alfabética
    pub sources: Vec<SourceData>,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceData {
    pub snapshot: TelemetrySnapshot,
    pub in_alert: bool,
    /// Pontos dentro da janela, em ordem de chegada
    pub window: Vec<HistoryPoint>,
}

impl ViewData {
    /// Copia as fatias necessárias. Não formata nada.
    pub fn collect(view: &StoreView<'_>, params: &ViewParams) -> Self {
        let cutoff = view.now - params.window_seconds;
        let sources = view
            .sources()
            .filter_map(|id| view.snapshot(id))
            .map(|snap| SourceData {
                snapshot: snap.clone(),
                in_alert: view.alert_state(&snap.cam_id).in_alert,
                window: view
                    .history(&snap.cam_id)
                    .filter(|p| p.ts >= cutoff)
                    .copied()
                    .collect(),
            })
            .collect();

        let log = view.events();
        let skip = match params.max_events {
            0 => 0,
            n => log.len().saturating_sub(n),
        };
        Self {
            now: view.now,
            sources,
            events: log.iter().skip(skip).cloned().collect(),
        }
    }

    fn source(&self, id: &str) -> Option<&SourceData> {
        self.sources.iter().find(|s| s.snapshot.cam_id == id)
    }
}

/// Monta o snapshot com uma única aquisição do lock.
///
/// Sob o lock só se copia; formatação e ordenação rodam depois de soltá-lo.
pub fn build_view(store: &TelemetryStore, selected: Option<&str>, params: &ViewParams) -> DashboardView {
    let data = store.with_view(|view| ViewData::collect(view, params));
    render(&data, selected, params)
}

/// Renderização pura sobre uma cópia já desacoplada do store.
pub fn render(data: &ViewData, selected: Option<&str>, params: &ViewParams) -> DashboardView {
    let sources: Vec<String> = data.sources.iter().map(|s| s.snapshot.cam_id.clone()).collect();
    let active_source = selected
        .filter(|s| sources.iter().any(|known| known == s))
        .map(str::to_owned)
        .or_else(|| sources.first().cloned());
    let active = active_source.as_deref().and_then(|id| data.source(id));

    let summaries = data
        .sources
        .iter()
        .map(|s| summarize(s, params.safe_distance_mm))
        .collect();

    let mut status_table: Vec<StatusRow> = data
        .sources
        .iter()
        .flat_map(|s| {
            let mode = s.snapshot.mode.to_string();
            s.window.iter().map(move |p| StatusRow {
                ts: p.ts,
                time: iso_seconds(p.ts),
                cam_id: s.snapshot.cam_id.clone(),
                mode: mode.clone(),
                distance_mm: p.distance_mm,
                fps: p.fps,
                count: p.count,
                zone: Zone::for_distance(Some(p.distance_mm), params.safe_distance_mm),
            })
        })
        .collect();
    status_table.sort_by(|a, b| a.ts.total_cmp(&b.ts));

    let mut chart: Vec<ChartPoint> = active
        .map(|s| {
            s.window
                .iter()
                .map(|p| ChartPoint {
                    ts: p.ts,
                    distance_mm: p.distance_mm,
                    zone: Zone::for_distance(Some(p.distance_mm), params.safe_distance_mm),
                })
                .collect()
        })
        .unwrap_or_default();
    chart.sort_by(|a, b| a.ts.total_cmp(&b.ts));

    let events = data.events.iter().map(event_row).collect();
    let last_snapshot = active.map(|s| s.snapshot.clone());

    let classification = params
        .classification_source
        .as_deref()
        .map(|id| classification_badge(id, data.source(id).map(|s| &s.snapshot)));

    DashboardView {
        generated_at: data.now,
        sources,
        active_source,
        summaries,
        status_table,
        chart,
        events,
        last_snapshot,
        classification,
    }
}

fn summarize(source: &SourceData, safe_distance_mm: f64) -> SourceSummary {
    let snap = &source.snapshot;
    let status = match snap.mode {
        Mode::Fomo => SourceStatus::Classification {
            label: snap.fomo_label.clone(),
            confidence: snap.fomo_prob,
        },
        _ => SourceStatus::Proximity {
            zone: Zone::for_distance(snap.tof_mm, safe_distance_mm),
            distance_mm: snap.tof_mm,
            count: snap.people,
            fps: snap.fps,
        },
    };
    SourceSummary {
        cam_id: snap.cam_id.clone(),
        mode: snap.mode.to_string(),
        last_seen: snap.ts,
        in_alert: source.in_alert,
        status,
    }
}

fn event_row(event: &Event) -> EventRow {
    EventRow {
        time: iso_seconds(event.time),
        cam_id: event.cam_id.clone(),
        event: event.event.to_string(),
        value: serde_json::to_string(&event.payload).unwrap_or_default(),
    }
}

fn classification_badge(cam_id: &str, snap: Option<&TelemetrySnapshot>) -> ClassificationBadge {
    let fomo = snap.filter(|s| s.mode == Mode::Fomo);
    let label = fomo.and_then(|s| s.fomo_label.clone());
    let confidence = fomo.and_then(|s| s.fomo_prob);
    let color = label
        .as_deref()
        .map(|l| BadgeColor::for_label(l, confidence.unwrap_or(0.0)));
    ClassificationBadge {
        cam_id: cam_id.to_owned(),
        label,
        confidence,
        color,
    }
}
