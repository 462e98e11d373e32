//! Store compartilhado de telemetria.
//!
//! Todas as tabelas (snapshots, histórico, eventos, estados de alerta e
//! offsets de timestamp) ficam atrás de um único `Mutex`. Cada pacote é
//! aplicado numa seção crítica só (normaliza → snapshot → histórico →
//! alerta), e o leitor do dashboard também lê tudo numa aquisição só.
//! O lock nunca é segurado durante I/O.

use crate::alerts::{self, AlertParams, AlertState};
use crate::config::HistoryConfig;
use crate::normalize::{Clock, SystemClock, TimestampNormalizer};
use crate::protocol::{RawEvent, TelemetryRecord};
use crate::types::{Event, EventKind, HistoryPoint, Mode, SourceId, TelemetrySnapshot};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Capacidades dos buffers circulares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    /// Pontos por fonte
    pub history_capacity: usize,
    /// Tamanho do log de eventos
    pub event_capacity: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            history_capacity: 20_000,
            event_capacity: 100_000,
        }
    }
}

impl From<&HistoryConfig> for StoreLimits {
    fn from(cfg: &HistoryConfig) -> Self {
        Self {
            history_capacity: cfg.max_points,
            event_capacity: cfg.max_events,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    snapshots: BTreeMap<SourceId, TelemetrySnapshot>,
    history: HashMap<SourceId, VecDeque<HistoryPoint>>,
    events: VecDeque<Event>,
    alerts: HashMap<SourceId, AlertState>,
    normalizer: TimestampNormalizer,
}

impl StoreState {
    fn push_history(&mut self, source_id: &str, point: HistoryPoint, capacity: usize) {
        let deque = self.history.entry(source_id.to_owned()).or_default();
        push_bounded(deque, point, capacity);
    }

    fn push_event(&mut self, event: Event, capacity: usize) {
        push_bounded(&mut self.events, event, capacity);
    }
}

fn push_bounded<T>(deque: &mut VecDeque<T>, value: T, capacity: usize) {
    while deque.len() >= capacity {
        deque.pop_front();
    }
    deque.push_back(value);
}

/// Resultado da ingestão de uma leitura.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    /// Timestamp absoluto atribuído
    pub ts: f64,
    /// Evento de alerta emitido nesta leitura
    pub alert: Option<Event>,
}

/// Visão emprestada de todas as tabelas, válida dentro de uma aquisição do lock.
pub struct StoreView<'a> {
    /// "Agora" no momento da leitura
    pub now: f64,
    state: &'a StoreState,
}

impl<'a> StoreView<'a> {
    /// Fontes em ordem alfabética.
    pub fn sources(&self) -> impl Iterator<Item = &'a SourceId> + use<'a> {
        self.state.snapshots.keys()
    }

    pub fn snapshot(&self, source_id: &str) -> Option<&'a TelemetrySnapshot> {
        self.state.snapshots.get(source_id)
    }

    /// Histórico em ordem de chegada.
    pub fn history(&self, source_id: &str) -> impl Iterator<Item = &'a HistoryPoint> + use<'a> {
        self.state
            .history
            .get(source_id)
            .into_iter()
            .flat_map(|deque| deque.iter())
    }

    pub fn events(&self) -> &'a VecDeque<Event> {
        &self.state.events
    }

    pub fn alert_state(&self, source_id: &str) -> AlertState {
        self.state.alerts.get(source_id).copied().unwrap_or_default()
    }

    /// Cópia completa e independente do lock.
    pub fn to_owned_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            now: self.now,
            snapshots: self.state.snapshots.clone(),
            history: self
                .state
                .history
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().copied().collect()))
                .collect(),
            events: self.state.events.iter().cloned().collect(),
            alerts: self
                .state
                .alerts
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }
}

/// Cópia consistente de todas as tabelas.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    pub now: f64,
    pub snapshots: BTreeMap<SourceId, TelemetrySnapshot>,
    pub history: BTreeMap<SourceId, Vec<HistoryPoint>>,
    pub events: Vec<Event>,
    pub alerts: BTreeMap<SourceId, AlertState>,
}

/// Store compartilhado entre listeners e dashboard (via `Arc`).
pub struct TelemetryStore {
    state: Mutex<StoreState>,
    limits: StoreLimits,
    clock: Arc<dyn Clock>,
}

impl TelemetryStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self::with_clock(limits, Arc::new(SystemClock))
    }

    pub fn with_clock(limits: StoreLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            limits: StoreLimits {
                history_capacity: limits.history_capacity.max(1),
                event_capacity: limits.event_capacity.max(1),
            },
            clock,
        }
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // Um listener que entrou em pânico não derruba os demais
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Limpa todas as tabelas. Chamar antes de iniciar os listeners.
    pub fn reset(&self) {
        *self.lock() = StoreState::default();
    }

    /// Normaliza um timestamp usando o cache de offsets do store.
    pub fn normalize(&self, source_id: &str, raw_ts: f64) -> f64 {
        let now = self.clock.now();
        self.lock().normalizer.normalize(source_id, raw_ts, now)
    }

    pub fn upsert_snapshot(&self, snapshot: TelemetrySnapshot) {
        self.lock().snapshots.insert(snapshot.cam_id.clone(), snapshot);
    }

    pub fn append_history(&self, source_id: &str, point: HistoryPoint) {
        let capacity = self.limits.history_capacity;
        self.lock().push_history(source_id, point, capacity);
    }

    pub fn append_event(&self, event: Event) {
        let capacity = self.limits.event_capacity;
        self.lock().push_event(event, capacity);
    }

    pub fn alert_state(&self, source_id: &str) -> AlertState {
        self.lock().alerts.get(source_id).copied().unwrap_or_default()
    }

    /// Processa uma leitura de telemetria numa única seção crítica.
    pub fn ingest_telemetry(&self, record: TelemetryRecord, params: &AlertParams) -> IngestOutcome {
        let now = self.clock.now();
        let mut guard = self.lock();
        let state = &mut *guard;

        let source_id = record.source_id;
        let ts = state
            .normalizer
            .normalize(&source_id, record.raw_ts.unwrap_or(now), now);

        state.snapshots.insert(
            source_id.clone(),
            TelemetrySnapshot {
                ts,
                cam_id: source_id.clone(),
                mode: record.mode,
                tof_mm: record.distance_mm,
                fps: record.fps,
                people: record.count,
                fomo_label: None,
                fomo_prob: None,
                extra: record.extra,
            },
        );

        let Some(distance_mm) = record.distance_mm else {
            return IngestOutcome { ts, alert: None };
        };

        state.push_history(
            &source_id,
            HistoryPoint {
                ts,
                distance_mm,
                fps: record.fps,
                count: record.count,
            },
            self.limits.history_capacity,
        );

        let current = state.alerts.entry(source_id.clone()).or_default();
        let (next, transition) = alerts::evaluate(current, distance_mm, ts, params);
        *current = next;

        let alert = transition.map(|t| Event {
            time: now,
            cam_id: source_id,
            event: t.kind(),
            payload: t.payload(),
        });
        if let Some(event) = &alert {
            state.push_event(event.clone(), self.limits.event_capacity);
        }

        IngestOutcome { ts, alert }
    }

    /// Registra um evento repassado pelo sensor.
    pub fn ingest_event(&self, raw: RawEvent) -> Event {
        let now = self.clock.now();
        let mut state = self.lock();
        let time = state
            .normalizer
            .normalize(&raw.source_id, raw.raw_ts.unwrap_or(now), now);
        let event = Event {
            time,
            cam_id: raw.source_id,
            event: EventKind::Raw(raw.kind),
            payload: raw.payload,
        };
        state.push_event(event.clone(), self.limits.event_capacity);
        event
    }

    /// Snapshot `fomo` + evento `FOMO` vindos da serial, numa seção crítica.
    pub fn ingest_classification(&self, source_id: &str, label: &str, prob: f64) -> f64 {
        let now = self.clock.now();
        let mut state = self.lock();
        state.snapshots.insert(
            source_id.to_owned(),
            TelemetrySnapshot {
                ts: now,
                cam_id: source_id.to_owned(),
                mode: Mode::Fomo,
                fomo_label: Some(label.to_owned()),
                fomo_prob: Some(prob),
                ..Default::default()
            },
        );
        let payload = match json!({ "label": label, "prob": prob }) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        state.push_event(
            Event {
                time: now,
                cam_id: source_id.to_owned(),
                event: EventKind::Raw("FOMO".into()),
                payload,
            },
            self.limits.event_capacity,
        );
        now
    }

    /// Executa `f` com todas as tabelas sob uma única aquisição do lock.
    pub fn with_view<R>(&self, f: impl FnOnce(&StoreView<'_>) -> R) -> R {
        let now = self.clock.now();
        let state = self.lock();
        f(&StoreView { now, state: &*state })
    }

    /// Cópia consistente de tudo.
    pub fn read_snapshot_view(&self) -> StoreSnapshot {
        self.with_view(|view| view.to_owned_snapshot())
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(StoreLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::ManualClock;
    use std::thread;

    const NOW: f64 = 1_760_000_000.0;

    fn store_with_clock(limits: StoreLimits) -> (TelemetryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(NOW));
        (TelemetryStore::with_clock(limits, clock.clone()), clock)
    }

    fn record(source: &str, ts: Option<f64>, distance: Option<f64>) -> TelemetryRecord {
        TelemetryRecord {
            source_id: source.into(),
            raw_ts: ts,
            mode: Mode::Tof,
            distance_mm: distance,
            fps: None,
            count: None,
            extra: Map::new(),
        }
    }

    fn params(dwell: f64) -> AlertParams {
        AlertParams {
            safe_distance_mm: 400.0,
            hysteresis_mm: 100.0,
            min_dwell_seconds: dwell,
        }
    }

    #[test]
    fn cam1_enters_alert() {
        let (store, _) = store_with_clock(StoreLimits::default());
        let out = store.ingest_telemetry(record("cam-1", None, Some(150.0)), &params(0.0));

        let alert = out.alert.expect("deveria entrar em alerta");
        assert_eq!(alert.event, EventKind::AlertEnter);
        assert_eq!(alert.payload["distance_mm"].as_f64(), Some(150.0));
        assert_eq!(alert.payload["safe_distance_mm"].as_f64(), Some(400.0));

        let view = store.read_snapshot_view();
        assert_eq!(view.snapshots["cam-1"].tof_mm, Some(150.0));
        assert!(view.alerts["cam-1"].in_alert);
        assert_eq!(view.events.len(), 1);
        assert_eq!(view.history["cam-1"].len(), 1);
    }

    #[test]
    fn history_is_bounded_and_evicts_oldest() {
        let limits = StoreLimits {
            history_capacity: 5,
            event_capacity: 10,
        };
        let (store, _) = store_with_clock(limits);
        for i in 0..12 {
            store.append_history(
                "cam",
                HistoryPoint {
                    ts: NOW + i as f64,
                    distance_mm: 1000.0 + i as f64,
                    fps: None,
                    count: None,
                },
            );
        }
        let view = store.read_snapshot_view();
        let points = &view.history["cam"];
        assert_eq!(points.len(), 5);
        assert_eq!(points[0].distance_mm, 1007.0);
        assert_eq!(points[4].distance_mm, 1011.0);
    }

    #[test]
    fn default_capacity_holds_under_sustained_input() {
        let (store, _) = store_with_clock(StoreLimits::default());
        for i in 0..20_050 {
            store.ingest_telemetry(record("cam", Some(NOW + i as f64), Some(900.0)), &params(0.0));
        }
        let view = store.read_snapshot_view();
        assert_eq!(view.history["cam"].len(), 20_000);
        assert_eq!(view.history["cam"][0].ts, NOW + 50.0);
    }

    #[test]
    fn event_log_is_bounded() {
        let limits = StoreLimits {
            history_capacity: 10,
            event_capacity: 3,
        };
        let (store, _) = store_with_clock(limits);
        for i in 0..5 {
            store.append_event(Event {
                time: NOW + i as f64,
                cam_id: "cam".into(),
                event: EventKind::Raw(format!("e{i}")),
                payload: Map::new(),
            });
        }
        let kinds: Vec<String> = store
            .read_snapshot_view()
            .events
            .iter()
            .map(|e| e.event.to_string())
            .collect();
        assert_eq!(kinds, ["e2", "e3", "e4"]);
    }

    #[test]
    fn history_keeps_arrival_order() {
        let (store, _) = store_with_clock(StoreLimits::default());
        for ts in [NOW + 5.0, NOW + 1.0, NOW + 3.0] {
            store.ingest_telemetry(record("cam", Some(ts), Some(900.0)), &params(0.0));
        }
        let ts: Vec<f64> = store.read_snapshot_view().history["cam"]
            .iter()
            .map(|p| p.ts)
            .collect();
        assert_eq!(ts, [NOW + 5.0, NOW + 1.0, NOW + 3.0]);
    }

    #[test]
    fn snapshot_is_overwritten_wholesale() {
        let (store, _) = store_with_clock(StoreLimits::default());
        let mut first = record("cam", None, Some(300.0));
        first.fps = Some(30.0);
        first.extra.insert("rssi".into(), json!(-50));
        store.ingest_telemetry(first, &params(0.0));
        store.ingest_telemetry(record("cam", None, Some(800.0)), &params(0.0));

        let snap = store.read_snapshot_view().snapshots["cam"].clone();
        assert_eq!(snap.tof_mm, Some(800.0));
        assert_eq!(snap.fps, None);
        assert!(snap.extra.is_empty());
    }

    #[test]
    fn telemetry_without_distance_only_updates_snapshot() {
        let (store, _) = store_with_clock(StoreLimits::default());
        let out = store.ingest_telemetry(record("cam", None, None), &params(0.0));
        assert_eq!(out.ts, NOW);
        let view = store.read_snapshot_view();
        assert!(view.snapshots.contains_key("cam"));
        assert!(view.history.is_empty());
        assert!(view.alerts.is_empty());
    }

    #[test]
    fn relative_timestamps_share_offset() {
        let (store, clock) = store_with_clock(StoreLimits::default());
        let a = store.ingest_telemetry(record("cam", Some(10.0), Some(900.0)), &params(0.0));
        clock.advance(30.0);
        let b = store.ingest_telemetry(record("cam", Some(12.0), Some(900.0)), &params(0.0));
        assert_eq!(a.ts, NOW);
        assert_eq!(b.ts - a.ts, 2.0);
    }

    #[test]
    fn identical_packets_emit_single_transition() {
        let (store, clock) = store_with_clock(StoreLimits::default());
        for _ in 0..10 {
            store.ingest_telemetry(record("cam", None, Some(150.0)), &params(0.0));
            clock.advance(0.5);
        }
        assert_eq!(store.read_snapshot_view().events.len(), 1);
    }

    #[test]
    fn debounce_through_store() {
        let (store, clock) = store_with_clock(StoreLimits::default());
        let p = params(0.8);
        store.ingest_telemetry(record("cam", None, Some(900.0)), &p);
        clock.advance(0.25);
        assert!(store.ingest_telemetry(record("cam", None, Some(150.0)), &p).alert.is_none());
        assert!(!store.alert_state("cam").in_alert);
        clock.advance(0.25);
        assert!(store.ingest_telemetry(record("cam", None, Some(150.0)), &p).alert.is_none());
        clock.advance(0.5);
        let out = store.ingest_telemetry(record("cam", None, Some(150.0)), &p);
        assert_eq!(out.alert.map(|e| e.event), Some(EventKind::AlertEnter));
        assert!(store.alert_state("cam").in_alert);
    }

    #[test]
    fn raw_events_and_classification() {
        let (store, _) = store_with_clock(StoreLimits::default());
        let mut payload = Map::new();
        payload.insert("note".into(), json!("door"));
        let ev = store.ingest_event(RawEvent {
            source_id: "cam".into(),
            raw_ts: Some(1_700_000_000_000.0),
            kind: "manual_alarm".into(),
            payload,
        });
        assert_eq!(ev.time, 1_700_000_000.0);
        assert_eq!(ev.event, EventKind::Raw("manual_alarm".into()));

        store.ingest_classification("nicla-02", "person", 0.91);
        let view = store.read_snapshot_view();
        // evento não cria snapshot
        assert!(!view.snapshots.contains_key("cam"));
        let snap = &view.snapshots["nicla-02"];
        assert_eq!(snap.mode, Mode::Fomo);
        assert_eq!(snap.fomo_label.as_deref(), Some("person"));
        assert_eq!(view.events.len(), 2);
        assert_eq!(view.events[1].payload["prob"].as_f64(), Some(0.91));
    }

    #[test]
    fn reset_clears_every_table() {
        let (store, _) = store_with_clock(StoreLimits::default());
        store.ingest_telemetry(record("cam", Some(5.0), Some(100.0)), &params(0.0));
        store.reset();
        let view = store.read_snapshot_view();
        assert!(view.snapshots.is_empty());
        assert!(view.history.is_empty());
        assert!(view.events.is_empty());
        assert!(view.alerts.is_empty());
        assert!(store.with_view(|v| v.sources().next().is_none()));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let store = TelemetryStore::new(StoreLimits {
            history_capacity: 0,
            event_capacity: 0,
        });
        store.append_history(
            "cam",
            HistoryPoint {
                ts: 1.0,
                distance_mm: 1.0,
                fps: None,
                count: None,
            },
        );
        assert_eq!(store.read_snapshot_view().history["cam"].len(), 1);
    }

    #[test]
    fn concurrent_writers_keep_snapshot_and_history_in_step() {
        let store = Arc::new(TelemetryStore::default());
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..500 {
                        let d = 1000.0 + i as f64;
                        store.ingest_telemetry(record(&format!("cam-{n}"), None, Some(d)), &params(0.0));
                    }
                })
            })
            .collect();

        // o leitor nunca vê snapshot sem o ponto de histórico correspondente
        for _ in 0..200 {
            store.with_view(|v| {
                for source in v.sources() {
                    let last = v.history(source).last().map(|p| p.distance_mm);
                    assert_eq!(last, v.snapshot(source).and_then(|s| s.tof_mm));
                }
            });
        }
        for h in handles {
            h.join().unwrap();
        }
        let view = store.read_snapshot_view();
        assert_eq!(view.snapshots.len(), 4);
        assert!(view.history.values().all(|h| h.len() == 500));
    }
}
