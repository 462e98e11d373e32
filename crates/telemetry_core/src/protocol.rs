//! Protocolo de ingestão.
//!
//! UDP: um objeto JSON por datagrama (espaços/quebras de linha nas pontas
//! são ignorados).
//!
//! ```text
//! { "ts": <num?>, "cam_id": <str?>, "tof_mm" | "reading": <num?>,
//!   "fps": <num?>, "people" | "count": <num?>, "mode": <str?>,
//!   "event": <str?> }
//! ```
//!
//! Campos ausentes recebem defaults; campos desconhecidos seguem em `extra`.
//! Serial: linhas de texto com `label=<token> ... prob=<float>`.

use crate::types::Mode;
use regex::Regex;
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::LazyLock;

/// Tamanho máximo de pacote UDP (sem fragmentação).
pub const MAX_UDP_PAYLOAD: usize = 65507;

/// Ordem de resolução da distância: o primeiro campo presente vence.
pub const DISTANCE_FIELDS: [&str; 2] = ["tof_mm", "reading"];

/// Ordem de resolução da contagem, antes do proxy derivado da distância.
pub const COUNT_FIELDS: [&str; 2] = ["people", "count"];

/// Erros de decodificação. O pacote é descartado, o listener segue.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("JSON inválido: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Pacote não é um objeto JSON")]
    NotAnObject,

    #[error("Campo `{field}` não numérico: {value}")]
    NotNumeric { field: &'static str, value: Value },
}

/// Leitura de telemetria já com os defaults aplicados.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub source_id: String,
    /// Timestamp como veio do sensor; `None` = usar "agora"
    pub raw_ts: Option<f64>,
    pub mode: Mode,
    pub distance_mm: Option<f64>,
    pub fps: Option<f64>,
    pub count: Option<f64>,
    pub extra: Map<String, Value>,
}

/// Evento repassado direto para o log.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub source_id: String,
    pub raw_ts: Option<f64>,
    pub kind: String,
    /// Demais campos do pacote
    pub payload: Map<String, Value>,
}

/// Pacote UDP decodificado.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Telemetry(TelemetryRecord),
    Event(RawEvent),
}

/// ID padrão derivado do remetente (`ip:porta`).
pub fn source_from_addr(addr: &SocketAddr) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}

/// Decodifica um datagrama. `Ok(None)` para datagrama vazio.
///
/// `safe_distance_mm` alimenta o proxy de contagem quando o sensor não
/// manda `people`/`count`.
pub fn decode_datagram(
    data: &[u8],
    sender: &SocketAddr,
    safe_distance_mm: f64,
) -> Result<Option<Packet>, PacketError> {
    let text = String::from_utf8_lossy(data);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let mut obj = match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => map,
        _ => return Err(PacketError::NotAnObject),
    };

    let raw_ts = number("ts", obj.remove("ts"))?;
    let source_id = match obj.remove("cam_id") {
        Some(Value::String(s)) => s,
        None | Some(Value::Null) => source_from_addr(sender),
        Some(other) => other.to_string(),
    };

    if let Some(kind) = obj.remove("event") {
        let kind = match kind {
            Value::String(s) => s,
            other => other.to_string(),
        };
        return Ok(Some(Packet::Event(RawEvent {
            source_id,
            raw_ts,
            kind,
            payload: obj,
        })));
    }

    let mode = match obj.remove("mode") {
        Some(Value::String(s)) => Mode::from(s),
        _ => Mode::Tof,
    };
    let distance_mm = first_number(&mut obj, &DISTANCE_FIELDS)?;
    let fps = number("fps", obj.remove("fps"))?;
    let count = resolve_count(first_number(&mut obj, &COUNT_FIELDS)?, distance_mm, safe_distance_mm);

    Ok(Some(Packet::Telemetry(TelemetryRecord {
        source_id,
        raw_ts,
        mode,
        distance_mm,
        fps,
        count,
        extra: obj,
    })))
}

/// Contagem declarada, ou proxy binário (`1` se mais perto que `safe`)
/// quando só a distância é conhecida.
pub fn resolve_count(declared: Option<f64>, distance_mm: Option<f64>, safe_distance_mm: f64) -> Option<f64> {
    declared.or_else(|| distance_mm.map(|d| if d < safe_distance_mm { 1.0 } else { 0.0 }))
}

/// Remove todos os `fields` do objeto e retorna o primeiro valor presente.
fn first_number(
    obj: &mut Map<String, Value>,
    fields: &[&'static str],
) -> Result<Option<f64>, PacketError> {
    let mut found = None;
    for &field in fields {
        let value = obj.remove(field);
        if found.is_none() {
            found = number(field, value)?;
        }
    }
    Ok(found)
}

/// Aceita número JSON ou string numérica; `null` conta como ausente.
fn number(field: &'static str, value: Option<Value>) -> Result<Option<f64>, PacketError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(PacketError::NotNumeric {
                field,
                value: Value::String(s),
            }),
        },
        Some(other) => Err(PacketError::NotNumeric { field, value: other }),
    }
}

// ──────────────────────────────────────────────
// Serial
// ──────────────────────────────────────────────

static CLASSIFICATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)label\s*=\s*([A-Za-z0-9_]+).*?prob\s*=\s*([0-9]*\.?[0-9]+)")
        .expect("regex de classificação inválida")
});

/// Extrai `(label, prob)` de uma linha como
/// `[ZANT] PERSON top1: idx=1 label=not_person prob=0.926 time=1958.3 ms`.
pub fn parse_classification_line(line: &str) -> Option<(String, f64)> {
    let caps = CLASSIFICATION_RE.captures(line)?;
    let label = caps.get(1)?.as_str().trim().to_owned();
    let prob = caps.get(2)?.as_str().parse::<f64>().ok()?;
    Some((label, prob))
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn addr() -> SocketAddr {
        "192.168.1.20:40000".parse().unwrap()
    }

    fn telemetry(raw: &str) -> TelemetryRecord {
        match decode_datagram(raw.as_bytes(), &addr(), 400.0).unwrap() {
            Some(Packet::Telemetry(t)) => t,
            other => panic!("esperava telemetria, veio {other:?}"),
        }
    }

    #[test]
    fn minimal_packet_gets_defaults() {
        let t = telemetry(r#"{"tof_mm": 150, "cam_id": "cam-1"}"#);
        assert_eq!(t.source_id, "cam-1");
        assert_eq!(t.raw_ts, None);
        assert_eq!(t.mode, Mode::Tof);
        assert_eq!(t.distance_mm, Some(150.0));
        assert_eq!(t.fps, None);
        // proxy: mais perto que 400 mm
        assert_eq!(t.count, Some(1.0));
        assert!(t.extra.is_empty());
    }

    #[test]
    fn source_defaults_to_sender_address() {
        let t = telemetry(r#"{"tof_mm": 900}"#);
        assert_eq!(t.source_id, "192.168.1.20:40000");
        assert_eq!(t.count, Some(0.0));
    }

    #[test]
    fn legacy_reading_is_renamed() {
        let t = telemetry(r#"{"reading": "321"}"#);
        assert_eq!(t.distance_mm, Some(321.0));
        assert!(!t.extra.contains_key("reading"));
    }

    #[test]
    fn tof_mm_wins_over_reading() {
        let t = telemetry(r#"{"tof_mm": 100, "reading": 999}"#);
        assert_eq!(t.distance_mm, Some(100.0));
    }

    #[test]
    fn count_resolution_order() {
        assert_eq!(telemetry(r#"{"tof_mm": 100, "people": 3, "count": 7}"#).count, Some(3.0));
        assert_eq!(telemetry(r#"{"tof_mm": 100, "count": 7}"#).count, Some(7.0));
        assert_eq!(telemetry(r#"{"people": null, "count": 2}"#).count, Some(2.0));
        // sem distância não há proxy
        assert_eq!(telemetry(r#"{"fps": 30}"#).count, None);
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let t = telemetry(r#"{"tof_mm": 500, "fps": 29.5, "mode": "fomo", "rssi": -70, "fw": "1.2"}"#);
        assert_eq!(t.fps, Some(29.5));
        assert_eq!(t.mode, Mode::Fomo);
        assert_eq!(t.extra.get("rssi"), Some(&json!(-70)));
        assert_eq!(t.extra.get("fw"), Some(&json!("1.2")));
        assert_eq!(t.extra.len(), 2);
    }

    #[test]
    fn event_packets_are_routed() {
        let raw = br#"{"event": "manual_alarm", "cam_id": "cam-2", "ts": 1700000000, "note": "x"}"#;
        match decode_datagram(raw, &addr(), 400.0).unwrap() {
            Some(Packet::Event(ev)) => {
                assert_eq!(ev.kind, "manual_alarm");
                assert_eq!(ev.source_id, "cam-2");
                assert_eq!(ev.raw_ts, Some(1_700_000_000.0));
                assert_eq!(ev.payload.get("note"), Some(&json!("x")));
            }
            other => panic!("esperava evento, veio {other:?}"),
        }
    }

    #[test]
    fn whitespace_and_empty_datagrams() {
        assert!(decode_datagram(b"  \n", &addr(), 400.0).unwrap().is_none());
        let t = telemetry("{\"tof_mm\": 10}\n");
        assert_eq!(t.distance_mm, Some(10.0));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            decode_datagram(b"not json", &addr(), 400.0),
            Err(PacketError::Json(_))
        ));
        assert!(matches!(
            decode_datagram(b"[1,2,3]", &addr(), 400.0),
            Err(PacketError::NotAnObject)
        ));
        assert!(matches!(
            decode_datagram(br#"{"ts": "yesterday"}"#, &addr(), 400.0),
            Err(PacketError::NotNumeric { field: "ts", .. })
        ));
        assert!(matches!(
            decode_datagram(br#"{"tof_mm": [1]}"#, &addr(), 400.0),
            Err(PacketError::NotNumeric { field: "tof_mm", .. })
        ));
    }

    #[test]
    fn serial_line_parsing() {
        assert_eq!(
            parse_classification_line("[ZANT] PERSON top1: idx=1 label=not_person prob=0.926 time=1958.3 ms"),
            Some(("not_person".into(), 0.926))
        );
        assert_eq!(
            parse_classification_line("LABEL = person  PROB = .75"),
            Some(("person".into(), 0.75))
        );
        assert_eq!(parse_classification_line("boot ok"), None);
        assert_eq!(parse_classification_line("label=person"), None);
    }
}
