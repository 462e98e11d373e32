//! Normalização de timestamps heterogêneos para segundos Unix.
//!
//! - `>= 1e12` → milissegundos desde a época, divide por 1000
//! - `< 1e9` (após a conversão) → relógio relativo do dispositivo
//!   (ex: millis desde o boot), ancorado em "agora" com offset por fonte
//! - demais valores → já absolutos
//!
//! O offset é calculado uma única vez por fonte. Deriva do relógio do
//! dispositivo depois da primeira leitura não é corrigida.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A partir daqui o valor é tratado como milissegundos.
pub const MILLIS_THRESHOLD: f64 = 1_000_000_000_000.0;

/// Abaixo disso o valor não é uma data absoluta plausível.
pub const RELATIVE_THRESHOLD: f64 = 1_000_000_000.0;

/// Fonte de "agora" em segundos Unix.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Relógio do sistema.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Relógio controlado manualmente (testes e replays).
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(now: f64) -> Self {
        Self {
            bits: AtomicU64::new(now.to_bits()),
        }
    }

    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) {
        self.set(self.now() + secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Cache de offsets por fonte.
#[derive(Debug, Default, Clone)]
pub struct TimestampNormalizer {
    offsets: HashMap<String, f64>,
}

impl TimestampNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converte `raw` para segundos absolutos. `now` só é usado na
    /// primeira leitura relativa de cada fonte.
    pub fn normalize(&mut self, source_id: &str, raw: f64, now: f64) -> f64 {
        let mut ts = raw;
        if ts >= MILLIS_THRESHOLD {
            ts /= 1000.0;
        }
        if ts < RELATIVE_THRESHOLD {
            let offset = *self
                .offsets
                .entry(source_id.to_owned())
                .or_insert(now - ts);
            ts += offset;
        }
        ts
    }

    pub fn offset(&self, source_id: &str) -> Option<f64> {
        self.offsets.get(source_id).copied()
    }

    pub fn clear(&mut self) {
        self.offsets.clear();
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
