//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável. Toda seção usa
//! `#[serde(default)]`, então arquivos parciais funcionam.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Erros ao ler/gravar a configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro de I/O em {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Erro ao parsear TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Erro ao serializar TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Listener UDP dos sensores ToF.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// IP local para bind
    pub bind_ip: String,
    /// Porta UDP
    pub port: u16,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".into(),
            port: 5005,
        }
    }
}

impl UdpConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_ip, self.port)
    }
}

/// Leitor serial do classificador FOMO.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub enabled: bool,
    /// Caminho da porta (ex: "/dev/ttyACM0", "COM3")
    pub port: String,
    pub baud: u32,
    /// ID da fonte usado no store
    pub source_id: String,
    /// Espera entre tentativas de reabrir a porta (segundos)
    pub retry_delay_secs: f64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: "/dev/ttyACM0".into(),
            baud: 921_600,
            source_id: "nicla-02".into(),
            retry_delay_secs: 2.0,
        }
    }
}

impl SerialConfig {
    /// Espera entre reaberturas. Valores fora do alcance de `Duration`
    /// (negativos, `inf`, `nan`) caem no padrão de 2 s.
    pub fn retry_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_delay_secs).unwrap_or(Duration::from_secs(2))
    }
}

/// Thresholds de alerta de proximidade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Distância de segurança (mm)
    pub safe_distance_mm: f64,
    /// Meia-largura da faixa de histerese (mm)
    pub hysteresis_mm: f64,
    /// Tempo mínimo entre transições (s)
    pub min_dwell_seconds: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            safe_distance_mm: 400.0,
            hysteresis_mm: 200.0,
            min_dwell_seconds: 0.8,
        }
    }
}

/// Limites de memória e janela do histórico.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Janela dos gráficos/tabela (s)
    pub window_seconds: f64,
    /// Pontos por fonte
    pub max_points: usize,
    /// Capacidade do log de eventos
    pub max_events: usize,
    /// Eventos mostrados na tabela (0 = todos)
    pub max_events_in_table: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            window_seconds: 300.0,
            max_points: 20_000,
            max_events: 100_000,
            max_events_in_table: 0,
        }
    }
}

/// Cadência do snapshot para o dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub refresh_interval_secs: f64,
    /// Fonte selecionada (vazio = primeira em ordem alfabética)
    pub selected_source: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 1.0,
            selected_source: String::new(),
        }
    }
}

impl DashboardConfig {
    /// Intervalo do poller; inválido cai no padrão de 1 s.
    pub fn refresh_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.refresh_interval_secs).unwrap_or(Duration::from_secs(1))
    }
}

/// Exportação do último snapshot em JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub enabled: bool,
    pub directory: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: "./exports".into(),
        }
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub udp: UdpConfig,
    pub serial: SerialConfig,
    pub alerts: AlertConfig,
    pub history: HistoryConfig,
    pub dashboard: DashboardConfig,
    pub export: ExportConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML; cai nos defaults em caso de erro.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match Self::try_load(path) {
                Ok(config) => {
                    info!("Configuração carregada de {}", path.display());
                    return config;
                }
                Err(e) => warn!("Ignorando {}: {e}", path.display()),
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Lê e parseia o arquivo, propagando o erro.
    pub fn try_load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.udp.port == 0 {
            errors.push("Porta UDP não pode ser 0".into());
        }
        if self.serial.enabled && self.serial.port.is_empty() {
            errors.push("Serial habilitada sem porta".into());
        }
        if !(0.0..=3600.0).contains(&self.serial.retry_delay_secs) {
            errors.push(format!(
                "Espera de reconexão serial inválida: {} (0–3600 s)",
                self.serial.retry_delay_secs
            ));
        }
        if self.serial.enabled && self.serial.baud == 0 {
            errors.push("Baud rate serial não pode ser 0".into());
        }
        if self.alerts.hysteresis_mm < 0.0 {
            errors.push(format!(
                "Histerese negativa: {} mm",
                self.alerts.hysteresis_mm
            ));
        }
        if self.alerts.min_dwell_seconds < 0.0 {
            errors.push(format!(
                "Dwell mínimo negativo: {} s",
                self.alerts.min_dwell_seconds
            ));
        }
        if self.history.max_points == 0 || self.history.max_events == 0 {
            errors.push("Capacidades de histórico/eventos devem ser > 0".into());
        }
        if self.history.window_seconds <= 0.0 {
            errors.push(format!(
                "Janela inválida: {} s",
                self.history.window_seconds
            ));
        }
        if !(0.1..=60.0).contains(&self.dashboard.refresh_interval_secs) {
            errors.push(format!(
                "Intervalo do dashboard inválido: {} (0.1–60.0)",
                self.dashboard.refresh_interval_secs
            ));
        }

        errors
    }
}
