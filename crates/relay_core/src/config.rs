//! Configuração unificada via TOML.
//!
//! Caminhos do socket e do dispositivo vêm daqui (e das flags), nunca de
//! constantes espalhadas, para que testes rodem isolados.

use crate::ipc::DEFAULT_SOCKET_PATH;
use crate::relay::DEFAULT_ACCEPT_TIMEOUT;
use crate::serial::DEFAULT_BAUD_RATE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Maior intervalo/timeout aceito (uma semana).
pub const MAX_INTERVAL: Duration = Duration::from_secs(7 * 24 * 3600);

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_LOG_INTERVAL_MINUTES: u64 = 10;

/// Configuração do relay (socket local + serial).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Caminho do socket Unix criado pelo relay
    pub socket_path: PathBuf,
    /// Dispositivos seriais em ordem de preferência
    pub serial_devices: Vec<PathBuf>,
    /// Baud rate do dispositivo
    pub baud_rate: u32,
    /// Deadline do accept em segundos (0 = sem deadline)
    pub accept_timeout_secs: f64,
    /// Timeout de escrita no serial em segundos
    pub write_timeout_secs: f64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            serial_devices: vec![
                PathBuf::from("/dev/cu.pci-0000:4c:00.0,@00"),
                PathBuf::from("/dev/cu.pci-serial0"),
            ],
            baud_rate: DEFAULT_BAUD_RATE,
            accept_timeout_secs: DEFAULT_ACCEPT_TIMEOUT.as_secs_f64(),
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT.as_secs_f64(),
        }
    }
}

impl RelayConfig {
    /// Deadline do accept; `None` quando desligado (`0`).
    ///
    /// Valores rejeitados por [`AppConfig::validate`] caem no padrão.
    pub fn accept_timeout(&self) -> Option<Duration> {
        if self.accept_timeout_secs == 0.0 {
            return None;
        }
        Some(secs_to_duration(self.accept_timeout_secs).unwrap_or(DEFAULT_ACCEPT_TIMEOUT))
    }

    pub fn write_timeout(&self) -> Duration {
        secs_to_duration(self.write_timeout_secs).unwrap_or(DEFAULT_WRITE_TIMEOUT)
    }
}

/// Configuração do processo monitor (amostragem e flush de status).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Intervalo entre amostras de CPU em segundos
    pub poll_interval_secs: f64,
    /// Intervalo de flush dos contadores de status em minutos
    pub log_interval_minutes: u64,
    /// Tag usada nas amostras de CPU
    pub cpu_tag: String,
    /// Comprimir payloads de CPU
    pub compress: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs_f64(),
            log_interval_minutes: DEFAULT_LOG_INTERVAL_MINUTES,
            cpu_tag: "cpuutil".into(),
            compress: false,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        secs_to_duration(self.poll_interval_secs).unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    pub fn log_interval(&self) -> Duration {
        minutes_to_duration(self.log_interval_minutes)
            .unwrap_or(Duration::from_secs(DEFAULT_LOG_INTERVAL_MINUTES * 60))
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub relay: RelayConfig,
    pub monitor: MonitorConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
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

        if self.relay.socket_path.as_os_str().is_empty() {
            errors.push("Caminho do socket não pode ser vazio".into());
        }
        if self.relay.serial_devices.is_empty() {
            errors.push("Nenhum dispositivo serial configurado".into());
        }
        if secs_to_duration(self.relay.write_timeout_secs).is_none() {
            errors.push(format!(
                "Timeout de escrita inválido: {} (0–{}s)",
                self.relay.write_timeout_secs,
                MAX_INTERVAL.as_secs()
            ));
        }
        if self.relay.baud_rate == 0 {
            errors.push("Baud rate não pode ser 0".into());
        }
        if self.relay.accept_timeout_secs != 0.0
            && secs_to_duration(self.relay.accept_timeout_secs).is_none()
        {
            errors.push(format!(
                "Deadline do accept inválido: {} (0 = sem deadline, máx. {}s)",
                self.relay.accept_timeout_secs,
                MAX_INTERVAL.as_secs()
            ));
        }
        if secs_to_duration(self.monitor.poll_interval_secs).is_none() {
            errors.push(format!(
                "Intervalo de amostragem inválido: {} (0–{}s)",
                self.monitor.poll_interval_secs,
                MAX_INTERVAL.as_secs()
            ));
        }
        if minutes_to_duration(self.monitor.log_interval_minutes).is_none() {
            errors.push(format!(
                "Intervalo de log inválido: {} minuto(s) (1–{})",
                self.monitor.log_interval_minutes,
                MAX_INTERVAL.as_secs() / 60
            ));
        }
        if self.monitor.cpu_tag.is_empty() {
            errors.push("Tag de CPU não pode ser vazia".into());
        }

        errors
    }
}

/// Segundos → `Duration` não nula e até [`MAX_INTERVAL`].
///
/// Rejeita NaN, negativos, infinitos e valores que arredondam para zero.
fn secs_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero() && *d <= MAX_INTERVAL)
}

fn minutes_to_duration(minutes: u64) -> Option<Duration> {
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .filter(|d| !d.is_zero() && *d <= MAX_INTERVAL)
}
