//! Amostragem de utilização de CPU via `sysinfo`.
//!
//! Leituras repetidas: cada amostra mede o uso desde a anterior, então a
//! primeira leitura é feita na construção só para inicializar os contadores.

use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tracing::debug;

pub struct CpuMonitor {
    sys: System,
}

impl CpuMonitor {
    pub fn new() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing().with_cpu_usage()),
        );
        sys.refresh_cpu_usage();
        Self { sys }
    }

    /// Uso global de CPU (0–100%) como string decimal mais curta.
    pub fn sample(&mut self) -> String {
        self.sys.refresh_cpu_usage();
        let usage = format_usage(self.sys.global_cpu_usage());
        debug!("CPU {usage}%");
        usage
    }
}

/// `2.0` vira `"2"`, `12.5` vira `"12.5"`: sem casas fixas nem expoente.
fn format_usage(usage: f32) -> String {
    usage.to_string()
}
