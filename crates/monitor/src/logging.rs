//! Logging do processo: stdout sempre, syslog (facility LOCAL0) salvo
//! quando desligado por `--disable-syslog`.

use std::ffi::CStr;
use syslog_tracing::{Facility, Options, Syslog};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Identidade das entradas no syslog.
pub const SYSLOG_IDENTITY: &CStr = c"ec2monitoring-cpuutilization";

/// Instala o subscriber global.
///
/// O stdout é instalado mesmo quando o syslog falha, para que o erro
/// retornado ainda possa ser logado pelo chamador.
pub fn init(syslog: bool) -> Result<(), String> {
    let writer = if syslog {
        Syslog::new(SYSLOG_IDENTITY, Options::LOG_PID, Facility::Local0)
    } else {
        None
    };
    let unavailable = syslog && writer.is_none();

    // Syslog já carimba hora e não entende ANSI
    let syslog_layer = writer.map(|w| fmt::layer().with_writer(w).with_ansi(false).without_time());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer())
        .with(syslog_layer)
        .init();

    if unavailable {
        return Err("syslog indisponível (já inicializado neste processo)".into());
    }
    Ok(())
}
