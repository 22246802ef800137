//! # Relay Monitor
//!
//! Roda o relay socket local → serial e, no mesmo processo, amostra a
//! utilização de CPU e envia pelo relay. O host lê as mensagens do
//! dispositivo serial, já que a rede da VM não o alcança.
//!
//! ## Uso
//! ```bash
//! relay-monitor                                  # config.toml ao lado do executável
//! relay-monitor --serial-device /dev/ttyS1       # ignora a descoberta de dispositivo
//! relay-monitor --disable-syslog                 # só stdout
//! RUST_LOG=debug relay-monitor                   # tamanhos por conexão
//! ```

mod logging;
mod monitor;

use clap::Parser;
use monitor::CpuMonitor;
use relay_core::config::AppConfig;
use relay_core::serial::{SerialBridge, first_serial_device};
use relay_core::ipc::{self, IpcError};
use relay_core::{Relay, RelayStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "relay-monitor", version, about = "Relay de telemetria para o dispositivo serial")]
struct Args {
    /// Arquivo de configuração (padrão: config.toml ao lado do executável)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dispositivo serial, ignorando a lista da configuração
    #[arg(long)]
    serial_device: Option<PathBuf>,

    /// Caminho do socket do relay
    #[arg(long)]
    socket_path: Option<PathBuf>,

    /// Não enviar logs ao syslog
    #[arg(long)]
    disable_syslog: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // ── Logging ──
    if let Err(e) = logging::init(!args.disable_syslog) {
        fatal(format!("Falha ao criar logger: {e}"));
    }

    // ── Carregar config ──
    let config_path = args.config.unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    if let Some(socket_path) = args.socket_path {
        config.relay.socket_path = socket_path;
    }
    if let Some(device) = args.serial_device {
        config.relay.serial_devices = vec![device];
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Configuração inválida: {e}");
        }
        std::process::exit(1);
    }

    let relay_cfg = &config.relay;
    let monitor_cfg = &config.monitor;
    let socket_path = relay_cfg.socket_path.clone();

    // ── Serial + relay ──
    let Some(device) = first_serial_device(&relay_cfg.serial_devices) else {
        fatal("Nenhum dispositivo serial encontrado para o relay");
    };
    info!("Dispositivo serial para o relay: {}", device.display());

    let bridge = SerialBridge::open(&device, relay_cfg.baud_rate, relay_cfg.write_timeout())
        .unwrap_or_else(|e| fatal(format!("Falha ao criar ponte serial ({}): {e}", e.class())));
    let (relay, shutdown) = Relay::new(&socket_path, bridge, relay_cfg.accept_timeout())
        .unwrap_or_else(|e| fatal(format!("Falha ao criar relay ({}): {e}", e.class())));

    let minutes = monitor_cfg.log_interval_minutes;
    let cpu_status = RelayStatus::new(format!(
        "Enviada utilização de CPU ({{bytes}} bytes) em {minutes} minuto(s)"
    ));
    let relay_status = Arc::new(RelayStatus::new(format!(
        "[relayd] Recebidos dados e enviados {{bytes}} bytes ao serial em {minutes} minuto(s)"
    )));

    let mut relay_task = tokio::task::spawn_blocking({
        let status = Arc::clone(&relay_status);
        move || relay.run(&status)
    });

    if !ipc::socket_exists(&socket_path) {
        fatal("Socket não existe, relayd pode não estar rodando");
    }

    // ── CPU + timers ──
    let mut cpu = CpuMonitor::new();
    let poll_interval = monitor_cfg.poll_interval();
    let log_interval = monitor_cfg.log_interval();
    let mut poll = interval_at(Instant::now() + poll_interval, poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut flush = interval_at(Instant::now() + log_interval, log_interval);

    let signal = shutdown_signal();
    tokio::pin!(signal);

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ RELAY MONITOR – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Socket:    {}", socket_path.display());
    println!("  Serial:    {} @ {} baud", device.display(), relay_cfg.baud_rate);
    println!("  Amostra:   {:.1}s ({})", monitor_cfg.poll_interval_secs, monitor_cfg.cpu_tag);
    println!("══════════════════════════════════════════════");
    println!();

    // ── Loop principal ──
    let exit_code = loop {
        tokio::select! {
            _ = &mut signal => {
                for status in [&cpu_status, relay_status.as_ref()] {
                    let written = status.take();
                    if written > 0 {
                        info!("{}", status.render(written));
                    }
                }
                break 0;
            }
            result = &mut relay_task => {
                // Teardown já rodou dentro de `run`
                match result {
                    Ok(Ok(())) => fatal("Relay encerrou sem pedido de shutdown"),
                    Ok(Err(e)) => fatal(format!("Relay falhou ({}): {e}", e.class())),
                    Err(e) => fatal(format!("Task do relay abortou: {e}")),
                }
            }
            _ = poll.tick() => {
                let usage = cpu.sample();
                match ipc::send_message(&socket_path, &monitor_cfg.cpu_tag, &usage, monitor_cfg.compress) {
                    Ok(written) => cpu_status.add(written),
                    Err(e) => {
                        error!("Não foi possível enviar mensagem ao relay ({}): {e}", e.class());
                        if let Some(code) = send_failure_exit_code(&e) {
                            break code;
                        }
                    }
                }
            }
            _ = flush.tick() => {
                info!("{}", cpu_status.render(cpu_status.take()));
                info!("{}", relay_status.render(relay_status.take()));
            }
        }
    };

    // ── Shutdown ──
    shutdown.shutdown();
    match relay_task.await {
        Ok(Ok(())) => info!("Relay finalizado"),
        Ok(Err(e)) => error!("Relay falhou durante o shutdown: {e}"),
        Err(e) => error!("Task do relay abortou: {e}"),
    }
    std::process::exit(exit_code);
}

/// Código de saída quando o envio de uma amostra falha.
///
/// Erro de configuração ou transporte encerra o processo; erro de
/// protocolo perde só aquela amostra (`None`).
fn send_failure_exit_code(e: &IpcError) -> Option<i32> {
    e.class().is_fatal().then_some(1)
}

/// Loga o erro e encerra com código 1.
fn fatal(msg: impl std::fmt::Display) -> ! {
    error!("{msg}");
    std::process::exit(1);
}

/// Completa quando chega SIGINT ou SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Falha ao instalar handler de Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Falha ao instalar handler de SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("SIGINT recebido, encerrando"),
        _ = terminate => info!("SIGTERM recebido, encerrando"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syslog_enabled_by_default() {
        let args = Args::try_parse_from(["relay-monitor"]).unwrap();
        assert!(!args.disable_syslog);
        assert!(args.config.is_none());
    }

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "relay-monitor",
            "--disable-syslog",
            "--serial-device",
            "/dev/ttyS1",
            "--socket-path",
            "/run/relay.sock",
        ])
        .unwrap();
        assert!(args.disable_syslog);
        assert_eq!(args.serial_device, Some(PathBuf::from("/dev/ttyS1")));
        assert_eq!(args.socket_path, Some(PathBuf::from("/run/relay.sock")));
    }

    #[test]
    fn missing_socket_ends_process() {
        let dir = tempfile::tempdir().unwrap();
        let err = ipc::send_message(&dir.path().join("ausente.sock"), "cpuutil", "2", false)
            .unwrap_err();
        assert_eq!(send_failure_exit_code(&err), Some(1));
    }

    #[test]
    fn protocol_error_drops_only_the_sample() {
        let dir = tempfile::tempdir().unwrap();
        let err = ipc::send_message(&dir.path().join("ausente.sock"), "", "2", false).unwrap_err();
        assert!(matches!(err, IpcError::Build(_)));
        assert_eq!(send_failure_exit_code(&err), None);
    }
}
