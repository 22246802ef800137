//! Controlador do ciclo de vida do relay.
//!
//! ```text
//!            ┌────────────┐  accept ok   ┌──────────┐
//!   new() ─▶ │ Listening  │ ───────────▶ │ Draining │ ── bridge ──┐
//!            │ /Accepting │ ◀─────────── └──────────┘             │
//!            └─────┬──────┘   timeout / próximo ciclo  ◀───────────┘
//!                  │ shutdown ou erro fatal de accept
//!                  ▼
//!              ┌────────┐
//!              │ Closed │  (terminal, sem restart)
//!              └────────┘
//! ```
//!
//! Uma conexão por vez: a chamada à ponte é síncrona com o loop de accept,
//! então o dispositivo serial tem um único escritor. O sinal de shutdown é
//! checado entre tentativas de accept e tem prioridade sobre uma conexão
//! aceita no mesmo ciclo, que é abandonada.

use crate::ErrorClass;
use crate::listener::{AcceptError, DeadlineListener};
use crate::serial::{BridgeError, SerialBridge};
use crate::status::RelayStatus;
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use serialport::SerialPort;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Deadline padrão do accept.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Estado do relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Listening,
    Accepting,
    Draining,
    Closed,
}

/// Erros do relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Não foi possível limpar {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Não foi possível escutar em {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Falha ao aceitar conexões no socket: {0}")]
    Accept(#[source] io::Error),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl RelayError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RelayError::Cleanup { .. } => ErrorClass::Configuration,
            RelayError::Bind { .. } | RelayError::Accept(_) => ErrorClass::Transport,
            RelayError::Bridge(e) => e.class(),
        }
    }
}

/// Sinal one-shot de shutdown. Consumido ao sinalizar.
///
/// Descartar o handle sem sinalizar também encerra o relay.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: Sender<()>,
}

impl ShutdownHandle {
    pub fn shutdown(self) {
        let _ = self.tx.try_send(());
    }
}

/// Relay socket local → dispositivo serial.
pub struct Relay<W: Write = Box<dyn SerialPort>> {
    listener: Option<DeadlineListener>,
    bridge: Option<SerialBridge<W>>,
    socket_path: PathBuf,
    accept_timeout: Option<Duration>,
    shutdown_rx: Receiver<()>,
    state: RelayState,
}

impl<W: Write> Relay<W> {
    /// Remove socket antigo em `socket_path`, faz bind e começa a escutar.
    ///
    /// `accept_timeout = None` desliga o deadline do accept (shutdown só é
    /// observado quando chega uma conexão).
    pub fn new(
        socket_path: impl Into<PathBuf>,
        bridge: SerialBridge<W>,
        accept_timeout: Option<Duration>,
    ) -> Result<(Self, ShutdownHandle), RelayError> {
        let socket_path = socket_path.into();
        remove_stale_socket(&socket_path)?;

        let listener = DeadlineListener::bind(&socket_path).map_err(|source| RelayError::Bind {
            path: socket_path.clone(),
            source,
        })?;
        if accept_timeout.is_none() || !listener.supports_deadline() {
            warn!("Relay sem deadline no accept: shutdown só será observado na próxima conexão");
        }

        let (tx, shutdown_rx) = bounded(1);
        info!(
            "[relayd] escutando em {} → {}",
            socket_path.display(),
            bridge.name()
        );

        let relay = Self {
            listener: Some(listener),
            bridge: Some(bridge),
            socket_path,
            accept_timeout,
            shutdown_rx,
            state: RelayState::Listening,
        };
        Ok((relay, ShutdownHandle { tx }))
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Loop de accept até shutdown ou erro fatal.
    ///
    /// O teardown sempre roda antes de retornar, inclusive no erro fatal.
    /// Falha de escrita de uma conexão é logada e o loop continua.
    pub fn run(mut self, status: &RelayStatus) -> Result<(), RelayError> {
        loop {
            self.set_state(RelayState::Accepting);
            let Some(listener) = self.listener.as_ref() else {
                return Ok(());
            };
            let accepted = listener.accept_within(self.accept_timeout);

            if self.shutdown_requested() {
                info!("[relayd] shutdown solicitado");
                drop(accepted);
                self.close();
                return Ok(());
            }

            match accepted {
                Ok(conn) => {
                    self.set_state(RelayState::Draining);
                    if let Some(bridge) = self.bridge.as_mut() {
                        match bridge.relay_data(conn) {
                            Ok(written) => status.add(written),
                            Err(e) => error!("Falha ao enviar dados: {e}"),
                        }
                    }
                }
                Err(AcceptError::TimedOut) => {}
                Err(AcceptError::Io(e)) => {
                    self.close();
                    return Err(RelayError::Accept(e));
                }
            }

            self.set_state(RelayState::Listening);
        }
    }

    /// Fecha listener e dispositivo e remove o socket. Idempotente.
    pub fn close(&mut self) {
        if self.state == RelayState::Closed {
            return;
        }
        self.state = RelayState::Closed;

        drop(self.listener.take());
        if let Some(bridge) = self.bridge.take() {
            bridge.close();
        }
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Não foi possível remover {}: {e}", self.socket_path.display());
            }
        }

        info!("[relayd] encerrado");
    }

    fn set_state(&mut self, next: RelayState) {
        if self.state != next {
            debug!("[relayd] {:?} → {:?}", self.state, next);
            self.state = next;
        }
    }

    fn shutdown_requested(&self) -> bool {
        match self.shutdown_rx.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => true,
        }
    }
}

impl<W: Write> Drop for Relay<W> {
    fn drop(&mut self) {
        self.close();
    }
}

fn remove_stale_socket(path: &Path) -> Result<(), RelayError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Socket antigo removido: {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RelayError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{build_message, decode_message};
    use crate::ipc::send_bytes;
    use std::os::unix::fs::FileTypeExt;
    use std::sync::{Arc, Mutex};
    use std::thread::JoinHandle;
    use std::time::Instant;

    /// Dispositivo em memória; opcionalmente falha a primeira escrita.
    #[derive(Clone, Default)]
    struct MemDevice {
        bytes: Arc<Mutex<Vec<u8>>>,
        fail_next: Arc<Mutex<bool>>,
    }

    impl MemDevice {
        fn contents(&self) -> Vec<u8> {
            self.bytes.lock().unwrap().clone()
        }
    }

    impl Write for MemDevice {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut fail = self.fail_next.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(io::Error::new(io::ErrorKind::TimedOut, "serial ocupado"));
            }
            self.bytes.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Running {
        _dir: tempfile::TempDir,
        path: PathBuf,
        device: MemDevice,
        status: Arc<RelayStatus>,
        handle: ShutdownHandle,
        thread: JoinHandle<Result<(), RelayError>>,
    }

    fn start(device: MemDevice, timeout: Duration) -> Running {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");
        let bridge = SerialBridge::from_writer(device.clone(), "mem");
        let (relay, handle) = Relay::new(&path, bridge, Some(timeout)).unwrap();

        let status = Arc::new(RelayStatus::new("{bytes}"));
        let thread_status = Arc::clone(&status);
        let thread = std::thread::spawn(move || relay.run(&thread_status));

        Running {
            _dir: dir,
            path,
            device,
            status,
            handle,
            thread,
        }
    }

    fn wait_until(cond: impl Fn() -> bool) {
        let limit = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < limit, "condição não satisfeita a tempo");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn shutdown_while_idle_tears_down_within_deadline() {
        let timeout = Duration::from_millis(200);
        let r = start(MemDevice::default(), timeout);
        assert!(r.path.exists());

        std::thread::sleep(Duration::from_millis(30));
        let signaled = Instant::now();
        r.handle.shutdown();
        r.thread.join().unwrap().unwrap();

        assert!(signaled.elapsed() < timeout + Duration::from_millis(500));
        assert!(!r.path.exists());
    }

    #[test]
    fn shutdown_wins_over_connection_accepted_same_cycle() {
        let timeout = Duration::from_secs(3);
        let r = start(MemDevice::default(), timeout);
        std::thread::sleep(Duration::from_millis(50));

        // Sinal primeiro; a conexão é que acorda o accept
        let signaled = Instant::now();
        r.handle.shutdown();
        let msg = build_message("cpuutil", "2.0", false).unwrap();
        // O relay pode fechar a conexão antes da escrita terminar (EPIPE)
        let _ = send_bytes(&r.path, &msg);

        r.thread.join().unwrap().unwrap();

        assert!(signaled.elapsed() < Duration::from_secs(2));
        assert!(r.device.contents().is_empty());
        assert_eq!(r.status.load(), 0);
        assert!(!r.path.exists());
    }

    #[test]
    fn sequential_sends_reach_device_whole() {
        let r = start(MemDevice::default(), Duration::from_millis(100));
        let first = build_message("cpuutil", "2.0", false).unwrap();
        let second = build_message("test", "linha\ncomprida", true).unwrap();

        send_bytes(&r.path, &first).unwrap();
        send_bytes(&r.path, &second).unwrap();
        let total = (first.len() + second.len()) as i64;
        wait_until(|| r.status.load() == total);

        r.handle.shutdown();
        r.thread.join().unwrap().unwrap();

        let written = r.device.contents();
        assert_eq!(written, [first, second].concat());

        let lines: Vec<_> = written.split_inclusive(|b| *b == b'\n').collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(decode_message(lines[0]).unwrap().data, "2.0");
        assert_eq!(decode_message(lines[1]).unwrap().data, "linha\ncomprida");
    }

    #[test]
    fn failed_write_drops_only_that_message() {
        let device = MemDevice::default();
        *device.fail_next.lock().unwrap() = true;
        let r = start(device, Duration::from_millis(100));

        send_bytes(&r.path, b"perdida\n").unwrap();
        send_bytes(&r.path, b"entregue\n").unwrap();
        wait_until(|| r.status.load() == 9);

        r.handle.shutdown();
        r.thread.join().unwrap().unwrap();
        assert_eq!(r.device.contents(), b"entregue\n");
    }

    #[test]
    fn replaces_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");
        std::fs::write(&path, b"lixo").unwrap();

        let bridge = SerialBridge::from_writer(Vec::new(), "mem");
        let (relay, _handle) = Relay::new(&path, bridge, Some(DEFAULT_ACCEPT_TIMEOUT)).unwrap();

        assert!(std::fs::metadata(&path).unwrap().file_type().is_socket());
        assert_eq!(relay.state(), RelayState::Listening);
        assert_eq!(relay.socket_path(), path.as_path());
    }

    #[test]
    fn close_is_idempotent_and_drop_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");

        let bridge = SerialBridge::from_writer(Vec::new(), "mem");
        let (mut relay, _handle) = Relay::new(&path, bridge, Some(DEFAULT_ACCEPT_TIMEOUT)).unwrap();
        relay.close();
        relay.close();
        assert_eq!(relay.state(), RelayState::Closed);
        assert!(!path.exists());

        let bridge = SerialBridge::from_writer(Vec::new(), "mem");
        let (relay, _handle) = Relay::new(&path, bridge, Some(DEFAULT_ACCEPT_TIMEOUT)).unwrap();
        assert!(path.exists());
        drop(relay);
        assert!(!path.exists());
    }

    #[test]
    fn dropped_handle_stops_relay() {
        let r = start(MemDevice::default(), Duration::from_millis(50));
        drop(r.handle);
        r.thread.join().unwrap().unwrap();
        assert!(!r.path.exists());
    }

    #[test]
    fn bind_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sem-diretorio").join("relay.sock");

        let bridge = SerialBridge::from_writer(Vec::new(), "mem");
        let err = Relay::new(&path, bridge, None).err().unwrap();
        assert!(matches!(err, RelayError::Bind { .. }));
        assert_eq!(err.class(), ErrorClass::Transport);
    }
}
