//! Envio de mensagens prontas ao relay pelo socket Unix local.
//!
//! Uma conexão nova por mensagem: conecta, escreve tudo, fecha. Sem pool e
//! sem retry; o relay lê até o EOF, então fechar a conexão delimita a
//! mensagem do lado do relay.

use crate::ErrorClass;
use crate::envelope::{self, EnvelopeError};
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Caminho padrão do socket criado pelo relay.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/.ec2monitoring.sock";

/// Erros de envio.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("Socket {0} não existe, relay pode não estar rodando")]
    SocketMissing(PathBuf),

    #[error("Falha ao conectar em {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Erro ao escrever no socket: {0}")]
    Write(#[source] std::io::Error),

    #[error("Erro ao montar mensagem: {0}")]
    Build(#[from] EnvelopeError),
}

impl IpcError {
    pub fn class(&self) -> ErrorClass {
        match self {
            IpcError::SocketMissing(_) => ErrorClass::Configuration,
            IpcError::Connect { .. } | IpcError::Write(_) => ErrorClass::Transport,
            IpcError::Build(e) => e.class(),
        }
    }
}

/// Verifica se o socket do relay existe.
pub fn socket_exists(socket_path: &Path) -> bool {
    socket_path.exists()
}

/// Escreve `message` no relay. Retorna o número de bytes enviados.
///
/// Socket ausente é erro de configuração e nenhuma conexão é tentada.
pub fn send_bytes(socket_path: &Path, message: &[u8]) -> Result<usize, IpcError> {
    if !socket_exists(socket_path) {
        return Err(IpcError::SocketMissing(socket_path.to_path_buf()));
    }

    let mut sock = UnixStream::connect(socket_path).map_err(|source| IpcError::Connect {
        path: socket_path.to_path_buf(),
        source,
    })?;
    sock.write_all(message).map_err(IpcError::Write)?;

    debug!("→ {} bytes para {}", message.len(), socket_path.display());
    Ok(message.len())
}

/// Monta a mensagem com [`envelope::build_message`] e envia ao relay.
pub fn send_message(
    socket_path: &Path,
    tag: &str,
    data: &str,
    compress: bool,
) -> Result<usize, IpcError> {
    let message = envelope::build_message(tag, data, compress)?;
    send_bytes(socket_path, &message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixListener;

    #[test]
    fn missing_socket_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ausente.sock");

        let err = send_bytes(&path, b"x\n").unwrap_err();
        assert!(matches!(err, IpcError::SocketMissing(_)));
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn stale_file_fails_on_connect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regular.sock");
        std::fs::write(&path, b"").unwrap();

        let err = send_bytes(&path, b"x\n").unwrap_err();
        assert!(matches!(err, IpcError::Connect { .. }));
        assert_eq!(err.class(), ErrorClass::Transport);
    }

    #[test]
    fn sends_whole_message_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let reader = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = Vec::new();
            conn.read_to_end(&mut buf).unwrap();
            buf
        });

        let sent = send_message(&path, "cpuutil", "2.0", false).unwrap();
        let received = reader.join().unwrap();

        assert_eq!(sent, received.len());
        assert_eq!(received, envelope::build_message("cpuutil", "2.0", false).unwrap());
    }

    #[test]
    fn build_failure_happens_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ausente.sock");

        let err = send_message(&path, "", "x", false).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Protocol);
    }
}
