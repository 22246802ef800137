//! Listener Unix com deadline no accept.
//!
//! `std::os::unix::net::UnixListener` não tem timeout de accept. O listener
//! fica não-bloqueante e o accept espera com `poll(2)` até o deadline,
//! devolvendo o controle ao loop do relay mesmo sem conexões.
//!
//! Se o socket não aceitar modo não-bloqueante, o listener cai para accept
//! bloqueante sem deadline: o shutdown só é observado na próxima conexão.

use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    #[error("Deadline do accept expirou")]
    TimedOut,

    #[error("Falha no accept: {0}")]
    Io(#[from] io::Error),
}

impl AcceptError {
    pub fn class(&self) -> crate::ErrorClass {
        match self {
            AcceptError::TimedOut => crate::ErrorClass::Timeout,
            AcceptError::Io(_) => crate::ErrorClass::Transport,
        }
    }
}

pub struct DeadlineListener {
    inner: UnixListener,
    deadline_supported: bool,
}

impl DeadlineListener {
    /// Faz bind/listen em `path`. O caminho já deve estar livre.
    pub fn bind(path: &Path) -> io::Result<Self> {
        let inner = UnixListener::bind(path)?;
        let deadline_supported = match inner.set_nonblocking(true) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Listener em {} sem modo não-bloqueante ({e}); accept sem deadline, shutdown só na próxima conexão",
                    path.display()
                );
                false
            }
        };

        Ok(Self {
            inner,
            deadline_supported,
        })
    }

    /// Se `accept_within` respeita o deadline.
    pub fn supports_deadline(&self) -> bool {
        self.deadline_supported
    }

    /// Aceita uma conexão esperando no máximo `timeout` (`None` = sem limite).
    ///
    /// A conexão devolvida é sempre bloqueante.
    pub fn accept_within(&self, timeout: Option<Duration>) -> Result<UnixStream, AcceptError> {
        if !self.deadline_supported {
            let (stream, _) = self.inner.accept()?;
            return Ok(stream);
        }

        if !self.wait_readable(timeout)? {
            return Err(AcceptError::TimedOut);
        }

        match self.inner.accept() {
            Ok((stream, _)) => {
                // BSD/macOS herdam O_NONBLOCK do listener
                stream.set_nonblocking(false)?;
                Ok(stream)
            }
            // Par desistiu entre o poll e o accept
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(AcceptError::TimedOut),
            Err(e) => Err(AcceptError::Io(e)),
        }
    }

    /// `poll(2)` no fd do listener. `false` = deadline expirou.
    fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let timeout_ms: libc::c_int = match timeout {
            Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };
        let mut fds = libc::pollfd {
            fd: self.inner.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        // SAFETY: `fds` é um único pollfd válido durante a chamada.
        let rc = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(rc > 0)
    }
}
