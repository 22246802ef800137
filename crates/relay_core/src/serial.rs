//! Ponte entre conexões do socket local e o dispositivo serial.
//!
//! O dispositivo é um destino único, append-only, compartilhado por todos
//! os produtores. Cada conexão é lida inteira para memória e escrita com
//! um único `write_all`, para que mensagens de produtores diferentes nunca
//! se intercalem no fio.

use crate::ErrorClass;
use serialport::SerialPort;
use std::io::{Read, Write};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Baud rate do dispositivo serial do host.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Erros da ponte serial.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Dispositivo serial não existe: {0}")]
    DeviceMissing(PathBuf),

    #[error("Falha ao abrir dispositivo serial {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: serialport::Error,
    },

    #[error("Falha ao ler socket para o buffer: {0}")]
    Read(#[source] std::io::Error),

    #[error("Falha ao escrever buffer no serial: {0}")]
    Write(#[source] std::io::Error),
}

impl BridgeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BridgeError::DeviceMissing(_) => ErrorClass::Configuration,
            _ => ErrorClass::Transport,
        }
    }
}

/// Dono exclusivo do handle do dispositivo serial.
pub struct SerialBridge<W: Write = Box<dyn SerialPort>> {
    device: W,
    name: String,
}

impl SerialBridge<Box<dyn SerialPort>> {
    /// Abre o dispositivo em 8N1 com o baud rate dado.
    ///
    /// Recusa abrir quando o caminho não existe. `write_timeout` limita
    /// quanto uma escrita pode bloquear.
    pub fn open(path: &Path, baud_rate: u32, write_timeout: Duration) -> Result<Self, BridgeError> {
        if !path.exists() {
            return Err(BridgeError::DeviceMissing(path.to_path_buf()));
        }

        let port = serialport::new(path.to_string_lossy(), baud_rate)
            .timeout(write_timeout)
            .open()
            .map_err(|source| BridgeError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        info!("Dispositivo serial {} aberto a {baud_rate} baud", path.display());
        Ok(Self::from_writer(port, path.display().to_string()))
    }
}

impl<W: Write> SerialBridge<W> {
    /// Usa qualquer destino `Write` como dispositivo.
    pub fn from_writer(device: W, name: impl Into<String>) -> Self {
        Self {
            device,
            name: name.into(),
        }
    }

    /// Nome do dispositivo para logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_ref(&self) -> &W {
        &self.device
    }

    /// Drena `conn` até o par fechar e faz uma única escrita no dispositivo.
    ///
    /// A conexão é consumida e fechada em qualquer saída.
    pub fn relay_data<R: Read>(&mut self, mut conn: R) -> Result<usize, BridgeError> {
        let mut buf = Vec::new();
        conn.read_to_end(&mut buf).map_err(BridgeError::Read)?;
        drop(conn);

        if buf.is_empty() {
            return Ok(0);
        }

        self.device.write_all(&buf).map_err(BridgeError::Write)?;
        self.device.flush().map_err(BridgeError::Write)?;

        debug!("{} bytes escritos em {}", buf.len(), self.name);
        Ok(buf.len())
    }

    /// Fecha o handle do dispositivo.
    pub fn close(self) {
        debug!("Fechando dispositivo serial {}", self.name);
        drop(self.device);
    }
}

/// Primeiro caminho da lista que existe e é um dispositivo de caractere.
pub fn first_serial_device<P: AsRef<Path>>(candidates: &[P]) -> Option<PathBuf> {
    for candidate in candidates {
        let path = candidate.as_ref();
        let is_char_device = std::fs::metadata(path)
            .map(|m| m.file_type().is_char_device())
            .unwrap_or(false);
        if is_char_device {
            return Some(path.to_path_buf());
        }
    }
    None
}
