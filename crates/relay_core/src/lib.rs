//! # Relay Core
//!
//! Crate compartilhada que define o envelope JSON com checksum Adler-32,
//! o envio via socket Unix local, a ponte para o dispositivo serial e o
//! ciclo de vida do relay que liga os dois.
//!
//! ## Módulos
//! - [`envelope`] – Construção/decodificação do envelope (tag, compressão, checksum)
//! - [`ipc`] – Envio de mensagens prontas ao relay pelo socket local
//! - [`serial`] – Ponte socket → dispositivo serial
//! - [`listener`] – Accept com deadline sobre o listener Unix
//! - [`relay`] – Loop de accept, shutdown cooperativo e teardown
//! - [`status`] – Contador atômico de bytes para flush periódico
//! - [`config`] – Configuração unificada via TOML
//! - [`error`] – Classes de erro (configuração, protocolo, transporte, timeout)

pub mod config;
pub mod envelope;
pub mod error;
pub mod ipc;
pub mod listener;
pub mod relay;
pub mod serial;
pub mod status;

// Re-exports convenientes
pub use config::{AppConfig, MonitorConfig, RelayConfig};
pub use envelope::{build_message, decode_message, Envelope, Payload};
pub use error::ErrorClass;
pub use ipc::{send_bytes, send_message, DEFAULT_SOCKET_PATH};
pub use relay::{Relay, RelayState, ShutdownHandle};
pub use serial::{SerialBridge, DEFAULT_BAUD_RATE};
pub use status::RelayStatus;
