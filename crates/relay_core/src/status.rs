//! Contador de bytes com template de mensagem para flush periódico.
//!
//! Incrementado pelo relay a cada escrita no serial e lido/zerado pelo
//! timer de flush do processo dono, em outra thread.

use std::sync::atomic::{AtomicI64, Ordering};

/// Placeholder substituído pelo total de bytes em [`RelayStatus::render`].
pub const BYTES_PLACEHOLDER: &str = "{bytes}";

#[derive(Debug)]
pub struct RelayStatus {
    message: String,
    written: AtomicI64,
}

impl RelayStatus {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            written: AtomicI64::new(0),
        }
    }

    pub fn add(&self, bytes: usize) {
        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);
        self.written.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn load(&self) -> i64 {
        self.written.load(Ordering::SeqCst)
    }

    /// Lê e zera o contador numa única operação atômica.
    pub fn take(&self) -> i64 {
        self.written.swap(0, Ordering::SeqCst)
    }

    /// Formata o template com `bytes`.
    pub fn render(&self, bytes: i64) -> String {
        self.message.replace(BYTES_PLACEHOLDER, &bytes.to_string())
    }
}
