//! Classes de erro compartilhadas pelos módulos.
//!
//! Cada erro tipado (`EnvelopeError`, `IpcError`, `BridgeError`,
//! `RelayError`) expõe `class()` para que o chamador decida a política:
//! configuração e transporte na inicialização são fatais, protocolo aborta
//! apenas o envio atual, timeout só controla o loop de accept.

/// Classe de um erro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Socket ou dispositivo ausente. Não é transitório.
    Configuration,
    /// Falha de serialização ou compressão.
    Protocol,
    /// Falha de connect/write/accept/read.
    Transport,
    /// Deadline do accept expirou (sinal de controle esperado).
    Timeout,
}

impl ErrorClass {
    /// Indica se o erro deve encerrar o processo quando ocorre na
    /// inicialização ou no loop de accept.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorClass::Configuration | ErrorClass::Transport)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorClass::Configuration => "configuração",
            ErrorClass::Protocol => "protocolo",
            ErrorClass::Transport => "transporte",
            ErrorClass::Timeout => "timeout",
        };
        f.write_str(name)
    }
}
