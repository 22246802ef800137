//! Protocolo de envelope do relay.
//!
//! Cada mensagem é um documento JSON em uma linha:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ {"csum": <u32>, "payload": "<Payload JSON escapado>"}  + '\n'  │
//! └───────────────────────────────────────────────────────────────┘
//! Payload: {"tag": "<string>", "compress": <bool>, "data": "<string>"}
//! ```
//!
//! - `csum` é o Adler-32 dos bytes exatos serializados em `payload`
//! - Com `compress`, `data` vira base64 de zlib nível máximo
//! - A quebra de linha final é o delimitador lido pelo consumidor do host

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Delimitador de mensagens no dispositivo serial.
pub const DELIMITER: u8 = b'\n';

/// Unidade de dados com tag, opcionalmente comprimida.
///
/// A ordem dos campos define a serialização e, portanto, o checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Namespace do dado (ex.: `cpuutil`)
    pub tag: String,
    /// Se `data` contém base64 de bytes comprimidos
    pub compress: bool,
    /// Dado opaco, formato definido pela tag
    pub data: String,
}

/// Objeto externo enviado pelo fio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Adler-32 de `payload`
    #[serde(rename = "csum")]
    pub checksum: u32,
    /// [`Payload`] já serializado em JSON
    pub payload: String,
}

impl Envelope {
    /// Confere o checksum contra os bytes de `payload`.
    pub fn verify(&self) -> bool {
        checksum(self.payload.as_bytes()) == self.checksum
    }
}

/// Erros do protocolo.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Tag vazia")]
    EmptyTag,

    #[error("Erro de compressão: {0}")]
    Compress(#[source] std::io::Error),

    #[error("Erro de serialização: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Envelope inválido: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Checksum incorreto: recebido {received}, calculado {computed}")]
    ChecksumMismatch { received: u32, computed: u32 },

    #[error("Base64 inválido: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Erro de descompressão: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("Dado descomprimido não é UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl EnvelopeError {
    pub fn class(&self) -> crate::ErrorClass {
        crate::ErrorClass::Protocol
    }
}

/// Adler-32 usado no campo `csum`.
pub fn checksum(bytes: &[u8]) -> u32 {
    adler2::adler32_slice(bytes)
}

/// Monta a mensagem pronta para o relay.
///
/// Falha antes de qualquer I/O; nunca devolve saída parcial.
pub fn build_message(tag: &str, data: &str, compress: bool) -> Result<Vec<u8>, EnvelopeError> {
    if tag.is_empty() {
        return Err(EnvelopeError::EmptyTag);
    }

    let data = if compress {
        STANDARD.encode(deflate(data.as_bytes())?)
    } else {
        data.to_owned()
    };

    let payload = Payload {
        tag: tag.to_owned(),
        compress,
        data,
    };
    let payload_json = serde_json::to_string(&payload).map_err(EnvelopeError::Serialize)?;

    let envelope = Envelope {
        checksum: checksum(payload_json.as_bytes()),
        payload: payload_json,
    };
    let mut message = serde_json::to_vec(&envelope).map_err(EnvelopeError::Serialize)?;
    message.push(DELIMITER);

    Ok(message)
}

/// Decodifica uma linha recebida do dispositivo serial.
///
/// Aceita a linha com ou sem o delimitador final. Valida o checksum antes
/// de abrir o payload; com `compress`, o `data` retornado já vem
/// descomprimido (a flag é preservada como veio no fio).
pub fn decode_message(line: &[u8]) -> Result<Payload, EnvelopeError> {
    let line = line.strip_suffix(&[DELIMITER]).unwrap_or(line);
    let envelope: Envelope = serde_json::from_slice(line).map_err(EnvelopeError::Parse)?;

    let computed = checksum(envelope.payload.as_bytes());
    if computed != envelope.checksum {
        return Err(EnvelopeError::ChecksumMismatch {
            received: envelope.checksum,
            computed,
        });
    }

    let mut payload: Payload =
        serde_json::from_str(&envelope.payload).map_err(EnvelopeError::Parse)?;
    if payload.compress {
        let compressed = STANDARD.decode(payload.data.as_bytes())?;
        payload.data = String::from_utf8(inflate(&compressed)?)?;
    }

    Ok(payload)
}

fn deflate(raw: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(raw).map_err(EnvelopeError::Compress)?;
    encoder.finish().map_err(EnvelopeError::Compress)
}

fn inflate(compressed: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut out = Vec::new();
    ZlibDecoder::new(compressed)
        .read_to_end(&mut out)
        .map_err(EnvelopeError::Decompress)?;
    Ok(out)
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
