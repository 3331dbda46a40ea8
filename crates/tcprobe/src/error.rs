use std::error::Error as StdError;
use std::io::Error as IoError;

use thiserror::Error;

/// Everything that can make a TCP probe fail.
///
/// All variants collapse to a failed verdict at the probe boundary; the
/// distinction only survives in logs.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("could not resolve {host:?} as {families}: {source}")]
    Resolution {
        host: String,
        families: String,
        #[source]
        source: IoError,
    },

    #[error("could not build TLS configuration: {context}")]
    TlsConfig {
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("invalid expect pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("server declined STARTTLS upgrade (replied {0:#04x})")]
    StartTlsRejected(u8),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] IoError),

    #[error("{0:#}")]
    Io(#[from] IoError),
}

impl ProbeError {
    /// Short taxonomy name, used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeError::Resolution { .. } => "resolution",
            ProbeError::TlsConfig { .. } => "tls_config",
            ProbeError::Configuration(_) | ProbeError::InvalidPattern { .. } => "configuration",
            ProbeError::StartTlsRejected(_) => "starttls_rejected",
            ProbeError::Handshake(_) => "handshake",
            ProbeError::Io(_) => "io",
        }
    }

    /// TLS configuration failure caused by `source`
    pub(crate) fn tls_config(
        context: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        ProbeError::TlsConfig { context: context.into(), source: Some(source.into()) }
    }

    /// TLS configuration failure with no underlying error
    pub(crate) fn tls_config_msg(context: impl Into<String>) -> Self {
        ProbeError::TlsConfig { context: context.into(), source: None }
    }
}

pub type Result<T, E = ProbeError> = std::result::Result<T, E>;
