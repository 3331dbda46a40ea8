use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{ProbeError, Result};

/// PostgreSQL SSLRequest: length 8, request code 80877103.
/// See https://www.postgresql.org/docs/current/protocol-message-formats.html
const POSTGRES_SSL_REQUEST: [u8; 8] = [0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f];

/// In-band upgrade protocols that can precede the TLS handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartTlsMode {
    Postgres,
}

impl FromStr for StartTlsMode {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "postgres" => Ok(StartTlsMode::Postgres),
            other => {
                Err(ProbeError::Configuration(format!("unrecognised STARTTLS mode {other:?}")))
            }
        }
    }
}

impl StartTlsMode {
    /// `None` and the empty string both mean "no upgrade"
    pub fn from_config(mode: Option<&str>) -> Result<Option<Self>> {
        match mode {
            None | Some("") => Ok(None),
            Some(name) => name.parse().map(Some),
        }
    }

    /// Run the plaintext exchange that asks the server to switch to TLS.
    ///
    /// Returns once the server agreed; the stream is then ready for the
    /// client handshake.
    pub async fn negotiate<S>(self, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self {
            StartTlsMode::Postgres => {
                stream.write_all(&POSTGRES_SSL_REQUEST).await?;
                // 'S' for "sure", 'N' for "nah"
                let reply = stream.read_u8().await?;
                debug!("postgres SSLRequest answered with {reply:#04x}");
                if reply != b'S' {
                    return Err(ProbeError::StartTlsRejected(reply));
                }
                Ok(())
            }
        }
    }
}
