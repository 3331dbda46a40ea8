use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use rustls::pki_types::CertificateDer;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, lookup_host};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use crate::error::{ProbeError, Result};
use crate::module::{IpProtocol, ProbeModule, TransportProtocol};
use crate::output::ProbeSink;
use crate::starttls::StartTlsMode;

/// An established probe connection.
///
/// Only the secured variant carries TLS session data.
pub enum Connection {
    Plain(TcpStream),
    Secured(Box<TlsStream<TcpStream>>),
}

impl Connection {
    /// Certificates the peer presented during the handshake
    pub fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        match self {
            Connection::Plain(_) => None,
            Connection::Secured(tls) => tls.get_ref().1.peer_certificates(),
        }
    }

    pub fn is_secured(&self) -> bool {
        matches!(self, Connection::Secured(_))
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Connection::Secured(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Connection::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Connection::Secured(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Connection::Secured(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Connection::Secured(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Split `host:port`, accepting bracketed IPv6 literals (`[::1]:5432`)
pub fn split_host_port(target: &str) -> Result<(&str, u16)> {
    let invalid = |reason: &str| ProbeError::Configuration(format!("target {target:?} {reason}"));

    let (host, port) = if let Some(rest) = target.strip_prefix('[') {
        rest.split_once("]:").ok_or_else(|| invalid("has an unterminated [ or no port"))?
    } else {
        let (host, port) =
            target.rsplit_once(':').ok_or_else(|| invalid("must be in format host:port"))?;
        if host.contains(':') {
            return Err(invalid("has too many colons, bracket IPv6 addresses"));
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(invalid("is missing a host"));
    }
    let port = port.parse::<u16>().map_err(|_| invalid("has an invalid port number"))?;
    Ok((host, port))
}

/// Families to try, in order. At most two attempts.
fn resolution_order(module: &ProbeModule) -> Vec<IpProtocol> {
    match module.transport_protocol {
        TransportProtocol::Tcp => {
            vec![module.preferred_ip_protocol, module.preferred_ip_protocol.fallback()]
        }
        TransportProtocol::Tcp4 => vec![IpProtocol::Ip4],
        TransportProtocol::Tcp6 => vec![IpProtocol::Ip6],
    }
}

async fn resolve(host: &str, port: u16, family: IpProtocol) -> io::Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> =
        lookup_host((host, port)).await?.filter(|addr| family.matches(&addr.ip())).collect();

    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no {family} address found for {host}"),
        ));
    }
    Ok(addrs)
}

/// Resolve `host` against the configured families and report which one
/// actually answered.
async fn resolve_target(
    host: &str,
    port: u16,
    module: &ProbeModule,
) -> Result<(IpProtocol, Vec<SocketAddr>)> {
    let families = resolution_order(module);
    let mut last_error = None;

    for &family in &families {
        match resolve(host, port, family).await {
            Ok(addrs) => {
                debug!("Resolved {host} as {family}: {addrs:?}");
                return Ok((family, addrs));
            }
            Err(e) => {
                debug!("Resolving {host} as {family} failed: {e}");
                last_error = Some(e);
            }
        }
    }

    Err(ProbeError::Resolution {
        host: host.to_string(),
        families: families.iter().map(|f| f.name()).collect::<Vec<_>>().join(", "),
        source: last_error.unwrap_or_else(|| io::Error::other("no address family to try")),
    })
}

async fn connect(addrs: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connecting to {addr} failed: {e}");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| io::Error::other("no address to connect to")))
}

/// Open the probe connection to `target`.
///
/// Emits `probe_ip_protocol` as soon as resolution succeeds. An unknown
/// STARTTLS mode fails before anything touches the network.
pub async fn dial_tcp(
    target: &str,
    sink: &mut dyn ProbeSink,
    module: &ProbeModule,
) -> Result<Connection> {
    let starttls = if module.tls {
        StartTlsMode::from_config(module.tls_config.starttls.as_deref())?
    } else {
        None
    };

    let (host, port) = split_host_port(target)?;
    let (family, addrs) = resolve_target(host, port, module).await?;
    sink.emit("probe_ip_protocol", &family.version());

    if !module.tls {
        return Ok(Connection::Plain(connect(&addrs).await?));
    }

    let connector = TlsConnector::from(module.tls_config.generate_config()?);
    let server_name = module.tls_config.server_name(host)?;

    let stream = match starttls {
        Some(mode) => {
            let mut stream = connect(&addrs).await?;
            mode.negotiate(&mut stream).await?;
            stream
        }
        None => connect(&addrs).await.map_err(ProbeError::Handshake)?,
    };

    let tls = connector.connect(server_name, stream).await.map_err(ProbeError::Handshake)?;
    debug!("TLS handshake with {target} complete");
    Ok(Connection::Secured(Box::new(tls)))
}
