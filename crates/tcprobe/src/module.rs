use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tls::TlsConfig;

/// Default time budget for one probe
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which socket family the probe dials with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    /// Resolve with address family fallback
    #[default]
    Tcp,
    /// Pinned to IPv4
    Tcp4,
    /// Pinned to IPv6
    Tcp6,
}

/// IP address family used for resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpProtocol {
    #[serde(alias = "ipv4")]
    Ip4,
    #[default]
    #[serde(alias = "ipv6")]
    Ip6,
}

impl IpProtocol {
    /// The other member of the {ip4, ip6} pair
    pub fn fallback(self) -> Self {
        match self {
            IpProtocol::Ip4 => IpProtocol::Ip6,
            IpProtocol::Ip6 => IpProtocol::Ip4,
        }
    }

    /// IP version number, as reported in `probe_ip_protocol`
    pub fn version(self) -> u8 {
        match self {
            IpProtocol::Ip4 => 4,
            IpProtocol::Ip6 => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            IpProtocol::Ip4 => "ip4",
            IpProtocol::Ip6 => "ip6",
        }
    }

    pub fn matches(self, addr: &IpAddr) -> bool {
        match self {
            IpProtocol::Ip4 => addr.is_ipv4(),
            IpProtocol::Ip6 => addr.is_ipv6(),
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One expect/send step of a scripted conversation.
///
/// An empty `expect` makes the step send-only; an empty `send` makes it
/// expect-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStep {
    #[serde(default)]
    pub expect: String,
    #[serde(default)]
    pub send: String,
}

impl QueryStep {
    pub fn new(expect: impl Into<String>, send: impl Into<String>) -> Self {
        Self { expect: expect.into(), send: send.into() }
    }

    /// Wait for a line matching `pattern` without sending anything
    pub fn expect(pattern: impl Into<String>) -> Self {
        Self::new(pattern, "")
    }

    /// Send `payload` unconditionally
    pub fn send(payload: impl Into<String>) -> Self {
        Self::new("", payload)
    }
}

/// Configuration for one TCP probe attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeModule {
    /// Bound on the whole probe, in seconds in config files
    #[serde(with = "seconds")]
    pub timeout: Duration,
    pub transport_protocol: TransportProtocol,
    pub preferred_ip_protocol: IpProtocol,
    pub tls: bool,
    pub tls_config: TlsConfig,
    pub query_response: Vec<QueryStep>,
}

impl Default for ProbeModule {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            transport_protocol: TransportProtocol::default(),
            preferred_ip_protocol: IpProtocol::default(),
            tls: false,
            tls_config: TlsConfig::default(),
            query_response: Vec::new(),
        }
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}
