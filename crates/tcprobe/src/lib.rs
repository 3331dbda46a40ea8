//! Scripted TCP health-check probe.
//!
//! A probe resolves the target (with IPv4/IPv6 fallback), connects in
//! plain text, direct TLS or via a STARTTLS upgrade, and then walks a list
//! of expect/send steps over the connection. The verdict is a single
//! boolean; measurements are written as `key value` lines to a
//! [`ProbeSink`].
//!
//! ```no_run
//! # async fn run() {
//! use tcprobe::{ProbeModule, QueryStep, probe_tcp};
//!
//! let module = ProbeModule {
//!     query_response: vec![QueryStep::expect("^220 "), QueryStep::send("QUIT")],
//!     ..Default::default()
//! };
//! let mut lines: Vec<String> = Vec::new();
//! let ok = probe_tcp("mail.example.com:25", &mut lines, &module).await;
//! # }
//! ```

pub mod deadline;
pub mod dial;
pub mod error;
pub mod module;
pub mod output;
pub mod probe;
pub mod query;
pub mod starttls;
pub mod tls;

pub use dial::{Connection, dial_tcp, split_host_port};
pub use error::ProbeError;
pub use module::{IpProtocol, ProbeModule, QueryStep, TransportProtocol};
pub use output::{ProbeSink, WriterSink};
pub use probe::{Prober, TcpProber, probe_tcp};
pub use query::run_query_response;
pub use starttls::StartTlsMode;
pub use tls::TlsConfig;
