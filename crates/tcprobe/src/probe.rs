use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::deadline::DeadlineStream;
use crate::dial::dial_tcp;
use crate::error::{ProbeError, Result};
use crate::module::ProbeModule;
use crate::output::ProbeSink;
use crate::query::run_query_response;
use crate::tls::earliest_cert_expiry;

/// Something that can probe a target and report a verdict
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `target`, writing diagnostic lines to `sink`
    async fn probe(&self, target: &str, sink: &mut dyn ProbeSink) -> bool;
}

/// TCP/TLS prober driven by a [`ProbeModule`]
#[derive(Debug, Clone)]
pub struct TcpProber {
    module: ProbeModule,
}

impl TcpProber {
    pub fn new(module: ProbeModule) -> Self {
        Self { module }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, target: &str, sink: &mut dyn ProbeSink) -> bool {
        probe_tcp(target, sink, &self.module).await
    }
}

/// Probe `target` once. Never runs past `module.timeout`.
///
/// Every failure collapses to `false`; the cause is logged.
pub async fn probe_tcp(target: &str, sink: &mut dyn ProbeSink, module: &ProbeModule) -> bool {
    match run_probe(target, sink, module).await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                probe_target = target,
                kind = e.kind(),
                error = &e as &(dyn std::error::Error + 'static),
                "TCP probe failed"
            );
            false
        }
    }
}

async fn run_probe(target: &str, sink: &mut dyn ProbeSink, module: &ProbeModule) -> Result<()> {
    let deadline = deadline_after(Instant::now(), module.timeout);

    let conn = timeout_at(deadline, dial_tcp(target, sink, module))
        .await
        .map_err(|_| deadline_exceeded("connecting"))??;

    // If the deadline cannot be installed, fail now rather than risk
    // blocking forever.
    let mut conn = DeadlineStream::install(conn, deadline)?;

    if conn.get_ref().is_secured() {
        match conn.get_ref().peer_certificates().and_then(earliest_cert_expiry) {
            Some(expiry) => {
                let expiry = format!("{:.6}", expiry as f64);
                sink.emit("probe_ssl_earliest_cert_expiry", &expiry);
            }
            None => warn!(probe_target = target, "TLS peer presented no parsable certificate"),
        }
    }

    run_query_response(&mut conn, &module.query_response).await?;
    debug!(probe_target = target, "All query response steps completed");
    Ok(())
}

/// Timeouts too large to represent as an `Instant` are clamped to roughly
/// thirty years out.
fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_exceeded(stage: &str) -> ProbeError {
    ProbeError::Io(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("probe deadline exceeded while {stage}"),
    ))
}
