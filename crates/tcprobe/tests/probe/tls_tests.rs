//! Direct TLS probes

use std::time::Duration;

use tcprobe::{ProbeModule, QueryStep, TlsConfig, probe_tcp};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::time::Instant;

use crate::common::{NOT_AFTER_EPOCH, TestCert, init_tracing, spawn_peer};

fn expiry_line() -> String {
    format!("probe_ssl_earliest_cert_expiry {NOT_AFTER_EPOCH}.000000")
}

#[tokio::test]
async fn test_tls_without_script_reports_expiry() {
    init_tracing();
    let cert = TestCert::new();
    let ca_file = cert.ca_file();
    let acceptor = cert.acceptor();

    let (target, _peer) = spawn_peer(move |stream| async move {
        if let Ok(mut tls) = acceptor.accept(stream).await {
            let mut rest = Vec::new();
            let _ = tls.read_to_end(&mut rest).await;
        }
    })
    .await;

    let module =
        ProbeModule { tls: true, tls_config: cert.trusting_config(&ca_file), ..Default::default() };

    let mut lines: Vec<String> = Vec::new();
    assert!(probe_tcp(&target, &mut lines, &module).await);
    assert_eq!(lines, vec!["probe_ip_protocol 4".to_string(), expiry_line()]);
}

#[tokio::test]
async fn test_tls_script() {
    let cert = TestCert::new();
    let ca_file = cert.ca_file();
    let acceptor = cert.acceptor();

    let (target, peer) = spawn_peer(move |stream| async move {
        let tls = acceptor.accept(stream).await.unwrap();
        let mut conn = BufReader::new(tls);
        conn.write_all(b"* OK IMAP4rev1 ready\r\n").await.unwrap();
        conn.flush().await.unwrap();
        let mut line = String::new();
        conn.read_line(&mut line).await.unwrap();
        line
    })
    .await;

    let module = ProbeModule {
        tls: true,
        tls_config: cert.trusting_config(&ca_file),
        query_response: vec![QueryStep::new(r"^\* OK (\w+)", "a1 CAPABILITY ${1}")],
        ..Default::default()
    };

    let mut lines: Vec<String> = Vec::new();
    assert!(probe_tcp(&target, &mut lines, &module).await);
    assert_eq!(peer.await.unwrap(), "a1 CAPABILITY IMAP4rev1\n");
}

#[tokio::test]
async fn test_untrusted_certificate_fails_handshake() {
    let cert = TestCert::new();
    let acceptor = cert.acceptor();
    let (target, _peer) = spawn_peer(move |stream| async move {
        let _ = acceptor.accept(stream).await;
    })
    .await;

    let module = ProbeModule {
        tls: true,
        tls_config: TlsConfig { server_name: Some("localhost".to_string()), ..Default::default() },
        ..Default::default()
    };

    let mut lines: Vec<String> = Vec::new();
    assert!(!probe_tcp(&target, &mut lines, &module).await);
    assert_eq!(lines, vec!["probe_ip_protocol 4"]);
}

#[tokio::test]
async fn test_insecure_skip_verify_accepts_untrusted_certificate() {
    let cert = TestCert::new();
    let acceptor = cert.acceptor();
    let (target, _peer) = spawn_peer(move |stream| async move {
        if let Ok(mut tls) = acceptor.accept(stream).await {
            let mut rest = Vec::new();
            let _ = tls.read_to_end(&mut rest).await;
        }
    })
    .await;

    let module = ProbeModule {
        tls: true,
        tls_config: TlsConfig { insecure_skip_verify: true, ..Default::default() },
        ..Default::default()
    };

    let mut lines: Vec<String> = Vec::new();
    assert!(probe_tcp(&target, &mut lines, &module).await);
    assert_eq!(lines, vec!["probe_ip_protocol 4".to_string(), expiry_line()]);
}

#[tokio::test]
async fn test_broken_tls_config_fails_after_resolution() {
    let (target, _peer) = spawn_peer(|stream| async move { drop(stream) }).await;
    let module = ProbeModule {
        tls: true,
        tls_config: TlsConfig { ca_file: Some("/nonexistent/ca.pem".into()), ..Default::default() },
        ..Default::default()
    };

    let mut lines: Vec<String> = Vec::new();
    assert!(!probe_tcp(&target, &mut lines, &module).await);
    assert_eq!(lines, vec!["probe_ip_protocol 4"]);
}

#[tokio::test]
async fn test_silent_tls_peer_hits_deadline() {
    let (target, _peer) = spawn_peer(|stream| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(stream);
    })
    .await;

    let module = ProbeModule {
        timeout: Duration::from_millis(300),
        tls: true,
        tls_config: TlsConfig { insecure_skip_verify: true, ..Default::default() },
        ..Default::default()
    };

    let start = Instant::now();
    let mut lines: Vec<String> = Vec::new();
    assert!(!probe_tcp(&target, &mut lines, &module).await);
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(lines, vec!["probe_ip_protocol 4"]);
}
