//! Plain TCP probes and scripted conversations

use std::time::Duration;

use tcprobe::{IpProtocol, ProbeModule, Prober, QueryStep, TcpProber, TransportProtocol, probe_tcp};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::time::Instant;

use crate::common::{closed_port, init_tracing, module_with_timeout, spawn_peer};

#[tokio::test]
async fn test_plain_connect_without_script() {
    init_tracing();
    let (target, peer) = spawn_peer(|mut stream| async move {
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        rest
    })
    .await;

    let mut lines: Vec<String> = Vec::new();
    assert!(probe_tcp(&target, &mut lines, &ProbeModule::default()).await);
    // Preferred ip6 does not resolve for an IPv4 literal, so ip4 is reported.
    assert_eq!(lines, vec!["probe_ip_protocol 4"]);

    // Connection was released and nothing was sent.
    assert!(peer.await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pinned_ipv4_transport() {
    let (target, _peer) = spawn_peer(|stream| async move { drop(stream) }).await;
    let module = ProbeModule {
        transport_protocol: TransportProtocol::Tcp4,
        preferred_ip_protocol: IpProtocol::Ip6,
        ..Default::default()
    };

    let mut lines: Vec<String> = Vec::new();
    assert!(probe_tcp(&target, &mut lines, &module).await);
    assert_eq!(lines, vec!["probe_ip_protocol 4"]);
}

#[tokio::test]
async fn test_unbounded_timeout_still_converses() {
    init_tracing();
    let (target, _peer) = spawn_peer(|mut stream| async move {
        stream.write_all(b"READY\n").await.unwrap();
    })
    .await;

    let module: ProbeModule = toml::from_str(
        r#"
        timeout = 1e19

        [[query_response]]
        expect = "^READY$"
        "#,
    )
    .unwrap();
    assert!(module.timeout > Duration::from_secs(u64::from(u32::MAX)));

    let mut lines: Vec<String> = Vec::new();
    assert!(probe_tcp(&target, &mut lines, &module).await);
    assert_eq!(lines, vec!["probe_ip_protocol 4"]);
}

#[tokio::test]
async fn test_scripted_conversation() {
    init_tracing();
    let (target, peer) = spawn_peer(|stream| async move {
        let mut conn = BufReader::new(stream);
        conn.write_all(b"220 OK user=alice\r\n").await.unwrap();

        let mut received = Vec::new();
        let mut line = String::new();
        conn.read_line(&mut line).await.unwrap();
        received.push(line.clone());

        conn.write_all(b"250-first\r\n250 done\r\n").await.unwrap();
        line.clear();
        conn.read_line(&mut line).await.unwrap();
        received.push(line);
        received
    })
    .await;

    let module = ProbeModule {
        query_response: vec![
            QueryStep::new(r"^220 OK user=(\w+)", r"HELLO \1"),
            QueryStep::expect("^250 "),
            QueryStep::send("QUIT"),
        ],
        ..Default::default()
    };

    let mut lines: Vec<String> = Vec::new();
    assert!(probe_tcp(&target, &mut lines, &module).await);
    assert_eq!(lines, vec!["probe_ip_protocol 4"]);
    assert_eq!(peer.await.unwrap(), vec!["HELLO alice\n", "QUIT\n"]);
}

#[tokio::test]
async fn test_unmatched_step_short_circuits() {
    let (target, peer) = spawn_peer(|mut stream| async move {
        stream.write_all(b"500 go away\n").await.unwrap();
        stream.shutdown().await.unwrap();
        let mut received = String::new();
        stream.read_to_string(&mut received).await.unwrap();
        received
    })
    .await;

    let module = ProbeModule {
        query_response: vec![
            QueryStep::send("HELLO"),
            QueryStep::expect("^220 "),
            QueryStep::send("QUIT"),
        ],
        ..Default::default()
    };

    let mut lines: Vec<String> = Vec::new();
    assert!(!probe_tcp(&target, &mut lines, &module).await);
    assert_eq!(peer.await.unwrap(), "HELLO\n");
}

#[tokio::test]
async fn test_invalid_regex_fails_probe() {
    let (target, _peer) = spawn_peer(|mut stream| async move {
        let _ = stream.write_all(b"anything\n").await;
    })
    .await;

    let module = ProbeModule { query_response: vec![QueryStep::expect("([")], ..Default::default() };
    let mut lines: Vec<String> = Vec::new();
    assert!(!probe_tcp(&target, &mut lines, &module).await);
    assert_eq!(lines, vec!["probe_ip_protocol 4"]);
}

#[tokio::test]
async fn test_silent_peer_hits_deadline() {
    let (target, _peer) = spawn_peer(|stream| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(stream);
    })
    .await;

    let mut module = module_with_timeout(Duration::from_millis(300));
    module.query_response = vec![QueryStep::expect("^never")];

    let start = Instant::now();
    let mut lines: Vec<String> = Vec::new();
    assert!(!probe_tcp(&target, &mut lines, &module).await);
    assert!(start.elapsed() < Duration::from_secs(3), "probe ran for {:?}", start.elapsed());
    assert_eq!(lines, vec!["probe_ip_protocol 4"]);
}

#[tokio::test]
async fn test_connection_refused() {
    let target = closed_port().await;
    let mut lines: Vec<String> = Vec::new();
    assert!(!probe_tcp(&target, &mut lines, &ProbeModule::default()).await);
    // Resolution already succeeded, so the family is still reported.
    assert_eq!(lines, vec!["probe_ip_protocol 4"]);
}

#[tokio::test]
async fn test_malformed_target_emits_nothing() {
    let mut lines: Vec<String> = Vec::new();
    assert!(!probe_tcp("127.0.0.1", &mut lines, &ProbeModule::default()).await);
    assert!(lines.is_empty());
}

#[tokio::test]
async fn test_repeated_probes_are_identical() {
    let module = ProbeModule {
        query_response: vec![QueryStep::new(r"^id=(\d+)", "ACK $1"), QueryStep::expect("^bye$")],
        ..Default::default()
    };

    let mut runs = Vec::new();
    for _ in 0..2 {
        let (target, peer) = spawn_peer(|stream| async move {
            let mut conn = BufReader::new(stream);
            conn.write_all(b"hello\nid=42\n").await.unwrap();
            let mut line = String::new();
            conn.read_line(&mut line).await.unwrap();
            conn.write_all(b"bye\n").await.unwrap();
            line
        })
        .await;

        let mut lines: Vec<String> = Vec::new();
        let verdict = probe_tcp(&target, &mut lines, &module).await;
        runs.push((verdict, lines, peer.await.unwrap()));
    }

    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[0], (true, vec!["probe_ip_protocol 4".to_string()], "ACK 42\n".to_string()));
}

#[tokio::test]
async fn test_prober_trait_object() {
    let (target, _peer) = spawn_peer(|mut stream| async move {
        stream.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await.unwrap();
    })
    .await;

    let prober: Box<dyn Prober> = Box::new(TcpProber::new(ProbeModule {
        query_response: vec![QueryStep::expect("^SSH-2.0-")],
        ..Default::default()
    }));

    let mut output = String::new();
    assert!(prober.probe(&target, &mut output).await);
    assert_eq!(output, "probe_ip_protocol 4\n");
}
