#[path = "common/mod.rs"]
mod common;

use bucketflow::{ExportError, NetworkSink, NetworkTarget, RecordSink, StructuredRecord};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;

fn plain_target(port: u16) -> NetworkTarget {
    NetworkTarget {
        host: "127.0.0.1".to_string(),
        port,
        tls: false,
        verify_hostname: true,
        accept_invalid_certs: false,
        ca_file: None,
    }
}

fn record(time: &str, raw: &str) -> StructuredRecord {
    StructuredRecord {
        time: time.to_string(),
        source: "/var/log/app.log".to_string(),
        host: "web01".to_string(),
        sourcetype: "app".to_string(),
        raw: raw.to_string(),
        index: "main".to_string(),
        fields: vec![("env".to_string(), "prod".to_string())],
    }
}

/// Accept one connection and collect newline-delimited lines until the peer closes.
fn spawn_receiver(listener: TcpListener) -> thread::JoinHandle<Vec<String>> {
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        BufReader::new(stream).lines().map(|l| l.unwrap()).collect()
    })
}

/// Each record arrives as one JSON line; `close` ends the stream cleanly.
#[test]
fn records_arrive_as_json_lines() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let rx = spawn_receiver(listener);

    let mut sink = Box::new(NetworkSink::connect(&plain_target(port)).unwrap());
    sink.send(&record("1564820000", "first")).unwrap();
    sink.send(&record("1564820001", "second\nline")).unwrap();
    sink.close().unwrap();

    let lines = rx.join().unwrap();
    assert_eq!(lines.len(), 2);
    let v: Vec<serde_json::Value> = lines.iter().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(v[0]["raw"], "first");
    assert_eq!(v[0]["env"], "prod");
    assert_eq!(v[1]["raw"], "second\nline");
    assert_eq!(v[1]["index"], "main");
}

/// A receiver that talks back (and never reads its own input) still gets every record and
/// a clean EOF: `close` half-closes and drains instead of resetting the connection.
#[test]
fn close_drains_receiver_chatter() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let rx = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(b"welcome\nready\n").unwrap();
        BufReader::new(stream).lines().map(|l| l.unwrap()).collect::<Vec<_>>()
    });

    let mut sink = Box::new(NetworkSink::connect(&plain_target(port)).unwrap());
    for i in 0..100 {
        sink.send(&record(&format!("{}", 1_564_820_000 + i), "payload")).unwrap();
    }
    sink.close().unwrap();

    assert_eq!(rx.join().unwrap().len(), 100);
}

/// Nothing listening: connect fails with a sink-connect error naming the target.
#[test]
fn refused_connection_is_a_sink_connect_error() {
    let port = {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };

    let err = NetworkSink::connect(&plain_target(port)).err().unwrap();
    match &err {
        ExportError::SinkConnect { target, .. } => assert_eq!(target, &format!("127.0.0.1:{port}")),
        other => panic!("expected SinkConnect, got {other}"),
    }
    assert_eq!(err.kind(), "sink_connect");
}

#[cfg(unix)]
mod end_to_end {
    use super::common::*;
    use super::*;
    use bucketflow::BucketExport;

    /// Full run against a local plain-TCP receiver.
    #[test]
    fn export_streams_to_receiver() {
        let tmp = tempfile::tempdir().unwrap();
        let idx = tmp.path().join("idx");
        let b = make_bucket(&idx, "main", "db", "db_1566429310_1564819155_1", 1_566_429_310, 1_564_819_155);
        write_export(&b, &sample_export("web01"));
        let script = write_fake_extractor(tmp.path());

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let rx = spawn_receiver(listener);

        let summary = BucketExport::new()
            .directory(&idx)
            .window(EARLIEST, LATEST)
            .extract_command(fake_extractor_argv(&script))
            .extra_field("env", "prod")
            .network("127.0.0.1", port)
            .num_streams(1)
            .progress(false)
            .run()
            .unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.records, 2);

        let recs = parse_jsonl(&rx.join().unwrap().join("\n"));
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0]["index"], "main");
        assert_eq!(recs[0]["env"], "prod");
        assert_eq!(recs[1]["raw"], "stack trace begins\n   at frame two");
    }

    /// A receiver that hangs up mid-stream fails only that bucket, with a write error; the
    /// other bucket, on its own connection, is delivered in full.
    #[test]
    fn receiver_hangup_fails_only_that_bucket() {
        let tmp = tempfile::tempdir().unwrap();
        let idx = tmp.path().join("idx");
        let flaky = make_bucket(&idx, "main", "db", "db_1566429310_1564819155_1", 1_566_429_310, 1_564_819_155);
        write_export_head(
            &flaky,
            &[export_line(1_564_820_000, "flaky", "one"), export_line(1_564_820_001, "flaky", "two")],
        );
        let filler: Vec<String> = (0..5000i64)
            .map(|i| export_line(1_564_821_000 + i, "flaky", "filler payload that keeps the socket busy"))
            .collect();
        write_export(&flaky, &filler);
        let steady = make_bucket(&idx, "web", "db", "db_1566000000_1565000000_2", 1_566_000_000, 1_565_000_000);
        write_export(&steady, &sample_export("steady"));
        let script = write_fake_extractor(tmp.path());

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        // Hang up on the flaky bucket after its first record; read the other to EOF.
        let rx = thread::spawn(move || {
            let mut conns = Vec::new();
            for _ in 0..2 {
                let (stream, _) = listener.accept().unwrap();
                conns.push(thread::spawn(move || {
                    let mut rdr = BufReader::new(stream);
                    let mut first = String::new();
                    rdr.read_line(&mut first).unwrap();
                    if first.contains(r#""host":"flaky""#) {
                        return Vec::new();
                    }
                    let mut lines = vec![first.trim_end().to_string()];
                    lines.extend(rdr.lines().map(|l| l.unwrap()));
                    lines
                }));
            }
            conns.into_iter().flat_map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });

        let summary = BucketExport::new()
            .directory(&idx)
            .window(EARLIEST, LATEST)
            .extract_command(fake_extractor_argv(&script))
            .network("127.0.0.1", port)
            .num_streams(2)
            .progress(false)
            .run()
            .unwrap();

        assert_eq!((summary.attempted, summary.succeeded, summary.failed), (2, 1, 1));
        let failed: Vec<_> = summary.failures().collect();
        assert_eq!(failed[0].bucket, flaky);
        let err = failed[0].error.as_ref().unwrap();
        assert_eq!(err.kind(), "sink_write", "{err}");

        let delivered = parse_jsonl(&rx.join().unwrap().join("\n"));
        assert_eq!(delivered.len(), 2);
        assert!(delivered.iter().all(|r| r["host"] == "steady"));
    }

    /// An unreachable receiver fails the task before the extractor runs.
    #[test]
    fn unreachable_receiver_fails_the_task() {
        let tmp = tempfile::tempdir().unwrap();
        let idx = tmp.path().join("idx");
        let b = make_bucket(&idx, "main", "db", "db_1566429310_1564819155_1", 1_566_429_310, 1_564_819_155);
        write_export(&b, &sample_export("web01"));
        let script = write_fake_extractor(tmp.path());
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };

        let summary = BucketExport::new()
            .directory(&idx)
            .window(EARLIEST, LATEST)
            .extract_command(fake_extractor_argv(&script))
            .network("127.0.0.1", port)
            .progress(false)
            .run()
            .unwrap();
        assert_eq!((summary.attempted, summary.failed), (1, 1));
        assert_eq!(summary.reports[0].error.as_ref().unwrap().kind(), "sink_connect");
        assert_eq!(summary.records, 0);
    }
}

#[cfg(target_os = "linux")]
mod tls {
    use super::*;
    use native_tls::{Identity, TlsAcceptor};
    use std::path::PathBuf;

    const CERT_PEM: &[u8] = include_bytes!("fixtures/tls/cert.pem");
    const KEY_PEM: &[u8] = include_bytes!("fixtures/tls/key.pem");

    /// Self-signed cert for `receiver.bucketflow.test`, also usable as its own root.
    fn ca_path() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/tls/cert.pem")
    }

    /// TLS receiver on 127.0.0.1; a failed handshake yields no lines.
    fn spawn_tls_receiver() -> (u16, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let acceptor = TlsAcceptor::new(Identity::from_pkcs8(CERT_PEM, KEY_PEM).unwrap()).unwrap();
            let (tcp, _) = listener.accept().unwrap();
            match acceptor.accept(tcp) {
                Ok(tls) => BufReader::new(tls).lines().map_while(Result::ok).collect(),
                Err(_) => Vec::new(),
            }
        });
        (port, handle)
    }

    fn tls_target(port: u16, verify_hostname: bool, accept_invalid_certs: bool, ca: bool) -> NetworkTarget {
        NetworkTarget {
            tls: true,
            verify_hostname,
            accept_invalid_certs,
            ca_file: ca.then(ca_path),
            ..plain_target(port)
        }
    }

    fn send_two(target: &NetworkTarget) -> Result<(), ExportError> {
        let mut sink = Box::new(NetworkSink::connect(target)?);
        sink.send(&record("1564820000", "first"))?;
        sink.send(&record("1564820001", "second"))?;
        sink.close()
    }

    /// Trusted root but the name doesn't match 127.0.0.1: rejected while hostname checks are
    /// on, delivered encrypted once they are off.
    #[test]
    fn hostname_check_is_independent_of_chain_validation() {
        let (port, rx) = spawn_tls_receiver();
        let err = send_two(&tls_target(port, true, false, true)).unwrap_err();
        assert_eq!(err.kind(), "sink_connect", "{err}");
        assert!(rx.join().unwrap().is_empty());

        let (port, rx) = spawn_tls_receiver();
        send_two(&tls_target(port, false, false, true)).unwrap();
        let lines = rx.join().unwrap();
        assert_eq!(lines.len(), 2);
        let v: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(v["raw"], "second");
    }

    /// Without a trusted root the self-signed chain is rejected unless invalid certs are
    /// explicitly accepted.
    #[test]
    fn self_signed_receiver_needs_explicit_acceptance() {
        let (port, rx) = spawn_tls_receiver();
        let err = send_two(&tls_target(port, false, false, false)).unwrap_err();
        assert_eq!(err.kind(), "sink_connect", "{err}");
        assert!(rx.join().unwrap().is_empty());

        let (port, rx) = spawn_tls_receiver();
        send_two(&tls_target(port, false, true, false)).unwrap();
        assert_eq!(rx.join().unwrap().len(), 2);
    }

    /// A missing CA file is a connect error for the task.
    #[test]
    fn missing_ca_file_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let target = NetworkTarget {
            ca_file: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..tls_target(port, true, false, false)
        };
        let err = NetworkSink::connect(&target).err().unwrap();
        assert!(matches!(err, ExportError::SinkConnect { .. }));
    }
}
