use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clone_apps::transfer::retry::RetryPolicy;
use clone_apps::transfer::{
    ArtifactClient, CancelToken, Direction, NullSink, TransferCoordinator, TransferOutcome,
    TransferTask,
};
use clone_apps::workspace::ArtifactKind;

fn read_request(stream: &mut TcpStream) -> Vec<u8> {
    stream
        .set_read_timeout(Some(Duration::from_millis(500)))
        .expect("read timeout");
    let mut req = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => req.extend_from_slice(&buf[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
            Err(e) => panic!("read request: {e}"),
        }
        let text = String::from_utf8_lossy(&req);
        let Some(header_end) = text.find("\r\n\r\n") else {
            continue;
        };
        let headers = text[..header_end].to_ascii_lowercase();
        let body_len = req.len() - header_end - 4;
        if let Some(len) = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            if body_len >= len {
                break;
            }
        } else if headers.contains("transfer-encoding: chunked") {
            if text.ends_with("0\r\n\r\n") {
                break;
            }
        } else {
            break;
        }
    }
    req
}

fn respond(stream: &mut TcpStream, status_line: &str, body: &[u8]) {
    let hdr = format!(
        "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(hdr.as_bytes()).expect("write hdr");
    stream.write_all(body).expect("write body");
}

/// Answers one request per script entry, in order, and records the requests.
fn spawn_scripted_server(
    script: Vec<(&'static str, &'static str)>,
) -> (String, Arc<Mutex<Vec<String>>>, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_thread = Arc::clone(&seen);
    let handle = thread::spawn(move || {
        for (status_line, body) in script {
            let (mut stream, _) = listener.accept().expect("accept");
            let req = read_request(&mut stream);
            seen_in_thread
                .lock()
                .expect("lock")
                .push(String::from_utf8_lossy(&req).to_string());
            respond(&mut stream, status_line, body.as_bytes());
        }
    });
    (format!("http://{addr}"), seen, handle)
}

fn coordinator(base: &str, concurrency: usize) -> TransferCoordinator {
    TransferCoordinator::new(
        ArtifactClient::new(reqwest::blocking::Client::new(), base, "bearer tok"),
        RetryPolicy {
            attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_jitter_percent: 50,
        },
        concurrency,
        CancelToken::new(),
        Arc::new(NullSink),
    )
}

fn download_task(dir: &Path, name: &str, kind: ArtifactKind) -> TransferTask {
    TransferTask {
        label: name.to_string(),
        kind,
        remote_path: format!("/v2/apps/{name}/droplet/download"),
        file: dir.join(name),
    }
}

fn files_containing(dir: &Path, needle: &str) -> Vec<String> {
    fs::read_dir(dir)
        .expect("read dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.contains(needle))
        .collect()
}

#[test]
fn not_found_writes_one_sidecar_and_does_not_retry() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let (base, seen, handle) = spawn_scripted_server(vec![("404 Not Found", "no droplet")]);

    let report = coordinator(&base, 5).run(
        Direction::Download,
        vec![download_task(tmp.path(), "web_g-1.droplet", ArtifactKind::Droplet)],
    );
    handle.join().expect("server");

    match &report.results[0].outcome {
        TransferOutcome::Failed {
            attempts, terminal, ..
        } => {
            assert_eq!(*attempts, 1);
            assert!(*terminal);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(seen.lock().expect("lock").len(), 1);
    assert_eq!(
        files_containing(tmp.path(), ".error."),
        vec!["web_g-1.droplet.error.404".to_string()]
    );
    let sidecar = fs::read_to_string(tmp.path().join("web_g-1.droplet.error.404")).expect("sidecar");
    assert_eq!(sidecar, "no droplet");
    assert!(!tmp.path().join("web_g-1.droplet").exists());
}

#[test]
fn transient_failures_are_retried_and_leave_no_sidecar() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let (base, seen, handle) = spawn_scripted_server(vec![
        ("503 Service Unavailable", "busy"),
        ("503 Service Unavailable", "busy"),
        ("200 OK", "droplet-bytes"),
    ]);

    let report = coordinator(&base, 5).run(
        Direction::Download,
        vec![download_task(tmp.path(), "web_g-1.droplet", ArtifactKind::Droplet)],
    );
    handle.join().expect("server");

    assert_eq!(
        report.outcome_of("web_g-1.droplet"),
        Some(&TransferOutcome::Completed { attempts: 3 })
    );
    assert_eq!(seen.lock().expect("lock").len(), 3);
    assert_eq!(
        fs::read(tmp.path().join("web_g-1.droplet")).expect("artifact"),
        b"droplet-bytes"
    );
    assert!(files_containing(tmp.path(), ".error.").is_empty());
    assert!(files_containing(tmp.path(), ".part").is_empty());
}

#[test]
fn exhausted_retries_leave_sidecar_per_status() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let (base, _seen, handle) = spawn_scripted_server(vec![
        ("500 Internal Server Error", "e1"),
        ("502 Bad Gateway", "e2"),
        ("500 Internal Server Error", "e3"),
    ]);

    let report = coordinator(&base, 1).run(
        Direction::Download,
        vec![download_task(tmp.path(), "web_g-1.droplet", ArtifactKind::Droplet)],
    );
    handle.join().expect("server");

    match report.outcome_of("web_g-1.droplet") {
        Some(TransferOutcome::Failed {
            attempts, terminal, ..
        }) => {
            assert_eq!(*attempts, 3);
            assert!(!*terminal);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let mut sidecars = files_containing(tmp.path(), ".error.");
    sidecars.sort();
    assert_eq!(
        sidecars,
        vec![
            "web_g-1.droplet.error.500".to_string(),
            "web_g-1.droplet.error.502".to_string()
        ]
    );
}

#[test]
fn pool_limit_holds_under_load() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let base = format!("http://{}", listener.local_addr().expect("addr"));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let server = {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        thread::spawn(move || {
            let mut handlers = Vec::new();
            for _ in 0..10 {
                let (mut stream, _) = listener.accept().expect("accept");
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                handlers.push(thread::spawn(move || {
                    read_request(&mut stream);
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(100));
                    active.fetch_sub(1, Ordering::SeqCst);
                    respond(&mut stream, "200 OK", b"bits");
                }));
            }
            for h in handlers {
                h.join().expect("handler");
            }
        })
    };

    let tasks = (0..10)
        .map(|i| download_task(tmp.path(), &format!("app{i}_g.droplet"), ArtifactKind::Droplet))
        .collect();
    let report = coordinator(&base, 5).run(Direction::Download, tasks);
    server.join().expect("server");

    assert_eq!(report.completed(), 10);
    assert!(peak.load(Ordering::SeqCst) <= 5);
    for i in 0..10 {
        assert!(tmp.path().join(format!("app{i}_g.droplet")).is_file());
    }
}

#[test]
fn uploads_use_platform_multipart_fields() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let droplet = tmp.path().join("web_g.droplet");
    let source = tmp.path().join("web_g.src");
    fs::write(&droplet, b"DROPLET-CONTENT").expect("droplet");
    fs::write(&source, b"SOURCE-CONTENT").expect("source");

    let (base, seen, handle) = spawn_scripted_server(vec![
        ("201 Created", "{}"),
        ("201 Created", "{}"),
    ]);
    let report = coordinator(&base, 5).run(
        Direction::Upload,
        vec![
            TransferTask {
                label: "web_g.droplet".into(),
                kind: ArtifactKind::Droplet,
                remote_path: "/v2/apps/new-1/droplet/upload".into(),
                file: droplet,
            },
            TransferTask {
                label: "web_g.src".into(),
                kind: ArtifactKind::Source,
                remote_path: "/v2/apps/new-1/bits".into(),
                file: source,
            },
        ],
    );
    handle.join().expect("server");
    assert_eq!(report.completed(), 2);

    let requests = seen.lock().expect("lock").clone();
    let droplet_req = requests
        .iter()
        .find(|r| r.starts_with("PUT /v2/apps/new-1/droplet/upload "))
        .expect("droplet upload");
    assert!(droplet_req.contains("name=\"droplet\""));
    assert!(droplet_req.contains("DROPLET-CONTENT"));
    assert!(droplet_req.to_ascii_lowercase().contains("authorization: bearer tok"));

    let bits_req = requests
        .iter()
        .find(|r| r.starts_with("PUT /v2/apps/new-1/bits "))
        .expect("bits upload");
    assert!(bits_req.contains("name=\"application\""));
    assert!(bits_req.contains("name=\"resources\""));
    assert!(bits_req.contains("[]"));
    assert!(bits_req.contains("SOURCE-CONTENT"));
}

#[test]
fn upload_of_missing_file_is_skipped() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let report = coordinator("http://127.0.0.1:9", 5).run(
        Direction::Upload,
        vec![TransferTask {
            label: "gone.droplet".into(),
            kind: ArtifactKind::Droplet,
            remote_path: "/v2/apps/new-1/droplet/upload".into(),
            file: tmp.path().join("gone.droplet"),
        }],
    );
    assert!(matches!(
        report.outcome_of("gone.droplet"),
        Some(TransferOutcome::Skipped { .. })
    ));
}

#[test]
fn cancelled_batch_dispatches_nothing() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let cancel = CancelToken::new();
    cancel.cancel();
    let coordinator = TransferCoordinator::new(
        ArtifactClient::new(reqwest::blocking::Client::new(), "http://127.0.0.1:9", "bearer tok"),
        RetryPolicy::default(),
        5,
        cancel,
        Arc::new(NullSink),
    );
    let report = coordinator.run(
        Direction::Download,
        vec![
            download_task(tmp.path(), "a_g.droplet", ArtifactKind::Droplet),
            download_task(tmp.path(), "a_g.src", ArtifactKind::Source),
        ],
    );
    assert!(
        report
            .results
            .iter()
            .all(|r| r.outcome == TransferOutcome::Cancelled)
    );
}
