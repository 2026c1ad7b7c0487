use chrono::{Duration as ChronoDuration, Utc};
use navgraph_protocol::{
    Method, NavEvent, NavigationDetails, PageSignal, Request, Response, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};
use serde_json::Value;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_daemon(home: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_navgraph-daemon"))
        .env("HOME", home)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn navgraph-daemon")
}

fn socket_path(home: &Path) -> PathBuf {
    home.join(".navgraph").join("daemon.sock")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() && UnixStream::connect(path).is_ok() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for daemon socket at {}", path.display());
}

fn send_bytes(socket: &Path, bytes: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to daemon socket");
    // The daemon may answer and close before the whole payload is written.
    let _ = stream.write_all(bytes);
    let _ = stream.flush();
    read_response(&mut stream)
}

fn send_request(socket: &Path, request: Request) -> Response {
    let mut bytes = serde_json::to_vec(&request).expect("Failed to serialize request");
    bytes.push(b'\n');
    send_bytes(socket, &bytes)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn request(method: Method, id: &str, params: Option<Value>) -> Request {
    Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(id.to_string()),
        params,
    }
}

fn send_event(socket: &Path, id: &str, event: &NavEvent) -> Response {
    let params = serde_json::to_value(event).expect("Failed to serialize event");
    send_request(socket, request(Method::Event, id, Some(params)))
}

fn wait_for_records(socket: &Path, expected: usize, timeout: Duration) -> Value {
    let deadline = Instant::now() + timeout;
    loop {
        let response = send_request(socket, request(Method::GetSession, "session-poll", None));
        assert!(response.ok, "session response was not ok");
        let data = response.data.expect("session payload");
        let count = data
            .get("records")
            .and_then(|records| records.as_array())
            .map(|records| records.len())
            .unwrap_or(0);
        if count >= expected || Instant::now() >= deadline {
            return data;
        }
        sleep(Duration::from_millis(25));
    }
}

#[test]
fn daemon_ipc_builds_graph_smoke() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path());
    let _guard = DaemonGuard { child };

    wait_for_socket(&socket, Duration::from_secs(5));

    let health = send_request(&socket, request(Method::GetHealth, "health-check", None));
    assert!(health.ok, "health response was not ok");
    let data = health.data.expect("health payload");
    assert_eq!(data.get("status").and_then(Value::as_str), Some("ok"));
    assert!(data.get("session_id").and_then(Value::as_str).is_some());

    let now = Utc::now();
    let commit = |url: &str, kind: &str, offset_ms: i64| {
        NavEvent::NavigationCommitted(NavigationDetails {
            tab_id: 1,
            url: url.to_string(),
            frame_id: 0,
            parent_frame_id: -1,
            timestamp: now + ChronoDuration::milliseconds(offset_ms),
            transition_kind: Some(kind.to_string()),
            transition_qualifiers: Vec::new(),
        })
    };

    let typed = send_event(&socket, "evt-1", &commit("https://a.example", "typed", 0));
    assert!(typed.ok, "typed commit was not accepted");
    assert_eq!(
        typed.data.and_then(|data| data.get("accepted").cloned()),
        Some(Value::Bool(true))
    );

    let root = wait_for_records(&socket, 1, Duration::from_secs(5));
    let root_id = root["records"][0]["id"]
        .as_str()
        .expect("root id")
        .to_string();

    let click = NavEvent::LinkClicked(PageSignal {
        source_page_id: root_id.clone(),
        target_url: "https://a.example/page".to_string(),
        tab_id: 1,
        timestamp: now + ChronoDuration::milliseconds(500),
    });
    assert!(send_event(&socket, "evt-2", &click).ok);
    assert!(send_event(&socket, "evt-3", &commit("https://a.example/page", "link", 800)).ok);

    let graph = wait_for_records(&socket, 2, Duration::from_secs(5));
    let edges = graph["edges"].as_array().expect("edges array");
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0]["source_id"].as_str(), Some(root_id.as_str()));
    assert_eq!(edges[0]["action"].as_str(), Some("link_click"));
}

#[test]
fn daemon_rejects_malformed_requests() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path());
    let _guard = DaemonGuard { child };

    wait_for_socket(&socket, Duration::from_secs(5));

    let invalid_json = send_bytes(&socket, b"{not json}\n");
    assert!(!invalid_json.ok);
    assert_eq!(
        invalid_json.error.map(|err| err.code),
        Some("invalid_json".to_string())
    );

    let mismatch = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION + 1,
            method: Method::GetHealth,
            id: Some("mismatch".to_string()),
            params: None,
        },
    );
    assert_eq!(
        mismatch.error.map(|err| err.code),
        Some("protocol_mismatch".to_string())
    );

    let bad_event = send_request(
        &socket,
        request(
            Method::Event,
            "bad-event",
            Some(serde_json::json!({"type": "tab_removed", "tab_id": -4, "timestamp": Utc::now()})),
        ),
    );
    assert_eq!(
        bad_event.error.map(|err| err.code),
        Some("invalid_tab_id".to_string())
    );

    let missing = send_request(
        &socket,
        request(
            Method::GetSession,
            "missing-session",
            Some(serde_json::json!({"session_id": "nope"})),
        ),
    );
    assert_eq!(
        missing.error.map(|err| err.code),
        Some("session_not_found".to_string())
    );

    let oversized = vec![b'a'; MAX_REQUEST_BYTES + 16];
    let too_large = send_bytes(&socket, &oversized);
    assert_eq!(
        too_large.error.map(|err| err.code),
        Some("request_too_large".to_string())
    );
}
