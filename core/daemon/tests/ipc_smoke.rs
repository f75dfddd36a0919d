use playgate_protocol::{
    Method, Request, Response, StatusReply, UnlockReply, ERROR_INVALID_PARAMS,
    ERROR_PROTOCOL_MISMATCH,
};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
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

fn spawn_daemon(home: &Path) -> DaemonGuard {
    let child = Command::new(env!("CARGO_BIN_EXE_playgate-daemon"))
        .env("HOME", home)
        .env_remove("PLAYGATE_SOCKET")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn playgate-daemon");
    DaemonGuard { child }
}

fn data_dir(home: &Path) -> PathBuf {
    home.join(".playgate")
}

fn write_fast_config(home: &Path) {
    std::fs::create_dir_all(data_dir(home)).unwrap();
    std::fs::write(
        data_dir(home).join("config.toml"),
        "[grant]\nduration_secs = 1\n\n[reconciliation]\nperiod_secs = 1\n\n[watch]\nstore_poll_ms = 50\n",
    )
    .unwrap();
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for daemon socket at {}", path.display());
}

fn start(home: &Path) -> (DaemonGuard, PathBuf) {
    let guard = spawn_daemon(home);
    let socket = data_dir(home).join("daemon.sock");
    wait_for_socket(&socket, Duration::from_secs(3));
    (guard, socket)
}

fn send_raw(socket: &Path, payload: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to daemon socket");
    stream.write_all(payload).expect("Failed to write request");
    stream.flush().ok();
    let mut line = String::new();
    BufReader::new(stream)
        .read_line(&mut line)
        .expect("Failed to read response");
    serde_json::from_str(line.trim_end()).expect("Failed to parse response JSON")
}

fn send(socket: &Path, request: &Request) -> Response {
    let mut payload = serde_json::to_vec(request).unwrap();
    payload.push(b'\n');
    send_raw(socket, &payload)
}

fn status(socket: &Path) -> StatusReply {
    let response = send(socket, &Request::new(Method::GetStatus, "status"));
    assert!(response.ok, "status failed: {:?}", response.error);
    serde_json::from_value(response.data.unwrap()).unwrap()
}

fn stored_unlocked_until(home: &Path) -> Option<Value> {
    let raw = std::fs::read_to_string(data_dir(home).join("store.json")).ok()?;
    let document: Value = serde_json::from_str(&raw).ok()?;
    document
        .get("values")
        .and_then(|values| values.get("unlocked_until"))
        .cloned()
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

#[test]
fn health_unlock_and_status_round_trip() {
    let home = TempDir::new().unwrap();
    let (_guard, socket) = start(home.path());

    let health = send(&socket, &Request::new(Method::GetHealth, "health"));
    assert!(health.ok);
    let data = health.data.unwrap();
    assert_eq!(data["status"], "ok");
    assert_eq!(data["grant_duration_secs"], 1800);
    assert_eq!(data["gate_active"], false);
    assert_eq!(health.id.as_deref(), Some("health"));

    assert!(!status(&socket).active);
    assert_eq!(stored_unlocked_until(home.path()), Some(Value::Null));

    let before = now_ms();
    let response = send(&socket, &Request::new(Method::RequestUnlock, "unlock"));
    assert!(response.ok, "unlock failed: {:?}", response.error);
    let reply: UnlockReply = serde_json::from_value(response.data.unwrap()).unwrap();
    assert!(reply.success);
    let deadline = reply.unlocked_until.unwrap();
    assert!(deadline >= before + 1_800_000);

    let after = status(&socket);
    assert!(after.active);
    assert_eq!(after.unlocked_until, Some(deadline));
    assert!(after.remaining_ms.unwrap() <= 1_800_000);
    assert!(after.gated_domains.iter().any(|domain| domain == "youtube.com"));
    assert_eq!(stored_unlocked_until(home.path()), Some(json!(deadline)));

    let health = send(&socket, &Request::new(Method::GetHealth, "health-after"));
    let data = health.data.unwrap();
    assert_eq!(data["gate_active"], true);
    assert_eq!(data["armed_deadline"], json!(deadline));
}

#[test]
fn rejects_malformed_requests() {
    let home = TempDir::new().unwrap();
    let (_guard, socket) = start(home.path());

    let mut with_params = Request::new(Method::RequestUnlock, "params");
    with_params.params = Some(json!({"minutes": 90}));
    let response = send(&socket, &with_params);
    assert!(!response.ok);
    assert_eq!(response.error.unwrap().code, ERROR_INVALID_PARAMS);
    assert!(!status(&socket).active);

    let mut old = Request::new(Method::GetHealth, "old");
    old.protocol_version = 99;
    let response = send(&socket, &old);
    assert_eq!(response.error.unwrap().code, ERROR_PROTOCOL_MISMATCH);

    let response = send_raw(&socket, b"{not json\n");
    assert_eq!(response.error.unwrap().code, "invalid_json");

    let response = send_raw(&socket, b"   \n");
    assert_eq!(response.error.unwrap().code, "empty_request");

    let response = send_raw(
        &socket,
        br#"{"protocol_version":1,"method":"grant_forever"}
"#,
    );
    assert_eq!(response.error.unwrap().code, "invalid_json");
}

#[test]
fn grant_expires_on_its_own() {
    let home = TempDir::new().unwrap();
    write_fast_config(home.path());
    let (_guard, socket) = start(home.path());

    let response = send(&socket, &Request::new(Method::RequestUnlock, "unlock"));
    assert!(response.ok);
    assert!(status(&socket).active);

    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if stored_unlocked_until(home.path()) == Some(Value::Null) {
            break;
        }
        sleep(Duration::from_millis(50));
    }
    assert_eq!(stored_unlocked_until(home.path()), Some(Value::Null));
    assert!(!status(&socket).active);
}

#[test]
fn startup_clears_grant_that_expired_while_stopped() {
    let home = TempDir::new().unwrap();
    std::fs::create_dir_all(data_dir(home.path())).unwrap();
    std::fs::write(
        data_dir(home.path()).join("store.json"),
        json!({
            "version": 1,
            "values": {"unlocked_until": now_ms() - 60_000, "current_task": "taxes"}
        })
        .to_string(),
    )
    .unwrap();

    let (_guard, socket) = start(home.path());

    assert_eq!(stored_unlocked_until(home.path()), Some(Value::Null));
    assert!(!status(&socket).active);

    let raw = std::fs::read_to_string(data_dir(home.path()).join("store.json")).unwrap();
    let document: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(document["values"]["current_task"], "taxes");
}

#[test]
fn oversized_request_is_rejected() {
    let home = TempDir::new().unwrap();
    let (_guard, socket) = start(home.path());

    let payload = vec![b'a'; playgate_protocol::MAX_REQUEST_BYTES + 1];
    let response = send_raw(&socket, &payload);
    assert!(!response.ok);
    assert_eq!(response.error.unwrap().code, "request_too_large");
    assert!(!status(&socket).active);
}
