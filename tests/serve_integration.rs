//! Purpose: End-to-end tests for the HTTP/JSON server over TCP.
//! Exports: None (integration test module).
//! Role: Validate fix/generate endpoints and error translation across TCP.
//! Invariants: Uses a loopback-only server on an ephemeral port.
//! Invariants: Bounded waits avoid test flakiness.
//! Invariants: Server processes are cleaned up on drop.

use serde_json::{Value, json};
use std::io::Read;
use std::net::{SocketAddr, TcpListener};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

static SERVER_LOCK: Mutex<()> = Mutex::new(());

struct TestServer {
    child: Child,
    base_url: String,
    _server_guard: MutexGuard<'static, ()>,
}

impl TestServer {
    fn start() -> TestResult<Self> {
        let guard = SERVER_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let mut last_err: Option<Box<dyn std::error::Error>> = None;
        for _attempt in 0..3 {
            let port = pick_port()?;
            let bind = format!("127.0.0.1:{port}");
            let base_url = format!("http://{bind}");

            let mut child = Command::new(env!("CARGO_BIN_EXE_crashflow"))
                .arg("serve")
                .arg("--bind")
                .arg(&bind)
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()?;

            match wait_for_server(&mut child, bind.parse()?) {
                Ok(()) => {
                    return Ok(Self {
                        child,
                        base_url,
                        _server_guard: guard,
                    });
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    last_err = Some(err);
                    sleep(Duration::from_millis(30));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| "server failed to start".into()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn pick_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

fn wait_for_server(child: &mut Child, addr: SocketAddr) -> TestResult<()> {
    // The welcome endpoint doubles as the readiness probe.
    let url = format!("http://{addr}/api");
    let start = Instant::now();
    loop {
        if let Ok(resp) = ureq::get(&url).call() {
            if resp.status() == 200 {
                return Ok(());
            }
        }
        if let Some(status) = child.try_wait()? {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            let detail = stderr.trim();
            return Err(format!(
                "server exited before ready (status: {status}, stderr: {})",
                if detail.is_empty() { "<empty>" } else { detail }
            )
            .into());
        }
        if start.elapsed() > Duration::from_secs(8) {
            return Err("server did not start in time".into());
        }
        sleep(Duration::from_millis(20));
    }
}

fn get_json(url: &str) -> TestResult<Value> {
    let resp = ureq::get(url).set("Accept", "application/json").call()?;
    assert_eq!(resp.status(), 200);
    Ok(serde_json::from_str(&resp.into_string()?)?)
}

fn post_json(url: &str, payload: &Value) -> Result<ureq::Response, ureq::Error> {
    ureq::post(url)
        .set("Content-Type", "application/json")
        .send_string(&payload.to_string())
}

fn response_json(resp: ureq::Response) -> TestResult<Value> {
    Ok(serde_json::from_str(&resp.into_string()?)?)
}

fn bad_request_body(err: ureq::Error) -> TestResult<Value> {
    match err {
        ureq::Error::Status(400, resp) => response_json(resp),
        ureq::Error::Status(code, _) => Err(format!("unexpected status {code}").into()),
        other => Err(format!("unexpected transport error: {other}").into()),
    }
}

#[test]
fn welcome_endpoint_returns_static_message() -> TestResult<()> {
    let server = TestServer::start()?;

    let body = get_json(&server.url("/api"))?;
    let message = body.get("message").and_then(Value::as_str);
    assert!(message.is_some_and(|m| !m.is_empty()));
    Ok(())
}

#[test]
fn fix_json_normalizes_wrapped_payload() -> TestResult<()> {
    let server = TestServer::start()?;

    let malformed = r#""[{\"ColliRptNum\": \"123\"}]""#;
    let resp = post_json(
        &server.url("/api/fix-json"),
        &json!({ "malformed_json": malformed }),
    )?;
    assert_eq!(resp.status(), 200);

    let body = response_json(resp)?;
    let fixed = body
        .get("fixed_json")
        .and_then(Value::as_str)
        .ok_or("fixed_json missing")?;
    let value: Value = serde_json::from_str(fixed)?;
    assert_eq!(value, json!([{"ColliRptNum": "123"}]));
    Ok(())
}

#[test]
fn fix_json_rejects_non_string_field() -> TestResult<()> {
    let server = TestServer::start()?;

    let err = post_json(&server.url("/api/fix-json"), &json!({ "malformed_json": 7 }))
        .expect_err("validation failure");
    let body = bad_request_body(err)?;
    assert!(body.get("error").and_then(Value::as_str).is_some());
    Ok(())
}

#[test]
fn fix_json_undecodable_payload_is_bad_request() -> TestResult<()> {
    let server = TestServer::start()?;

    let err = post_json(
        &server.url("/api/fix-json"),
        &json!({ "malformed_json": "definitely not json" }),
    )
    .expect_err("decode failure");
    let body = bad_request_body(err)?;
    assert!(body.get("error").and_then(Value::as_str).is_some());
    Ok(())
}

#[test]
fn generate_sql_returns_batched_script() -> TestResult<()> {
    let server = TestServer::start()?;

    let payload = json!({
        "records": [
            {"ColliRptNum": "1", "CityName": "Seattle", "Latitude": 47.0, "Longitude": -122.0},
            {"ColliRptNum": "2"},
            {"ColliRptNum": "3"},
        ],
        "mode": "Pedestrian",
        "batch_size": 2,
    });
    let resp = post_json(&server.url("/api/generate-sql"), &payload)?;
    assert_eq!(resp.status(), 200);

    let body = response_json(resp)?;
    let sql = body.get("sql").and_then(Value::as_str).ok_or("sql missing")?;
    assert!(sql.contains("-- Mode: Pedestrian"));
    assert!(sql.contains("-- Records: 3"));
    assert_eq!(sql.matches("INSERT INTO crashdata").count(), 2);
    assert!(sql.contains("ON CONFLICT (\"ColliRptNum\") DO NOTHING;"));
    assert!(sql.contains("ST_SetSRID(ST_MakePoint(-122.0, 47.0), 4326)"));
    Ok(())
}

#[test]
fn generate_sql_rejects_non_array_records() -> TestResult<()> {
    let server = TestServer::start()?;

    let err = post_json(
        &server.url("/api/generate-sql"),
        &json!({ "records": {"rows": []}, "mode": "Pedestrian" }),
    )
    .expect_err("validation failure");
    let body = bad_request_body(err)?;
    assert!(body.get("error").and_then(Value::as_str).is_some());
    Ok(())
}

#[test]
fn generate_sql_rejects_zero_batch_size() -> TestResult<()> {
    let server = TestServer::start()?;

    let err = post_json(
        &server.url("/api/generate-sql"),
        &json!({ "records": [], "mode": "Pedestrian", "batch_size": 0 }),
    )
    .expect_err("usage failure");
    let body = bad_request_body(err)?;
    assert!(body.get("error").and_then(Value::as_str).is_some());
    Ok(())
}
