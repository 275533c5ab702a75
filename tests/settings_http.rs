//! HTTP settings backend against an in-process dashboard stand-in.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;

use presence_monitor::{HttpSettingsBackend, HttpSettingsConfig, SettingsBackend};

struct CapturedRequest {
    request_line: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl CapturedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Serve one request with a canned reply; returns the base url and the captured request.
fn serve_once(status_line: &'static str, reply: &'static str) -> (String, mpsc::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

        let mut request_line = String::new();
        reader.read_line(&mut request_line).expect("request line");
        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).expect("header line");
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.push((key.trim().to_string(), value.trim().to_string()));
            }
        }
        let content_length = headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.parse::<usize>().ok())
            .unwrap_or(0);
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).expect("body");

        let mut stream = stream;
        let response = format!(
            "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            reply.len(),
            reply
        );
        stream.write_all(response.as_bytes()).expect("write response");
        let _ = tx.send(CapturedRequest {
            request_line: request_line.trim_end().to_string(),
            headers,
            body: String::from_utf8(body).expect("utf8 body"),
        });
    });
    (format!("http://{}", addr), rx)
}

fn backend(base_url: String, cookie: Option<&str>) -> HttpSettingsBackend {
    HttpSettingsBackend::new(HttpSettingsConfig {
        base_url,
        session_cookie: cookie.map(str::to_string),
        timeout_ms: 2_000,
    })
    .expect("backend")
}

#[test]
fn posts_room_flag_with_session_cookie() {
    let (base_url, captured) = serve_once("HTTP/1.1 200 OK", r#"{"status":"success"}"#);
    let backend = backend(base_url, Some("session=abc123"));

    backend.set_ai_control("2", true).expect("update accepted");

    let request = captured.recv().expect("captured request");
    assert_eq!(request.request_line, "POST /api/update-room-settings HTTP/1.1");
    assert_eq!(request.header("cookie"), Some("session=abc123"));
    assert_eq!(request.header("content-type"), Some("application/json"));
    let body: serde_json::Value = serde_json::from_str(&request.body).expect("json body");
    assert_eq!(body, serde_json::json!({ "room_id": "2", "ai_control": true }));
}

#[test]
fn error_envelope_is_a_failure() {
    let (base_url, _captured) = serve_once(
        "HTTP/1.1 200 OK",
        r#"{"status":"error","message":"Room not found"}"#,
    );
    let backend = backend(base_url, None);

    let err = backend.set_ai_control("99", false).unwrap_err();
    assert!(err.to_string().contains("Room not found"));
}

#[test]
fn http_error_status_is_a_failure() {
    let (base_url, captured) = serve_once(
        "HTTP/1.1 401 Unauthorized",
        r#"{"status":"error","message":"Login required"}"#,
    );
    let backend = backend(base_url, None);

    let err = backend.set_ai_control("2", false).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("401"));
    assert!(message.contains("Login required"));

    let request = captured.recv().expect("captured request");
    assert!(request.header("cookie").is_none());
    let body: serde_json::Value = serde_json::from_str(&request.body).expect("json body");
    assert_eq!(body["ai_control"], serde_json::json!(false));
}

#[test]
fn unreachable_dashboard_is_a_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let backend = backend(format!("http://{}", addr), None);
    assert!(backend.set_ai_control("2", true).is_err());
}
