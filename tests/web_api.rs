//! HTTP surface against a running monitor on the simulated backend

use security_monitor::config_store::{ConfigStore, MonitorSettings};
use security_monitor::hardware::HardwareParts;
use security_monitor::monitor_loop::{Monitor, MonitorHandle, MonitorPhase};
use security_monitor::state::{AppConfig, AppState, BasicCredentials};
use security_monitor::web_api;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

struct Server {
    _dir: tempfile::TempDir,
    addr: SocketAddr,
    handle: MonitorHandle,
    state: AppState,
}

impl Server {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn serve(auth: Option<BasicCredentials>) -> Server {
    let dir = tempfile::tempdir().unwrap();
    let settings = MonitorSettings {
        poll_period: Duration::from_millis(10),
        buzzer_pulse: Duration::from_millis(1),
        capture_interval: Duration::from_millis(10),
        image_width: 64,
        image_height: 48,
        ..MonitorSettings::default()
    };
    let config = AppConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        image_dir: dir.path().join("captures"),
        static_dir: dir.path().join("static"),
        auth,
        ..AppConfig::default()
    };

    let parts = HardwareParts::from_config(&config.hardware, &settings.camera_settings());
    let simulator = parts.simulator.clone();
    let monitor = Monitor::initialize(
        parts,
        Arc::new(ConfigStore::new(settings)),
        config.monitor_options(),
    )
    .await
    .unwrap();
    let handle = monitor.handle();
    tokio::spawn(monitor.run());
    handle.wait_for_phase(MonitorPhase::Running).await;

    let state = AppState::new(config, handle.clone(), simulator);
    let app = web_api::create_app(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        _dir: dir,
        addr,
        handle,
        state,
    }
}

/// Read the body until `done` holds for what has arrived so far
async fn read_until(resp: &mut reqwest::Response, done: impl Fn(&[u8]) -> bool) -> Vec<u8> {
    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(&buf) {
            match resp.chunk().await.unwrap() {
                Some(chunk) => buf.extend_from_slice(&chunk),
                None => break,
            }
        }
    })
    .await
    .expect("stream stalled");
    buf
}

async fn get_json(client: &reqwest::Client, url: &str) -> Value {
    client.get(url).send().await.unwrap().json().await.unwrap()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[tokio::test]
async fn test_health_and_status() {
    let server = serve(None).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(server.url("/healthz"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["phase"], "RUNNING");

    let status: Value = client
        .get(server.url("/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["phase"], "RUNNING");
    assert!(status["counters"]["polls"].is_u64());
}

#[tokio::test]
async fn test_health_degraded_when_overloaded_or_stopped() {
    let server = serve(None).await;
    let client = reqwest::Client::new();
    let url = server.url("/healthz");

    server.state.system_health.write().await.record(99.0, 10.0);
    assert_eq!(get_json(&client, &url).await["status"], "degraded");

    server.state.system_health.write().await.record(10.0, 10.0);
    assert_eq!(get_json(&client, &url).await["status"], "ok");

    server.handle.shutdown().trigger();
    server.handle.wait_for_phase(MonitorPhase::Stopped).await;
    let body = get_json(&client, &url).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["phase"], "STOPPED");
}

#[tokio::test]
async fn test_capture_names_are_checked() {
    let server = serve(None).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(server.url("/static/captures/..%2F..%2Fetc%2Fpasswd"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(server.url("/static/captures/door_20240101_120000.jpg"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error_code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_sse_delivers_event_and_capture_is_served() {
    let server = serve(None).await;
    let client = reqwest::Client::new();

    // Skip the initial-state event
    let polls = || server.handle.status().counters.polls;
    tokio::time::timeout(Duration::from_secs(5), async {
        while polls() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let mut events = client.get(server.url("/events")).send().await.unwrap();
    assert_eq!(events.status(), 200);
    assert!(events.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let resp = client
        .post(server.url("/api/test/sensors"))
        .json(&json!({ "door_open": true, "motion_detected": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body = read_until(&mut events, |buf| contains(buf, b"\n\n")).await;
    let text = String::from_utf8(body).unwrap();
    let data = text
        .lines()
        .find_map(|line| line.strip_prefix("data:"))
        .expect("no data line");
    let event: Value = serde_json::from_str(data.trim()).unwrap();
    assert_eq!(event["door"], "OPEN");
    assert_eq!(event["motion"], "NONE");

    let image = event["image"].as_str().expect("capture name");
    let resp = client
        .get(server.url(&format!("/static/captures/{}", image)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "image/jpeg");
    let jpeg = resp.bytes().await.unwrap();
    assert!(jpeg.starts_with(&[0xFF, 0xD8]));
}

#[tokio::test]
async fn test_video_feed_sends_mjpeg_parts() {
    let server = serve(None).await;
    let client = reqwest::Client::new();

    let mut resp = client.get(server.url("/video_feed")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-type"],
        "multipart/x-mixed-replace; boundary=frame"
    );

    let prefix = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    let body = read_until(&mut resp, |buf| buf.len() >= prefix.len() + 2).await;
    assert!(body.starts_with(prefix));
    assert_eq!(&body[prefix.len()..prefix.len() + 2], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn test_settings_update_and_validation() {
    let server = serve(None).await;
    let client = reqwest::Client::new();

    let resp = client
        .put(server.url("/api/settings"))
        .json(&json!({ "buzzer_interval": 1.5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["data"]["reload"]["timing"], true);
    assert_eq!(body["data"]["settings"]["buzzer_interval"], 1.5);

    let resp = client
        .put(server.url("/api/settings"))
        .json(&json!({ "door_sensor_pin": 99 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error_code"], "VALIDATION_ERROR");

    let current: Value = client
        .get(server.url("/api/settings"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(current["data"]["door_sensor_pin"], 16);
}

#[tokio::test]
async fn test_basic_auth_guards_every_route() {
    let server = serve(Some(BasicCredentials {
        username: "admin".to_string(),
        password: "secret".to_string(),
    }))
    .await;
    let client = reqwest::Client::new();

    let resp = client.get(server.url("/api/status")).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(
        resp.headers()["www-authenticate"],
        "Basic realm=\"Login Required\""
    );

    let resp = client
        .get(server.url("/video_feed"))
        .basic_auth("admin", Some("wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(server.url("/api/status"))
        .basic_auth("admin", Some("secret"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}
