//! Shared fixtures for the inkframe integration tests.
#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{DynamicImage, ImageOutputFormat};
use ink_common::display::{DisplayManager, RecordingEpd};
use ink_common::RetryPolicy;
use inkframe::alarm::AlarmScheduler;
use inkframe::config::{ConnectivitySection, PowerSection, Settings};
use inkframe::net::ConnectivityProbe;
use inkframe::orchestrator::Frame;
use inkframe::power::PowerModuleClient;
use inkframe::telemetry::Telemetry;
use inkframe::transport::ScriptedTransport;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixListener};

/// PNG bytes for a small grayscale test image.
pub fn png_bytes() -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::new_luma8(4, 4)
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    bytes
}

fn http_response(status: u16) -> Vec<u8> {
    let reason = match status {
        200 => "OK",
        204 => "No Content",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    };
    let body = if status == 200 { png_bytes() } else { Vec::new() };
    let mut response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason,
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(&body);
    response
}

/// Minimal HTTP server answering a scripted status sequence, the last
/// status repeating forever. 200 responses carry a PNG body. Returns the
/// base URL and a hit counter.
pub async fn spawn_http(statuses: Vec<u16>) -> (String, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
        let mut remaining = statuses;
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let status = if remaining.len() > 1 {
                remaining.remove(0)
            } else {
                remaining.first().copied().unwrap_or(200)
            };
            counter.fetch_add(1, Ordering::SeqCst);

            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let _ = stream.write_all(&http_response(status)).await;
        }
    });

    (format!("http://{}", addr), hits)
}

/// PiSugar-style daemon stub on a Unix socket: always on battery, clock
/// pinned to 2025-01-01T00:00:00+00:00.
pub async fn spawn_power_daemon(path: &Path) {
    let listener = UnixListener::bind(path).unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let reply = match line.as_str() {
                    "get rtc_time" => "rtc_time: 2025-01-01T00:00:00+00:00".to_string(),
                    "get battery" => "battery: 55.0".to_string(),
                    "get battery_power_plugged" => "battery_power_plugged: false".to_string(),
                    "rtc_pi2rtc" => "rtc_pi2rtc: done".to_string(),
                    other if other.starts_with("rtc_alarm_set ") => {
                        "rtc_alarm_set: done".to_string()
                    }
                    _ => "error: unknown command".to_string(),
                };
                if writer.write_all((reply + "\n").as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    });
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1))
}

/// Probe with a short poll interval against the given stub URL.
pub fn fast_probe(http: &reqwest::Client, url: &str) -> ConnectivityProbe {
    ConnectivityProbe::new(http.clone(), url.to_string(), Duration::from_millis(20))
}

/// Transport scripted for a clean arm sequence.
pub fn happy_transport() -> ScriptedTransport {
    ScriptedTransport::new()
        .always("rtc_time", "2025-01-01T00:00:00+00:00")
        .always("rtc_pi2rtc", "done")
        .always("rtc_alarm_set", "done")
        .always("battery", "77.3")
}

/// Observation handles that stay valid after the frame takes ownership.
pub struct FrameHandles {
    pub ops: Arc<Mutex<Vec<String>>>,
    pub wire: Arc<Mutex<Vec<String>>>,
    pub opens: Arc<AtomicU32>,
}

/// Frame wired to a recording display, a scripted transport, and stub
/// HTTP endpoints.
pub fn build_frame(
    transport: ScriptedTransport,
    image_url: &str,
    probe_url: &str,
) -> (Frame, FrameHandles) {
    let driver = RecordingEpd::new();
    let ops = driver.ops();
    let wire = transport.wire_log();
    let opens = transport.open_counter();

    let http = http_client();
    let probe = fast_probe(&http, probe_url);

    let frame = Frame {
        display: Arc::new(tokio::sync::Mutex::new(DisplayManager::with_driver(
            Box::new(driver),
        ))),
        client: PowerModuleClient::new(Box::new(transport), fast_policy()),
        scheduler: AlarmScheduler::new(probe),
        http,
        image_url: image_url.to_string(),
        fetch_policy: RetryPolicy::new(2, Duration::from_millis(1)),
        telemetry: Telemetry::disabled(),
    };

    (frame, FrameHandles { ops, wire, opens })
}

/// Settings for driving the orchestrator directly. Shutdown suppressed so
/// no test can touch the host.
pub fn test_settings(image_url: &str) -> Settings {
    Settings {
        epd: "mock".to_string(),
        image_url: image_url.to_string(),
        interval_minutes: 20,
        power: PowerSection::default(),
        connectivity: ConnectivitySection::default(),
        suppress_shutdown: true,
        shutdown_delay_minutes: 1,
        mqtt: None,
    }
}
