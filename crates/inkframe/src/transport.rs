//! Wire transport for the power module daemon.
//!
//! The daemon speaks a line protocol over a Unix socket: one request line,
//! one reply line, the reply prefixed with the command's key
//! (`rtc_time: 2025-01-01T00:00:00+00:00`). Production code uses
//! [`SocketTransport`]; [`UnavailableTransport`] stands in when power
//! module support is disabled, and [`ScriptedTransport`] drives
//! deterministic tests.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use ink_common::FrameError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, info};

// ============================================================================
// Commands and reply parsing
// ============================================================================

/// One request to the power module daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleCommand {
    GetRtcTime,
    RtcSyncFromHost,
    SetRtcAlarm {
        fire_time: DateTime<FixedOffset>,
        repeat_mask: u8,
    },
    GetPowerPlugged,
    GetBatteryLevel,
}

impl ModuleCommand {
    /// Request line as sent on the wire, without the trailing newline.
    pub fn wire(&self) -> String {
        match self {
            ModuleCommand::GetRtcTime => "get rtc_time".to_string(),
            ModuleCommand::RtcSyncFromHost => "rtc_pi2rtc".to_string(),
            ModuleCommand::SetRtcAlarm {
                fire_time,
                repeat_mask,
            } => format!("rtc_alarm_set {} {}", fire_time.to_rfc3339(), repeat_mask),
            ModuleCommand::GetPowerPlugged => "get battery_power_plugged".to_string(),
            ModuleCommand::GetBatteryLevel => "get battery".to_string(),
        }
    }

    /// Key the daemon prefixes the reply line with.
    pub fn reply_key(&self) -> &'static str {
        match self {
            ModuleCommand::GetRtcTime => "rtc_time",
            ModuleCommand::RtcSyncFromHost => "rtc_pi2rtc",
            ModuleCommand::SetRtcAlarm { .. } => "rtc_alarm_set",
            ModuleCommand::GetPowerPlugged => "battery_power_plugged",
            ModuleCommand::GetBatteryLevel => "battery",
        }
    }

    /// Operation name for logs and retry messages.
    pub fn describe(&self) -> &'static str {
        match self {
            ModuleCommand::GetRtcTime => "RTC time read",
            ModuleCommand::RtcSyncFromHost => "RTC sync from host",
            ModuleCommand::SetRtcAlarm { .. } => "RTC alarm set",
            ModuleCommand::GetPowerPlugged => "power state query",
            ModuleCommand::GetBatteryLevel => "battery level query",
        }
    }
}

/// Strip `key:` from a reply line and return the trimmed value.
pub fn parse_field<'a>(reply: &'a str, key: &str) -> Result<&'a str, FrameError> {
    let trimmed = reply.trim();
    trimmed
        .strip_prefix(key)
        .and_then(|rest| rest.strip_prefix(':'))
        .map(str::trim)
        .ok_or_else(|| FrameError::Module(format!("unexpected {} reply: {:?}", key, trimmed)))
}

pub fn parse_rtc_time(reply: &str) -> Result<DateTime<FixedOffset>, FrameError> {
    let value = parse_field(reply, "rtc_time")?;
    DateTime::parse_from_rfc3339(value)
        .map_err(|e| FrameError::Module(format!("bad RTC timestamp {:?}: {}", value, e)))
}

/// Commands acknowledged with `done` (case-insensitive).
pub fn parse_done(reply: &str, key: &str) -> Result<(), FrameError> {
    let value = parse_field(reply, key)?;
    if value.to_ascii_lowercase().contains("done") {
        Ok(())
    } else {
        Err(FrameError::Module(format!(
            "{} not acknowledged: {:?}",
            key, value
        )))
    }
}

pub fn parse_bool(reply: &str, key: &str) -> Result<bool, FrameError> {
    let value = parse_field(reply, key)?;
    match value {
        "true" | "True" | "1" => Ok(true),
        "false" | "False" | "0" => Ok(false),
        other => Err(FrameError::Module(format!(
            "bad boolean in {} reply: {:?}",
            key, other
        ))),
    }
}

/// The daemon reports battery as a float percentage; callers get a rounded
/// integer clamped to 0..=100.
pub fn parse_percent(reply: &str, key: &str) -> Result<u8, FrameError> {
    let value = parse_field(reply, key)?;
    let raw: f64 = value
        .parse()
        .map_err(|e| FrameError::Module(format!("bad percentage in {} reply: {}", key, e)))?;
    Ok(raw.clamp(0.0, 100.0).round() as u8)
}

// ============================================================================
// Transport trait
// ============================================================================

/// Connect-then-call transport to the power module daemon.
///
/// `open` failures are `Connection`; `call` failures on an established
/// session are `Module`. Implementations drop broken sessions so the next
/// `open` reconnects.
#[async_trait]
pub trait PowerModuleTransport: Send {
    /// Establish the daemon session. No-op when already open.
    async fn open(&mut self) -> Result<(), FrameError>;

    fn is_open(&self) -> bool;

    /// Send one command and return the raw reply line.
    async fn call(&mut self, cmd: &ModuleCommand) -> Result<String, FrameError>;

    /// Drop the session state. No wire traffic.
    fn close(&mut self);
}

// ============================================================================
// Socket transport (production)
// ============================================================================

/// Unix-socket transport to a PiSugar-compatible daemon.
pub struct SocketTransport {
    path: PathBuf,
    io_timeout: Duration,
    stream: Option<(BufReader<OwnedReadHalf>, OwnedWriteHalf)>,
}

impl SocketTransport {
    pub const DEFAULT_SOCKET: &'static str = "/tmp/pisugar-server.sock";

    pub fn new(path: impl Into<PathBuf>, io_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            io_timeout,
            stream: None,
        }
    }

    async fn exchange(
        io: &mut (BufReader<OwnedReadHalf>, OwnedWriteHalf),
        request: &str,
        io_timeout: Duration,
    ) -> Result<String, FrameError> {
        let (reader, writer) = io;

        match timeout(io_timeout, writer.write_all(request.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(FrameError::Module(format!("request write: {}", e))),
            Err(_) => return Err(FrameError::Module("request write timed out".into())),
        }

        let mut line = String::new();
        match timeout(io_timeout, reader.read_line(&mut line)).await {
            Ok(Ok(0)) => Err(FrameError::Module("daemon closed the connection".into())),
            Ok(Ok(_)) => Ok(line.trim_end().to_string()),
            Ok(Err(e)) => Err(FrameError::Module(format!("reply read: {}", e))),
            Err(_) => Err(FrameError::Module("reply read timed out".into())),
        }
    }
}

#[async_trait]
impl PowerModuleTransport for SocketTransport {
    async fn open(&mut self) -> Result<(), FrameError> {
        if self.stream.is_some() {
            return Ok(());
        }
        match timeout(self.io_timeout, UnixStream::connect(&self.path)).await {
            Ok(Ok(stream)) => {
                let (reader, writer) = stream.into_split();
                self.stream = Some((BufReader::new(reader), writer));
                info!("connected to power module at {}", self.path.display());
                Ok(())
            }
            Ok(Err(e)) => Err(FrameError::Connection(format!(
                "connect {}: {}",
                self.path.display(),
                e
            ))),
            Err(_) => Err(FrameError::Connection(format!(
                "connect {}: timed out",
                self.path.display()
            ))),
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn call(&mut self, cmd: &ModuleCommand) -> Result<String, FrameError> {
        let io = self
            .stream
            .as_mut()
            .ok_or_else(|| FrameError::Connection("no power module session".into()))?;

        let request = cmd.wire() + "\n";
        debug!("-> {}", cmd.wire());
        match Self::exchange(io, &request, self.io_timeout).await {
            Ok(line) => {
                debug!("<- {}", line);
                Ok(line)
            }
            Err(e) => {
                // An I/O failure leaves the stream in an unknown state;
                // drop it so the next attempt reconnects.
                self.stream = None;
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("power module session dropped");
        }
    }
}

// ============================================================================
// Unavailable transport
// ============================================================================

/// Stand-in selected when power module support is disabled. Every
/// operation fails fast with `Connection`, so callers see the same error
/// surface as a daemon that is not running.
pub struct UnavailableTransport;

const UNAVAILABLE: &str = "power module support is disabled";

#[async_trait]
impl PowerModuleTransport for UnavailableTransport {
    async fn open(&mut self) -> Result<(), FrameError> {
        Err(FrameError::Connection(UNAVAILABLE.into()))
    }

    fn is_open(&self) -> bool {
        false
    }

    async fn call(&mut self, _cmd: &ModuleCommand) -> Result<String, FrameError> {
        Err(FrameError::Connection(UNAVAILABLE.into()))
    }

    fn close(&mut self) {}
}

// ============================================================================
// Scripted transport (testing)
// ============================================================================

/// Scripted reply for one command key.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Reply value; the transport prefixes it with `key: ` like the daemon.
    Value(String),
    Fail(FrameError),
}

impl ScriptedReply {
    fn into_result(self, key: &str) -> Result<String, FrameError> {
        match self {
            ScriptedReply::Value(value) => Ok(format!("{}: {}", key, value)),
            ScriptedReply::Fail(err) => Err(err),
        }
    }
}

/// Deterministic transport for tests: per-command reply queues with an
/// optional sticky fallback, a wire log, and an open counter. The log and
/// counter handles stay valid after the transport moves into a client.
pub struct ScriptedTransport {
    queued: HashMap<&'static str, VecDeque<ScriptedReply>>,
    sticky: HashMap<&'static str, ScriptedReply>,
    failing_opens: u32,
    open: bool,
    wire: Arc<Mutex<Vec<String>>>,
    opens: Arc<AtomicU32>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            queued: HashMap::new(),
            sticky: HashMap::new(),
            failing_opens: 0,
            open: false,
            wire: Arc::new(Mutex::new(Vec::new())),
            opens: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Queue one reply value for `key`.
    pub fn reply(mut self, key: &'static str, value: &str) -> Self {
        self.queued
            .entry(key)
            .or_default()
            .push_back(ScriptedReply::Value(value.to_string()));
        self
    }

    /// Queue one failure for `key`.
    pub fn fail_next(mut self, key: &'static str, err: FrameError) -> Self {
        self.queued
            .entry(key)
            .or_default()
            .push_back(ScriptedReply::Fail(err));
        self
    }

    /// Sticky reply used once the queue for `key` is empty.
    pub fn always(mut self, key: &'static str, value: &str) -> Self {
        self.sticky
            .insert(key, ScriptedReply::Value(value.to_string()));
        self
    }

    /// Sticky failure used once the queue for `key` is empty.
    pub fn always_fail(mut self, key: &'static str, err: FrameError) -> Self {
        self.sticky.insert(key, ScriptedReply::Fail(err));
        self
    }

    /// Fail the first `times` open attempts with `Connection`.
    pub fn fail_opens(mut self, times: u32) -> Self {
        self.failing_opens = times;
        self
    }

    /// Wire lines sent so far, in order.
    pub fn wire_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.wire)
    }

    /// Number of open attempts, successful or not.
    pub fn open_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.opens)
    }

    fn resolve(&mut self, key: &'static str) -> Option<ScriptedReply> {
        if let Some(queue) = self.queued.get_mut(key) {
            if let Some(reply) = queue.pop_front() {
                return Some(reply);
            }
        }
        self.sticky.get(key).cloned()
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PowerModuleTransport for ScriptedTransport {
    async fn open(&mut self) -> Result<(), FrameError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.failing_opens > 0 {
            self.failing_opens -= 1;
            return Err(FrameError::Connection("scripted connect failure".into()));
        }
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn call(&mut self, cmd: &ModuleCommand) -> Result<String, FrameError> {
        if !self.open {
            return Err(FrameError::Connection("no power module session".into()));
        }
        self.wire.lock().unwrap().push(cmd.wire());
        let key = cmd.reply_key();
        match self.resolve(key) {
            Some(reply) => reply.into_result(key),
            None => Err(FrameError::Module(format!(
                "unscripted command: {}",
                cmd.wire()
            ))),
        }
    }

    fn close(&mut self) {
        self.open = false;
    }
}
