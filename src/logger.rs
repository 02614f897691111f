//! Event sink: renders classified events as log lines and persists them
//! as JSON lines
//!
//! Runs on its own thread draining the event queue. Accepted and
//! lifecycle events go to `events.jsonl`, suppressed bounce goes to
//! `chatter.jsonl`, mirroring the split between the input log and the
//! chatter log a user actually reads. Persistence is best-effort: a
//! write failure is logged once and the sink keeps consuming.

use crate::events::ClassifiedEvent;
use crate::keyboard::{key_name, EdgeType};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// One persisted log line
#[derive(Debug, Serialize)]
struct LogRecord {
    timestamp: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    edge: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    threshold_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl LogRecord {
    fn new(kind: &'static str) -> Self {
        let now: DateTime<Utc> = Utc::now();
        Self {
            timestamp: now.to_rfc3339(),
            kind,
            key: None,
            edge: None,
            delay_ms: None,
            threshold_ms: None,
            detail: None,
        }
    }
}

fn edge_label(edge: EdgeType) -> &'static str {
    match edge {
        EdgeType::Down => "down",
        EdgeType::Up => "up",
        EdgeType::AutoRepeat => "auto-repeat",
    }
}

fn as_ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

fn record_for(event: &ClassifiedEvent) -> LogRecord {
    match event {
        ClassifiedEvent::DeviceFound { description } => {
            let mut rec = LogRecord::new("device_found");
            rec.detail = Some(description.clone());
            rec
        }
        ClassifiedEvent::NoDevice => LogRecord::new("no_device"),
        ClassifiedEvent::Accepted { key, edge, delay } => {
            let mut rec = LogRecord::new("accepted");
            rec.key = Some(key_name(*key));
            rec.edge = Some(edge_label(*edge));
            rec.delay_ms = delay.map(as_ms);
            rec
        }
        ClassifiedEvent::Suppressed {
            key,
            delay,
            threshold,
        } => {
            let mut rec = LogRecord::new("chatter");
            rec.key = Some(key_name(*key));
            rec.delay_ms = delay.map(as_ms);
            rec.threshold_ms = Some(as_ms(*threshold));
            rec
        }
        ClassifiedEvent::PauseActivated { forced } => {
            let mut rec = LogRecord::new("pause");
            rec.detail = Some(if *forced { "forced" } else { "manual" }.to_string());
            rec
        }
        ClassifiedEvent::PauseDeactivated => LogRecord::new("resume"),
        ClassifiedEvent::ResumeBlocked => LogRecord::new("resume_blocked"),
        ClassifiedEvent::DroppedWhilePaused { key, edge } => {
            let mut rec = LogRecord::new("dropped_while_paused");
            rec.key = Some(key_name(*key));
            rec.edge = Some(edge_label(*edge));
            rec
        }
        ClassifiedEvent::InjectionError { key, down, cause } => {
            let mut rec = LogRecord::new("injection_error");
            rec.key = Some(key_name(*key));
            rec.edge = Some(if *down { "down" } else { "up" });
            rec.detail = Some(cause.clone());
            rec
        }
        ClassifiedEvent::ArbitrationChanged { grabbed } => {
            let mut rec = LogRecord::new("arbitration");
            rec.detail = Some(if *grabbed { "grabbed" } else { "released" }.to_string());
            rec
        }
        ClassifiedEvent::ThresholdUpdated { global } => {
            let mut rec = LogRecord::new("threshold_updated");
            rec.threshold_ms = Some(as_ms(*global));
            rec
        }
    }
}

/// Render one event through the log facade
fn log_event(event: &ClassifiedEvent) {
    match event {
        ClassifiedEvent::DeviceFound { description } => {
            log::info!("keyboard device found: {}", description)
        }
        ClassifiedEvent::NoDevice => log::warn!("no keyboard device found"),
        ClassifiedEvent::Accepted { key, edge, delay } => match delay {
            Some(delay) => log::debug!(
                "{} {} accepted ({} ms since previous press)",
                key_name(*key),
                edge_label(*edge),
                as_ms(*delay)
            ),
            None => log::debug!("{} {} accepted", key_name(*key), edge_label(*edge)),
        },
        ClassifiedEvent::Suppressed {
            key,
            delay,
            threshold,
        } => match delay {
            Some(delay) => log::info!(
                "chatter detected on {}: delay {} ms (< {} ms)",
                key_name(*key),
                as_ms(*delay),
                as_ms(*threshold)
            ),
            None => log::debug!("{} up swallowed (its down was suppressed)", key_name(*key)),
        },
        ClassifiedEvent::PauseActivated { forced: true } => {
            log::info!("filtering paused (virtualization consumer active)")
        }
        ClassifiedEvent::PauseActivated { forced: false } => log::info!("filtering paused"),
        ClassifiedEvent::PauseDeactivated => log::info!("filtering resumed"),
        ClassifiedEvent::ResumeBlocked => {
            log::warn!("resume refused: virtualization consumer still active")
        }
        ClassifiedEvent::DroppedWhilePaused { key, edge } => {
            log::trace!("{} {} dropped while paused", key_name(*key), edge_label(*edge))
        }
        ClassifiedEvent::InjectionError { key, down, cause } => log::warn!(
            "error injecting {} for {}: {}",
            if *down { "down" } else { "up" },
            key_name(*key),
            cause
        ),
        ClassifiedEvent::ArbitrationChanged { grabbed } => {
            log::info!(
                "device capture {}",
                if *grabbed { "acquired" } else { "released" }
            )
        }
        ClassifiedEvent::ThresholdUpdated { global } => {
            log::info!("debounce threshold updated to {} ms", as_ms(*global))
        }
    }
}

/// Consumes the event queue until the producer disconnects
pub struct EventLogger {
    event_log: Option<File>,
    chatter_log: Option<File>,
    write_failed: bool,
}

impl EventLogger {
    /// Logger with no persistence (log facade only)
    pub fn new() -> Self {
        Self {
            event_log: None,
            chatter_log: None,
            write_failed: false,
        }
    }

    /// Logger appending JSONL files under `dir`
    pub fn with_persistence(
        dir: &Path,
        event_log: bool,
        chatter_log: bool,
    ) -> std::io::Result<Self> {
        let open = |name: &str| -> std::io::Result<File> {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(name))
        };
        Ok(Self {
            event_log: if event_log {
                Some(open("events.jsonl")?)
            } else {
                None
            },
            chatter_log: if chatter_log {
                Some(open("chatter.jsonl")?)
            } else {
                None
            },
            write_failed: false,
        })
    }

    /// Drain the queue until the monitor loop hangs up
    pub fn run(mut self, rx: Receiver<ClassifiedEvent>) {
        for event in rx {
            self.consume(&event);
        }
        log::debug!("event sink drained");
    }

    /// Handle one event
    pub fn consume(&mut self, event: &ClassifiedEvent) {
        log_event(event);
        self.persist(event);
    }

    fn persist(&mut self, event: &ClassifiedEvent) {
        let file = match event {
            ClassifiedEvent::Suppressed { .. } => self.chatter_log.as_mut(),
            _ => self.event_log.as_mut(),
        };
        let Some(file) = file else {
            return;
        };

        let record = record_for(event);
        let result = serde_json::to_string(&record)
            .map_err(std::io::Error::other)
            .and_then(|line| writeln!(file, "{}", line));

        if let Err(e) = result {
            if !self.write_failed {
                log::warn!("event log write failed, persistence disabled: {}", e);
            }
            self.write_failed = true;
            self.event_log = None;
            self.chatter_log = None;
        }
    }
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::new()
    }
}
