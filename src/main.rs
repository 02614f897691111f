//! Chatter Guard - keyboard contact-bounce filter daemon
//!
//! Opens the physical keyboard, debounces its edges, and re-emits
//! clean keystrokes on a uinput virtual device until interrupted.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chatter_guard::config::{app_dir, Config};
use chatter_guard::events::{ClassifiedEvent, EventQueue};
use chatter_guard::keyboard::{DeviceError, EvdevSource, UinputSink};
use chatter_guard::logger::EventLogger;
use chatter_guard::virt::ProcessProbe;
use chatter_guard::Monitor;

const DEVICE_RETRY: Duration = Duration::from_secs(2);
const VIRTUAL_NAME: &str = "Chatter Guard Virtual Keyboard";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("failed to load config, using defaults: {}", e);
            Config::default()
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        })
        .context("failed to install signal handler")?;
    }

    let sink = Arc::new(
        UinputSink::create(VIRTUAL_NAME).context("failed to create virtual keyboard")?,
    );
    log::info!("virtual keyboard created: {}", VIRTUAL_NAME);

    let event_logger = match logger_for(&config) {
        Ok(logger) => logger,
        Err(e) => {
            log::warn!("event log files unavailable: {}", e);
            EventLogger::new()
        }
    };
    let (mut queue, rx) = EventQueue::bounded(config.monitor.queue_capacity);
    let sink_thread = thread::spawn(move || event_logger.run(rx));

    let source = open_source(stop.as_ref(), &mut queue)?;

    let probe = ProcessProbe::new(config.virtualization.process_names.clone());
    let (mut monitor, _handle) = Monitor::new(
        source,
        sink,
        probe,
        config.snapshot(),
        queue,
        config.arbitration_interval(),
        config.idle_sleep(),
        Arc::clone(&stop),
    );

    monitor.run();
    drop(monitor);

    if sink_thread.join().is_err() {
        log::warn!("event sink thread panicked");
    }
    Ok(())
}

/// Open the physical keyboard, retrying until one appears or the stop
/// flag is set
fn open_source(stop: &AtomicBool, queue: &mut EventQueue) -> Result<EvdevSource> {
    loop {
        match EvdevSource::open() {
            Ok(source) => return Ok(source),
            Err(DeviceError::NoDevices) => {
                queue.push(ClassifiedEvent::NoDevice);
                log::warn!("no keyboard device found, retrying");
            }
            Err(e @ DeviceError::PermissionDenied(_)) => {
                return Err(e).context("cannot open input device (are you in the input group?)");
            }
            Err(e) => return Err(e).context("failed to open input device"),
        }

        if stop.load(Ordering::Relaxed) {
            anyhow::bail!("interrupted while waiting for a keyboard device");
        }
        thread::sleep(DEVICE_RETRY);
    }
}

fn logger_for(config: &Config) -> std::io::Result<EventLogger> {
    if !config.logging.event_log && !config.logging.chatter_log {
        return Ok(EventLogger::new());
    }
    let dir = app_dir().map_err(std::io::Error::other)?;
    EventLogger::with_persistence(&dir, config.logging.event_log, config.logging.chatter_log)
}
