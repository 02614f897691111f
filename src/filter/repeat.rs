//! Repeat emitter pool
//!
//! The engine ignores hardware auto-repeat, so held keys repeat through
//! this pool instead: one cancellable thread per held non-modifier key,
//! emitting synthetic press+release pairs at a configured cadence after
//! an initial hold delay.
//!
//! Pool threads only touch the output sink; they never read or mutate
//! filter state. Synchronization with the monitor loop is limited to
//! the per-task cancel flag and a failure channel the loop drains once
//! per tick.

use crate::keyboard::{KeyCode, OutputSink};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Granularity of cancellable sleeps. Bounds how long a cancelled task
/// can keep running: one slice plus one in-flight emission cycle.
const SLEEP_SLICE: Duration = Duration::from_millis(5);

/// Sleep for `total`, waking early if `cancel` is set. Returns true if
/// cancelled.
fn sleep_cancellable(cancel: &AtomicBool, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if cancel.load(Ordering::Relaxed) {
            return true;
        }
        let slice = remaining.min(SLEEP_SLICE);
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
    cancel.load(Ordering::Relaxed)
}

/// An emission failure raised by a repeat task, reported back to the
/// monitor loop for event-queue delivery
#[derive(Debug)]
pub struct EmitFailure {
    pub key: KeyCode,
    pub down: bool,
    pub cause: String,
}

/// One live repeat task per currently-held non-modifier key
pub struct RepeatPool<O: OutputSink + 'static> {
    sink: Arc<O>,
    tasks: HashMap<KeyCode, Arc<AtomicBool>>,
    hold_delay: Duration,
    interval: Duration,
    failure_tx: Sender<EmitFailure>,
    failure_rx: Receiver<EmitFailure>,
}

impl<O: OutputSink + 'static> RepeatPool<O> {
    pub fn new(sink: Arc<O>, hold_delay: Duration, interval: Duration) -> Self {
        let (failure_tx, failure_rx) = mpsc::channel();
        Self {
            sink,
            tasks: HashMap::new(),
            hold_delay,
            interval,
            failure_tx,
            failure_rx,
        }
    }

    /// Update the repeat cadence. Running tasks keep the cadence they
    /// started with; new tasks pick up the new values.
    pub fn set_cadence(&mut self, hold_delay: Duration, interval: Duration) {
        self.hold_delay = hold_delay;
        self.interval = interval;
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_running(&self, key: KeyCode) -> bool {
        self.tasks.contains_key(&key)
    }

    /// Start a repeat task for an accepted key-down.
    ///
    /// Modifiers are exempt, and starting an already-running key is a
    /// no-op: exactly one task may exist per key at a time.
    pub fn start(&mut self, key: KeyCode) {
        if key.is_modifier() || self.tasks.contains_key(&key) {
            return;
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let task_cancel = Arc::clone(&cancel);
        let sink = Arc::clone(&self.sink);
        let failure_tx = self.failure_tx.clone();
        let hold_delay = self.hold_delay;
        let interval = self.interval;

        thread::spawn(move || {
            if sleep_cancellable(&task_cancel, hold_delay) {
                return;
            }
            loop {
                for down in [true, false] {
                    if let Err(e) = sink.emit(key, down) {
                        log::warn!("repeat emission failed for {}: {}", key, e);
                        let _ = failure_tx.send(EmitFailure {
                            key,
                            down,
                            cause: e.to_string(),
                        });
                    }
                }
                if sleep_cancellable(&task_cancel, interval) {
                    return;
                }
            }
        });

        self.tasks.insert(key, cancel);
    }

    /// Emission failures raised by repeat tasks since the last drain.
    /// The monitor loop calls this once per tick and forwards each
    /// failure to the event queue.
    pub fn drain_failures(&mut self) -> Vec<EmitFailure> {
        let mut failures = Vec::new();
        while let Ok(failure) = self.failure_rx.try_recv() {
            failures.push(failure);
        }
        failures
    }

    /// Cancel the repeat task for a key, if any. The flag is observed
    /// within one sleep slice; at most one in-flight press+release pair
    /// can still land.
    pub fn cancel(&mut self, key: KeyCode) {
        if let Some(cancel) = self.tasks.remove(&key) {
            cancel.store(true, Ordering::Relaxed);
        }
    }

    /// Cancel every running task (leaving the Active state)
    pub fn cancel_all(&mut self) {
        for (_, cancel) in self.tasks.drain() {
            cancel.store(true, Ordering::Relaxed);
        }
    }
}

impl<O: OutputSink + 'static> Drop for RepeatPool<O> {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
