//! Device arbitration manager
//!
//! Exclusive capture of the physical keyboard is a systemwide resource:
//! one consumer only. An external virtualization process (QEMU/KVM
//! passthrough) may need the raw device itself, and holding the grab
//! while it does would break it entirely. The manager polls the
//! virtualization probe at a bounded interval, releases the grab the
//! moment the consumer appears, and re-acquires once it is gone.
//!
//! Probing is deliberately decoupled from the edge-read rate: the probe
//! may be slow, and when no keys are pressed there are no edges to
//! piggyback on.

use crate::keyboard::{DeviceError, InputSource};
use std::time::{Duration, Instant};

/// Owns the capture flag and the probe schedule.
///
/// All acquire/release calls funnel through the single monitor loop
/// thread, which is what enforces one-conceptual-owner for the grab.
pub struct ArbitrationManager {
    probe_interval: Duration,
    next_probe: Instant,
    virt_active: bool,
    grabbed: bool,
}

impl ArbitrationManager {
    pub fn new(probe_interval: Duration, now: Instant) -> Self {
        Self {
            probe_interval,
            // First probe fires on the first tick
            next_probe: now,
            virt_active: false,
            grabbed: false,
        }
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    pub fn virt_active(&self) -> bool {
        self.virt_active
    }

    pub fn probe_interval(&self) -> Duration {
        self.probe_interval
    }

    pub fn set_probe_interval(&mut self, interval: Duration) {
        self.probe_interval = interval;
    }

    /// Whether the virtualization probe is due at `now`
    pub fn probe_due(&self, now: Instant) -> bool {
        now >= self.next_probe
    }

    /// Record a probe result and advance the schedule. Returns true if
    /// the observed virtualization state flipped.
    pub fn record_probe(&mut self, now: Instant, active: bool) -> bool {
        self.next_probe = now + self.probe_interval;
        let flipped = active != self.virt_active;
        self.virt_active = active;
        flipped
    }

    /// Attempt exclusive capture. A failed grab (device busy) is
    /// recoverable; the caller retries on the next poll tick.
    pub fn try_capture<S: InputSource>(&mut self, source: &mut S) -> Result<(), DeviceError> {
        if self.grabbed {
            return Ok(());
        }
        source.capture()?;
        self.grabbed = true;
        Ok(())
    }

    /// Release exclusive capture
    pub fn release<S: InputSource>(&mut self, source: &mut S) {
        if !self.grabbed {
            return;
        }
        source.release();
        self.grabbed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::KeyEdge;

    struct FakeSource {
        grabbed: bool,
        fail_next_grab: bool,
        grab_calls: u32,
        release_calls: u32,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                grabbed: false,
                fail_next_grab: false,
                grab_calls: 0,
                release_calls: 0,
            }
        }
    }

    impl InputSource for FakeSource {
        fn poll_next_edge(&mut self) -> Option<KeyEdge> {
            None
        }

        fn capture(&mut self) -> Result<(), DeviceError> {
            self.grab_calls += 1;
            if self.fail_next_grab {
                self.fail_next_grab = false;
                return Err(DeviceError::GrabFailed("device busy".to_string()));
            }
            self.grabbed = true;
            Ok(())
        }

        fn release(&mut self) {
            self.release_calls += 1;
            self.grabbed = false;
        }

        fn description(&self) -> String {
            "fake".to_string()
        }
    }

    #[test]
    fn probe_schedule_is_bounded_interval() {
        let now = Instant::now();
        let mut arb = ArbitrationManager::new(Duration::from_millis(500), now);

        assert!(arb.probe_due(now));
        arb.record_probe(now, false);

        assert!(!arb.probe_due(now + Duration::from_millis(100)));
        assert!(arb.probe_due(now + Duration::from_millis(500)));
    }

    #[test]
    fn record_probe_detects_flips() {
        let now = Instant::now();
        let mut arb = ArbitrationManager::new(Duration::from_millis(500), now);

        assert!(!arb.record_probe(now, false));
        assert!(arb.record_probe(now, true));
        assert!(!arb.record_probe(now, true));
        assert!(arb.record_probe(now, false));
    }

    #[test]
    fn capture_and_release_track_the_device() {
        let now = Instant::now();
        let mut arb = ArbitrationManager::new(Duration::from_millis(500), now);
        let mut source = FakeSource::new();

        arb.try_capture(&mut source).unwrap();
        assert!(arb.is_grabbed());
        assert!(source.grabbed);

        // Idempotent: already held, no second ioctl
        arb.try_capture(&mut source).unwrap();
        assert_eq!(source.grab_calls, 1);

        arb.release(&mut source);
        assert!(!arb.is_grabbed());
        assert!(!source.grabbed);

        arb.release(&mut source);
        assert_eq!(source.release_calls, 1);
    }

    #[test]
    fn failed_grab_is_recoverable() {
        let now = Instant::now();
        let mut arb = ArbitrationManager::new(Duration::from_millis(500), now);
        let mut source = FakeSource::new();
        source.fail_next_grab = true;

        assert!(arb.try_capture(&mut source).is_err());
        assert!(!arb.is_grabbed());

        // Retry on the next tick succeeds
        arb.try_capture(&mut source).unwrap();
        assert!(arb.is_grabbed());
    }
}
