//! Monitor loop: the sequential driver of the filter core
//!
//! One dedicated thread runs this loop. It is the sole writer of the key
//! state store and the pause/arbitration state, and the sole caller into
//! the filter engine; that single-writer discipline is what lets those
//! components stay lock-free.
//!
//! Each iteration: drain pending commands, run the bounded-interval
//! arbitration check, then poll for one raw edge and route it through
//! the pause controller and the filter engine. Every decision lands on
//! the event queue. No wait in here is unbounded; when no edge is
//! available the loop sleeps for a short fixed interval so pause and
//! arbitration transitions stay timely.

use crate::config::ConfigSnapshot;
use crate::events::{ClassifiedEvent, EventQueue};
use crate::filter::{
    ArbitrationManager, FilterDecision, FilterEngine, PauseController, PauseState, RepeatPool,
};
use crate::keyboard::{InputSource, KeyCode, KeyEdge, OutputSink};
use crate::virt::VirtProbe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Control messages for a running monitor loop
#[derive(Debug)]
pub enum Command {
    /// Manual pause request
    Pause,
    /// Manual continue request
    Resume,
    /// Apply a fresh configuration snapshot
    UpdateConfig(ConfigSnapshot),
    /// Stop the loop
    Shutdown,
}

/// Handle for sending commands into the monitor loop from other threads
#[derive(Clone)]
pub struct MonitorHandle {
    tx: Sender<Command>,
}

impl MonitorHandle {
    pub fn pause(&self) {
        let _ = self.tx.send(Command::Pause);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(Command::Resume);
    }

    pub fn update_config(&self, snapshot: ConfigSnapshot) {
        let _ = self.tx.send(Command::UpdateConfig(snapshot));
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

/// The monitor loop and all core state it drives
pub struct Monitor<S: InputSource, O: OutputSink + 'static, V: VirtProbe> {
    source: S,
    sink: Arc<O>,
    probe: V,
    engine: FilterEngine,
    pause: PauseController,
    arbitration: ArbitrationManager,
    repeats: RepeatPool<O>,
    queue: EventQueue,
    commands: Receiver<Command>,
    pause_key: KeyCode,
    continue_key: KeyCode,
    idle_sleep: Duration,
    stop: Arc<AtomicBool>,
    shutdown_requested: bool,
}

impl<S: InputSource, O: OutputSink + 'static, V: VirtProbe> Monitor<S, O, V> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: S,
        sink: Arc<O>,
        probe: V,
        snapshot: ConfigSnapshot,
        queue: EventQueue,
        arbitration_interval: Duration,
        idle_sleep: Duration,
        stop: Arc<AtomicBool>,
    ) -> (Self, MonitorHandle) {
        let (tx, rx) = mpsc::channel();
        let repeats = RepeatPool::new(
            Arc::clone(&sink),
            snapshot.repeat_hold_delay,
            snapshot.repeat_interval,
        );
        let monitor = Self {
            source,
            sink,
            probe,
            engine: FilterEngine::new(snapshot.thresholds, snapshot.mode),
            pause: PauseController::new(),
            arbitration: ArbitrationManager::new(arbitration_interval, Instant::now()),
            repeats,
            queue,
            commands: rx,
            pause_key: snapshot.pause_key,
            continue_key: snapshot.continue_key,
            idle_sleep,
            stop,
            shutdown_requested: false,
        };
        (monitor, MonitorHandle { tx })
    }

    pub fn pause_state(&self) -> PauseState {
        self.pause.state()
    }

    pub fn is_grabbed(&self) -> bool {
        self.arbitration.is_grabbed()
    }

    /// Run until shutdown is requested or the stop flag is set
    pub fn run(&mut self) {
        log::info!("monitoring {}", self.source.description());
        self.queue.push(ClassifiedEvent::DeviceFound {
            description: self.source.description(),
        });

        while !self.shutdown_requested && !self.stop.load(Ordering::Relaxed) {
            let handled = self.tick(Instant::now());
            if !handled {
                thread::sleep(self.idle_sleep);
            }
        }

        self.repeats.cancel_all();
        if self.arbitration.is_grabbed() {
            self.arbitration.release(&mut self.source);
        }
        log::info!("monitor loop stopped");
    }

    /// One loop iteration. Returns true if an edge was processed, so the
    /// caller knows whether to sleep before the next iteration.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.drain_commands();
        self.poll_arbitration(now);
        self.drain_repeat_failures();

        match self.source.poll_next_edge() {
            Some(edge) => {
                self.handle_edge(edge);
                true
            }
            None => false,
        }
    }

    /// Forward emission failures raised by repeat tasks, so they reach
    /// the event queue like the loop's own injection errors
    fn drain_repeat_failures(&mut self) {
        for failure in self.repeats.drain_failures() {
            self.queue.push(ClassifiedEvent::InjectionError {
                key: failure.key,
                down: failure.down,
                cause: failure.cause,
            });
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Pause => self.pause_manually(),
                Command::Resume => self.request_resume(),
                Command::UpdateConfig(snapshot) => self.apply_snapshot(snapshot),
                Command::Shutdown => self.shutdown_requested = true,
            }
        }
    }

    fn apply_snapshot(&mut self, snapshot: ConfigSnapshot) {
        let global = snapshot.thresholds.global();
        self.engine.set_thresholds(snapshot.thresholds);
        self.engine.set_mode(snapshot.mode);
        self.pause_key = snapshot.pause_key;
        self.continue_key = snapshot.continue_key;
        self.repeats
            .set_cadence(snapshot.repeat_hold_delay, snapshot.repeat_interval);
        log::info!("configuration snapshot applied, global threshold {:?}", global);
        self.queue.push(ClassifiedEvent::ThresholdUpdated { global });
    }

    /// Bounded-interval arbitration check against the virtualization
    /// probe. Grab retries also ride this schedule.
    fn poll_arbitration(&mut self, now: Instant) {
        if !self.arbitration.probe_due(now) {
            return;
        }

        let active = self.probe.is_active();
        let flipped = self.arbitration.record_probe(now, active);
        if flipped {
            log::debug!("virtualization consumer active: {}", active);
        }

        if active {
            if self.pause.force() {
                // The external consumer needs the raw device; let go of
                // the grab before it notices.
                self.repeats.cancel_all();
                self.release_capture();
                self.queue
                    .push(ClassifiedEvent::PauseActivated { forced: true });
                log::info!("forced pause: virtualization consumer is active");
            }
        } else if self.pause.is_forced() {
            if self.pause.unforce() {
                self.try_capture();
                self.queue.push(ClassifiedEvent::PauseDeactivated);
                log::info!("virtualization consumer gone, filtering resumed");
            }
            // A manual pause still in effect keeps the grab released
        } else if !self.pause.is_paused() && !self.arbitration.is_grabbed() {
            // Active but the last grab attempt failed; retry
            self.try_capture();
        }
    }

    fn pause_manually(&mut self) {
        if !self.pause.pause_manual() {
            return;
        }
        self.repeats.cancel_all();
        self.release_capture();
        self.queue
            .push(ClassifiedEvent::PauseActivated { forced: false });
        log::info!("filtering paused");
    }

    fn request_resume(&mut self) {
        if !self.pause.is_manual() {
            return;
        }
        if self.pause.is_forced() || self.probe.is_active() {
            // The consumer still owns the device; stay paused
            self.queue.push(ClassifiedEvent::ResumeBlocked);
            log::warn!("resume refused: virtualization consumer is active");
            return;
        }
        if self.pause.resume_manual() {
            self.try_capture();
            self.queue.push(ClassifiedEvent::PauseDeactivated);
            log::info!("filtering resumed");
        }
    }

    fn try_capture(&mut self) {
        match self.arbitration.try_capture(&mut self.source) {
            Ok(()) => {
                self.queue
                    .push(ClassifiedEvent::ArbitrationChanged { grabbed: true });
            }
            Err(e) => {
                // Recoverable: retried on the next arbitration tick
                log::warn!("exclusive capture failed, will retry: {}", e);
            }
        }
    }

    fn release_capture(&mut self) {
        if !self.arbitration.is_grabbed() {
            return;
        }
        self.arbitration.release(&mut self.source);
        self.queue
            .push(ClassifiedEvent::ArbitrationChanged { grabbed: false });
    }

    fn handle_edge(&mut self, edge: KeyEdge) {
        if self.pause.is_paused() {
            if edge.is_down() && edge.key == self.continue_key && !self.pause.is_forced() {
                self.request_resume();
                return;
            }
            self.queue.push(ClassifiedEvent::DroppedWhilePaused {
                key: edge.key,
                edge: edge.edge,
            });
            return;
        }

        if edge.is_down() && edge.key == self.pause_key {
            self.pause_manually();
            return;
        }

        match self.engine.decide(&edge) {
            FilterDecision::Accept { delay } => {
                self.queue.push(ClassifiedEvent::Accepted {
                    key: edge.key,
                    edge: edge.edge,
                    delay,
                });
                if edge.is_down() {
                    self.emit(edge.key, true);
                    self.repeats.start(edge.key);
                } else {
                    self.repeats.cancel(edge.key);
                    self.emit(edge.key, false);
                }
            }
            FilterDecision::Suppress { delay, threshold } => {
                if edge.is_down() {
                    self.repeats.cancel(edge.key);
                }
                self.queue.push(ClassifiedEvent::Suppressed {
                    key: edge.key,
                    delay,
                    threshold,
                });
            }
            FilterDecision::Ignore => {}
        }
    }

    fn emit(&mut self, key: KeyCode, down: bool) {
        if let Err(e) = self.sink.emit(key, down) {
            log::warn!("injection failed for {} ({}): {}", key, down, e);
            self.queue.push(ClassifiedEvent::InjectionError {
                key,
                down,
                cause: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::EventQueue;
    use crate::keyboard::{DeviceError, EdgeType, EmitError};
    use std::collections::VecDeque;
    use std::sync::mpsc::Receiver;
    use std::sync::Mutex;

    // -----------------------------------------------------------------
    // Mocks
    // -----------------------------------------------------------------

    #[derive(Default)]
    struct SourceState {
        edges: VecDeque<KeyEdge>,
        grabbed: bool,
        fail_grab: bool,
    }

    #[derive(Clone, Default)]
    struct ScriptedSource {
        state: Arc<Mutex<SourceState>>,
    }

    impl ScriptedSource {
        fn push_edge(&self, key: u16, edge: EdgeType, at: Instant) {
            self.state
                .lock()
                .unwrap()
                .edges
                .push_back(KeyEdge::new(KeyCode(key), edge, at));
        }

        fn grabbed(&self) -> bool {
            self.state.lock().unwrap().grabbed
        }

        fn set_fail_grab(&self, fail: bool) {
            self.state.lock().unwrap().fail_grab = fail;
        }
    }

    impl InputSource for ScriptedSource {
        fn poll_next_edge(&mut self) -> Option<KeyEdge> {
            self.state.lock().unwrap().edges.pop_front()
        }

        fn capture(&mut self) -> Result<(), DeviceError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_grab {
                return Err(DeviceError::GrabFailed("device busy".to_string()));
            }
            state.grabbed = true;
            Ok(())
        }

        fn release(&mut self) {
            self.state.lock().unwrap().grabbed = false;
        }

        fn description(&self) -> String {
            "scripted keyboard".to_string()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        emissions: Mutex<Vec<(KeyCode, bool)>>,
        fail: AtomicBool,
    }

    impl RecordingSink {
        fn emissions(&self) -> Vec<(KeyCode, bool)> {
            self.emissions.lock().unwrap().clone()
        }
    }

    impl OutputSink for RecordingSink {
        fn emit(&self, key: KeyCode, down: bool) -> Result<(), EmitError> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(EmitError::Setup("sink offline".to_string()));
            }
            self.emissions.lock().unwrap().push((key, down));
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SharedProbe {
        active: Arc<AtomicBool>,
    }

    impl SharedProbe {
        fn set_active(&self, active: bool) {
            self.active.store(active, Ordering::Relaxed);
        }
    }

    impl VirtProbe for SharedProbe {
        fn is_active(&mut self) -> bool {
            self.active.load(Ordering::Relaxed)
        }
    }

    struct Fixture {
        monitor: Monitor<ScriptedSource, RecordingSink, SharedProbe>,
        handle: MonitorHandle,
        source: ScriptedSource,
        sink: Arc<RecordingSink>,
        probe: SharedProbe,
        rx: Receiver<ClassifiedEvent>,
        base: Instant,
    }

    const ARB_INTERVAL: Duration = Duration::from_millis(500);

    fn fixture() -> Fixture {
        let source = ScriptedSource::default();
        let sink = Arc::new(RecordingSink::default());
        let probe = SharedProbe::default();
        let (queue, rx) = EventQueue::bounded(256);
        let (monitor, handle) = Monitor::new(
            source.clone(),
            Arc::clone(&sink),
            probe.clone(),
            Config::default().snapshot(),
            queue,
            ARB_INTERVAL,
            Duration::from_millis(1),
            Arc::new(AtomicBool::new(false)),
        );
        Fixture {
            monitor,
            handle,
            source,
            sink,
            probe,
            rx,
            base: Instant::now(),
        }
    }

    fn drain(rx: &Receiver<ClassifiedEvent>) -> Vec<ClassifiedEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    // -----------------------------------------------------------------
    // Arbitration and capture
    // -----------------------------------------------------------------

    #[test]
    fn first_tick_acquires_capture() {
        let mut f = fixture();

        f.monitor.tick(f.base);
        assert!(f.source.grabbed());

        let events = drain(&f.rx);
        assert!(events.contains(&ClassifiedEvent::ArbitrationChanged { grabbed: true }));
    }

    #[test]
    fn failed_grab_retries_on_next_arbitration_tick() {
        let mut f = fixture();
        f.source.set_fail_grab(true);

        f.monitor.tick(f.base);
        assert!(!f.source.grabbed());

        // Not due yet: no retry
        f.source.set_fail_grab(false);
        f.monitor.tick(at(f.base, 100));
        assert!(!f.source.grabbed());

        // Next arbitration tick retries and succeeds
        f.monitor.tick(at(f.base, 600));
        assert!(f.source.grabbed());
    }

    #[test]
    fn virtualization_forces_pause_and_releases_capture() {
        let mut f = fixture();
        f.monitor.tick(f.base);
        assert!(f.source.grabbed());
        drain(&f.rx);

        f.probe.set_active(true);
        f.monitor.tick(at(f.base, 600));

        assert_eq!(f.monitor.pause_state(), PauseState::ForcedPaused);
        assert!(!f.source.grabbed());

        let events = drain(&f.rx);
        assert!(events.contains(&ClassifiedEvent::ArbitrationChanged { grabbed: false }));
        assert!(events.contains(&ClassifiedEvent::PauseActivated { forced: true }));
    }

    #[test]
    fn virtualization_gone_reacquires_and_resumes() {
        let mut f = fixture();
        f.monitor.tick(f.base);
        f.probe.set_active(true);
        f.monitor.tick(at(f.base, 600));
        drain(&f.rx);

        f.probe.set_active(false);
        // An edge delivered exactly at the resume tick is classified,
        // not lost and not double-classified.
        f.source.push_edge(30, EdgeType::Down, at(f.base, 1200));
        f.monitor.tick(at(f.base, 1200));

        assert_eq!(f.monitor.pause_state(), PauseState::Active);
        assert!(f.source.grabbed());

        let events = drain(&f.rx);
        assert!(events.contains(&ClassifiedEvent::PauseDeactivated));
        let accepted: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ClassifiedEvent::Accepted { key, .. } if *key == KeyCode(30)))
            .collect();
        assert_eq!(accepted.len(), 1);
        assert_eq!(f.sink.emissions(), vec![(KeyCode(30), true)]);
    }

    #[test]
    fn forced_pause_does_not_clear_manual_pause() {
        let mut f = fixture();
        f.monitor.tick(f.base);
        f.handle.pause();
        f.monitor.tick(at(f.base, 10));
        assert_eq!(f.monitor.pause_state(), PauseState::Paused);

        f.probe.set_active(true);
        f.monitor.tick(at(f.base, 600));
        assert_eq!(f.monitor.pause_state(), PauseState::ForcedPaused);

        // Virtualization leaves, but the manual pause must hold
        f.probe.set_active(false);
        f.monitor.tick(at(f.base, 1200));
        assert_eq!(f.monitor.pause_state(), PauseState::Paused);
        assert!(!f.source.grabbed());
    }

    // -----------------------------------------------------------------
    // Pause and shortcuts
    // -----------------------------------------------------------------

    #[test]
    fn paused_edges_are_dropped_without_emission() {
        let mut f = fixture();
        f.monitor.tick(f.base);
        f.handle.pause();
        f.monitor.tick(at(f.base, 10));
        drain(&f.rx);

        f.source.push_edge(30, EdgeType::Down, at(f.base, 20));
        f.source.push_edge(30, EdgeType::Up, at(f.base, 40));
        f.monitor.tick(at(f.base, 20));
        f.monitor.tick(at(f.base, 40));

        assert!(f.sink.emissions().is_empty());
        let events = drain(&f.rx);
        assert_eq!(
            events,
            vec![
                ClassifiedEvent::DroppedWhilePaused {
                    key: KeyCode(30),
                    edge: EdgeType::Down
                },
                ClassifiedEvent::DroppedWhilePaused {
                    key: KeyCode(30),
                    edge: EdgeType::Up
                },
            ]
        );
    }

    #[test]
    fn pause_shortcut_toggles_filtering() {
        let mut f = fixture();
        f.monitor.tick(f.base);
        drain(&f.rx);

        // Default pause/continue shortcut is the Pause key (119)
        f.source.push_edge(119, EdgeType::Down, at(f.base, 10));
        f.monitor.tick(at(f.base, 10));
        assert_eq!(f.monitor.pause_state(), PauseState::Paused);
        assert!(!f.source.grabbed());

        f.source.push_edge(119, EdgeType::Up, at(f.base, 30));
        f.monitor.tick(at(f.base, 30));

        f.source.push_edge(119, EdgeType::Down, at(f.base, 50));
        f.monitor.tick(at(f.base, 50));
        assert_eq!(f.monitor.pause_state(), PauseState::Active);
        assert!(f.source.grabbed());
    }

    #[test]
    fn resume_refused_while_virtualization_active() {
        let mut f = fixture();
        f.monitor.tick(f.base);
        f.handle.pause();
        f.monitor.tick(at(f.base, 10));
        drain(&f.rx);

        // Probe flips active between arbitration ticks; the synchronous
        // resume check must still see it.
        f.probe.set_active(true);
        f.handle.resume();
        f.monitor.tick(at(f.base, 20));

        assert_eq!(f.monitor.pause_state(), PauseState::Paused);
        let events = drain(&f.rx);
        assert!(events.contains(&ClassifiedEvent::ResumeBlocked));
    }

    // -----------------------------------------------------------------
    // Filtering and emission
    // -----------------------------------------------------------------

    #[test]
    fn bounce_scenario_emits_exactly_two_presses() {
        let mut f = fixture();
        f.monitor.tick(f.base);
        drain(&f.rx);

        // 50ms default threshold: presses at 0, 20, 80
        for (offset, edge) in [
            (0u64, EdgeType::Down),
            (10, EdgeType::Up),
            (20, EdgeType::Down),
            (25, EdgeType::Up),
            (80, EdgeType::Down),
            (95, EdgeType::Up),
        ] {
            f.source.push_edge(30, edge, at(f.base, offset));
        }
        for _ in 0..6 {
            f.monitor.tick(at(f.base, 100));
        }

        let presses: Vec<_> = f
            .sink
            .emissions()
            .into_iter()
            .filter(|(_, down)| *down)
            .collect();
        assert_eq!(presses.len(), 2);

        let events = drain(&f.rx);
        let suppressed = events
            .iter()
            .filter(|e| matches!(e, ClassifiedEvent::Suppressed { .. }))
            .count();
        // The 20ms press and its matching release
        assert_eq!(suppressed, 2);
    }

    #[test]
    fn injection_failure_is_reported_not_fatal() {
        let mut f = fixture();
        f.monitor.tick(f.base);
        drain(&f.rx);

        f.sink.fail.store(true, Ordering::Relaxed);
        f.source.push_edge(30, EdgeType::Down, at(f.base, 10));
        f.monitor.tick(at(f.base, 10));

        let events = drain(&f.rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ClassifiedEvent::InjectionError { key, down: true, .. } if *key == KeyCode(30))));

        // The loop keeps classifying subsequent edges
        f.sink.fail.store(false, Ordering::Relaxed);
        f.source.push_edge(30, EdgeType::Up, at(f.base, 30));
        f.monitor.tick(at(f.base, 30));
        assert_eq!(f.sink.emissions(), vec![(KeyCode(30), false)]);
    }

    #[test]
    fn config_update_applies_on_next_edge() {
        let mut f = fixture();
        f.monitor.tick(f.base);
        drain(&f.rx);

        let mut config = Config::default();
        config.filter.global_threshold_ms = 200;
        f.handle.update_config(config.snapshot());

        f.source.push_edge(30, EdgeType::Down, at(f.base, 10));
        f.source.push_edge(30, EdgeType::Up, at(f.base, 20));
        // 100ms gap: fine under the old 50ms threshold, bounce under 200ms
        f.source.push_edge(30, EdgeType::Down, at(f.base, 110));
        for offset in [10, 20, 110] {
            f.monitor.tick(at(f.base, offset));
        }

        let events = drain(&f.rx);
        assert!(events.contains(&ClassifiedEvent::ThresholdUpdated {
            global: Duration::from_millis(200)
        }));
        assert!(events.iter().any(|e| matches!(
            e,
            ClassifiedEvent::Suppressed { key, .. } if *key == KeyCode(30)
        )));
    }

    #[test]
    fn hardware_auto_repeat_produces_no_events_or_emissions() {
        let mut f = fixture();
        f.monitor.tick(f.base);
        drain(&f.rx);

        f.source.push_edge(30, EdgeType::Down, at(f.base, 10));
        f.source.push_edge(30, EdgeType::AutoRepeat, at(f.base, 510));
        f.source.push_edge(30, EdgeType::AutoRepeat, at(f.base, 540));
        for _ in 0..3 {
            f.monitor.tick(at(f.base, 540));
        }

        // One accepted Down; the repeat edges vanish
        assert_eq!(f.sink.emissions(), vec![(KeyCode(30), true)]);
        let events = drain(&f.rx);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ClassifiedEvent::Accepted { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn shutdown_command_stops_run() {
        let mut f = fixture();
        f.handle.shutdown();

        // run() returns once the command is drained
        f.monitor.run();
        assert!(!f.source.grabbed());
    }
}
