//! Pause controller state machine
//!
//! Filtering can be suspended two ways: manually (shortcut key or
//! explicit request) and forcibly (the external virtualization consumer
//! needs the raw device). The two are tracked independently because they
//! clear independently: leaving forced pause must not resume filtering
//! while a manual pause is still in effect, and vice versa.

/// Externally visible pause state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseState {
    /// Filtering and forwarding edges
    Active,
    /// Manually paused
    Paused,
    /// Paused because the virtualization consumer holds the device
    ForcedPaused,
}

/// Tracks why filtering is suspended.
///
/// Mutated only from the monitor loop thread. Capture release/acquire
/// side effects are driven by the caller; this type only records intent.
#[derive(Debug, Default)]
pub struct PauseController {
    manual: bool,
    forced: bool,
}

impl PauseController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PauseState {
        // Forced wins for reporting: it explains why resume is not legal
        if self.forced {
            PauseState::ForcedPaused
        } else if self.manual {
            PauseState::Paused
        } else {
            PauseState::Active
        }
    }

    pub fn is_paused(&self) -> bool {
        self.manual || self.forced
    }

    pub fn is_forced(&self) -> bool {
        self.forced
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    /// Record a manual pause. Returns true if the controller was active
    /// before (a transition the caller must act on).
    pub fn pause_manual(&mut self) -> bool {
        let was_active = !self.is_paused();
        self.manual = true;
        was_active
    }

    /// Clear the manual pause. Returns true if the controller is fully
    /// active afterwards (no forced pause still in effect).
    pub fn resume_manual(&mut self) -> bool {
        self.manual = false;
        !self.is_paused()
    }

    /// Record a forced pause from the arbitration manager. Returns true
    /// if this is a fresh transition.
    pub fn force(&mut self) -> bool {
        let was_forced = self.forced;
        self.forced = true;
        !was_forced
    }

    /// Clear the forced pause. Returns true if the controller is fully
    /// active afterwards (no manual pause still in effect).
    pub fn unforce(&mut self) -> bool {
        self.forced = false;
        !self.is_paused()
    }
}
