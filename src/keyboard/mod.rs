//! Keyboard device adapters: raw evdev input and uinput output

mod edge;
pub mod evdev_source;
pub mod keymap;
pub mod uinput_sink;

pub use edge::{EdgeType, KeyEdge};
pub use evdev_source::{DeviceError, EvdevSource};
pub use keymap::{key_name, KeyCode};
pub use uinput_sink::{EmitError, UinputSink};

/// Source of raw key edges with exclusive-capture support.
///
/// `poll_next_edge` must never block beyond a short bounded interval; the
/// monitor loop relies on this to keep pause and arbitration transitions
/// timely even when no keys are pressed.
pub trait InputSource {
    /// Return the next raw edge if one is available
    fn poll_next_edge(&mut self) -> Option<KeyEdge>;

    /// Acquire exclusive capture of the device (EVIOCGRAB).
    ///
    /// Failure is recoverable: the caller retries on its next poll tick.
    fn capture(&mut self) -> Result<(), DeviceError>;

    /// Release exclusive capture. Infallible; releasing an ungrabbed
    /// device is a no-op.
    fn release(&mut self);

    /// Human-readable device description for event reporting
    fn description(&self) -> String;
}

/// Sink for synthetic key events on the virtual output device.
///
/// Shared between the monitor loop and the repeat emitter tasks, so it
/// takes `&self` and must be thread-safe.
pub trait OutputSink: Send + Sync {
    fn emit(&self, key: KeyCode, down: bool) -> Result<(), EmitError>;
}
