//! Debounce core: decision engine, pause control, device arbitration,
//! and synthetic repeat emission

mod arbitration;
mod engine;
mod pause;
mod repeat;
mod state;
mod thresholds;

pub use arbitration::ArbitrationManager;
pub use engine::{DetectionMode, FilterDecision, FilterEngine};
pub use pause::{PauseController, PauseState};
pub use repeat::{EmitFailure, RepeatPool};
pub use state::{KeyState, KeyStateStore};
pub use thresholds::ThresholdTable;
