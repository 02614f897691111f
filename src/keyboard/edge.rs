//! Raw key edge types produced by the input adapter

use super::KeyCode;
use std::time::Instant;

/// Direction of a raw key edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeType {
    /// Key was pressed down
    Down,
    /// Key was released
    Up,
    /// Kernel-level auto-repeat while the key is held.
    ///
    /// The filter engine ignores these entirely; synthetic repetition is
    /// produced by the repeat emitter pool instead, so the forwarded
    /// repeat cadence is independent of the hardware repeat timing.
    AutoRepeat,
}

/// A raw keyboard edge with a monotonic timestamp.
///
/// Produced by the input adapter, consumed by the monitor loop. Immutable
/// once created.
#[derive(Debug, Clone, Copy)]
pub struct KeyEdge {
    /// The key this edge belongs to
    pub key: KeyCode,
    /// Down, Up, or hardware auto-repeat
    pub edge: EdgeType,
    /// When the edge was observed
    pub timestamp: Instant,
}

impl KeyEdge {
    pub fn new(key: KeyCode, edge: EdgeType, timestamp: Instant) -> Self {
        Self {
            key,
            edge,
            timestamp,
        }
    }

    pub fn is_down(&self) -> bool {
        self.edge == EdgeType::Down
    }

    pub fn is_up(&self) -> bool {
        self.edge == EdgeType::Up
    }
}
