//! Per-key filter state tracking

use crate::keyboard::KeyCode;
use std::collections::HashMap;
use std::time::Instant;

/// Filter state of a single key.
///
/// Only accepted edges update the recorded timestamps; swallowed Down/Up
/// pairs leave every field except `suppressed_down` untouched, so a burst
/// of bounce never shifts the reference point the gap is measured from.
#[derive(Debug, Clone, Default)]
pub struct KeyState {
    /// Timestamp of the last accepted press
    pub last_accepted_press: Option<Instant>,
    /// Timestamp of the last accepted release
    pub last_accepted_release: Option<Instant>,
    /// Whether the key is currently held (per accepted edges)
    pub is_down: bool,
    /// The last Down for this key was suppressed; its matching Up must
    /// be transparently swallowed as well
    pub suppressed_down: bool,
}

/// Store of per-key filter states, created lazily on first edge.
///
/// Single-writer: only the filter engine mutates this, and the engine is
/// only ever invoked from the monitor loop thread. That exclusivity is a
/// documented invariant, not a locking scheme.
#[derive(Debug, Default)]
pub struct KeyStateStore {
    keys: HashMap<KeyCode, KeyState>,
}

impl KeyStateStore {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    pub fn get_or_create(&mut self, key: KeyCode) -> &mut KeyState {
        self.keys.entry(key).or_default()
    }

    pub fn get(&self, key: KeyCode) -> Option<&KeyState> {
        self.keys.get(&key)
    }

    /// Keys currently held per accepted edges
    pub fn held_keys(&self) -> Vec<KeyCode> {
        self.keys
            .iter()
            .filter(|(_, state)| state.is_down)
            .map(|(key, _)| *key)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
