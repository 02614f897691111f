//! Bounce threshold lookup table

use crate::keyboard::KeyCode;
use std::collections::HashMap;
use std::time::Duration;

/// Global bounce threshold plus per-key overrides.
///
/// Pure data: the filter engine reads it, nothing mutates it in place.
/// Configuration updates replace the whole table with a fresh snapshot,
/// so a lookup never observes a half-updated map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdTable {
    global: Duration,
    overrides: HashMap<KeyCode, Duration>,
}

impl ThresholdTable {
    pub fn new(global: Duration) -> Self {
        Self {
            global,
            overrides: HashMap::new(),
        }
    }

    pub fn with_overrides(global: Duration, overrides: HashMap<KeyCode, Duration>) -> Self {
        Self { global, overrides }
    }

    /// Threshold for a key: override if present, else global
    pub fn effective(&self, key: KeyCode) -> Duration {
        self.overrides.get(&key).copied().unwrap_or(self.global)
    }

    pub fn global(&self) -> Duration {
        self.global
    }

    pub fn set_override(&mut self, key: KeyCode, threshold: Duration) {
        self.overrides.insert(key, threshold);
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_threshold_applies_without_override() {
        let table = ThresholdTable::new(Duration::from_millis(50));
        assert_eq!(table.effective(KeyCode(30)), Duration::from_millis(50));
    }

    #[test]
    fn override_shadows_global() {
        let mut table = ThresholdTable::new(Duration::from_millis(50));
        table.set_override(KeyCode(30), Duration::from_millis(120));

        assert_eq!(table.effective(KeyCode(30)), Duration::from_millis(120));
        assert_eq!(table.effective(KeyCode(31)), Duration::from_millis(50));
    }
}
