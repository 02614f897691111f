//! Debounce decision core
//!
//! Classifies each raw key edge as Accept, Suppress, or Ignore. Worn
//! switches bounce in two distinct ways: a dirty make-contact fires an
//! extra press right after a real press, and a dirty break-contact fires
//! a re-press right after a real release. The two detection modes each
//! guard against one of those, so both are supported and switchable
//! without restart.

use super::{KeyStateStore, ThresholdTable};
use crate::keyboard::{EdgeType, KeyEdge};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which gap the engine measures bounce against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DetectionMode {
    /// Gap between successive accepted presses
    #[default]
    AfterPress,
    /// Gap from the previous accepted release
    AfterRelease,
}

/// Outcome of classifying a single raw edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Forward the edge to the output sink.
    ///
    /// For a Down with a prior accepted press, `delay` carries the
    /// inter-press gap for reporting; `None` otherwise.
    Accept { delay: Option<Duration> },
    /// Swallow the edge.
    ///
    /// `delay` is the measured gap that fell short of `threshold`, or
    /// `None` for an Up swallowed only because its Down was suppressed.
    Suppress {
        delay: Option<Duration>,
        threshold: Duration,
    },
    /// Hardware auto-repeat: neither accepted nor suppressed. Synthetic
    /// repetition comes from the repeat emitter pool instead.
    Ignore,
}

impl FilterDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, FilterDecision::Accept { .. })
    }

    pub fn is_suppress(&self) -> bool {
        matches!(self, FilterDecision::Suppress { .. })
    }
}

/// The debounce filter engine.
///
/// Owns all per-key state; mutated only from the monitor loop thread.
/// Decisions are a pure function of the edge timestamp, the current
/// threshold table, and the recorded per-key history, so the engine is
/// fully deterministic under test.
pub struct FilterEngine {
    thresholds: ThresholdTable,
    mode: DetectionMode,
    store: KeyStateStore,
}

impl FilterEngine {
    pub fn new(thresholds: ThresholdTable, mode: DetectionMode) -> Self {
        Self {
            thresholds,
            mode,
            store: KeyStateStore::new(),
        }
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    /// Switch the detection algorithm. Takes effect on the next edge;
    /// edges already classified are unaffected.
    pub fn set_mode(&mut self, mode: DetectionMode) {
        self.mode = mode;
    }

    pub fn thresholds(&self) -> &ThresholdTable {
        &self.thresholds
    }

    /// Replace the threshold table with a fresh snapshot
    pub fn set_thresholds(&mut self, thresholds: ThresholdTable) {
        self.thresholds = thresholds;
    }

    pub fn store(&self) -> &KeyStateStore {
        &self.store
    }

    /// Classify one raw edge and update per-key state accordingly
    pub fn decide(&mut self, edge: &KeyEdge) -> FilterDecision {
        match edge.edge {
            EdgeType::AutoRepeat => FilterDecision::Ignore,
            EdgeType::Down => match self.mode {
                DetectionMode::AfterPress => self.decide_down_after_press(edge),
                DetectionMode::AfterRelease => self.decide_down_after_release(edge),
            },
            EdgeType::Up => self.decide_up(edge),
        }
    }

    fn decide_down_after_press(&mut self, edge: &KeyEdge) -> FilterDecision {
        let threshold = self.thresholds.effective(edge.key);
        let state = self.store.get_or_create(edge.key);

        match state.last_accepted_press {
            // First-ever press of a key is never bounce
            None => {
                state.last_accepted_press = Some(edge.timestamp);
                state.is_down = true;
                FilterDecision::Accept { delay: None }
            }
            Some(prev) => {
                let gap = edge.timestamp.duration_since(prev);
                if gap < threshold {
                    state.suppressed_down = true;
                    FilterDecision::Suppress {
                        delay: Some(gap),
                        threshold,
                    }
                } else {
                    state.last_accepted_press = Some(edge.timestamp);
                    state.is_down = true;
                    // A pending swallow from an earlier suppressed press
                    // must not eat this press's release
                    state.suppressed_down = false;
                    FilterDecision::Accept { delay: Some(gap) }
                }
            }
        }
    }

    fn decide_down_after_release(&mut self, edge: &KeyEdge) -> FilterDecision {
        let threshold = self.thresholds.effective(edge.key);
        let state = self.store.get_or_create(edge.key);

        // No prior release: gap is treated as infinite
        let gap_from_release = state
            .last_accepted_release
            .map(|prev| edge.timestamp.duration_since(prev));

        match gap_from_release {
            Some(gap) if gap < threshold => {
                state.suppressed_down = true;
                FilterDecision::Suppress {
                    delay: Some(gap),
                    threshold,
                }
            }
            _ => {
                let delay = state
                    .last_accepted_press
                    .map(|prev| edge.timestamp.duration_since(prev));
                state.last_accepted_press = Some(edge.timestamp);
                state.is_down = true;
                state.suppressed_down = false;
                FilterDecision::Accept { delay }
            }
        }
    }

    fn decide_up(&mut self, edge: &KeyEdge) -> FilterDecision {
        let threshold = self.thresholds.effective(edge.key);
        let state = self.store.get_or_create(edge.key);

        if state.suppressed_down {
            // The Down this Up answers was rejected; swallow the pair
            // without touching any recorded timestamp.
            state.suppressed_down = false;
            FilterDecision::Suppress {
                delay: None,
                threshold,
            }
        } else {
            state.is_down = false;
            state.last_accepted_release = Some(edge.timestamp);
            FilterDecision::Accept { delay: None }
        }
    }
}
