//! Classified events and the queue that carries them to consumers
//!
//! The queue is the single cross-thread handoff point: one producer (the
//! monitor loop) and one consumer (the event sink). The producer must
//! never block; losing an informational event is acceptable, losing a
//! filtering decision is not.

use crate::keyboard::{EdgeType, KeyCode};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::time::Duration;

/// Default queue capacity. Full is only reachable with a stalled
/// consumer; informational events are shed first.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// A classified filtering event, emitted in causal edge order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedEvent {
    /// A physical keyboard device was bound
    DeviceFound { description: String },
    /// No keyboard device could be found
    NoDevice,
    /// An edge was accepted and forwarded. `delay` is the inter-press
    /// gap for presses with a prior accepted press.
    Accepted {
        key: KeyCode,
        edge: EdgeType,
        delay: Option<Duration>,
    },
    /// An edge was classified as bounce and swallowed. `delay` is absent
    /// for an Up swallowed because its Down was suppressed.
    Suppressed {
        key: KeyCode,
        delay: Option<Duration>,
        threshold: Duration,
    },
    /// Filtering was suspended, manually or by the arbitration manager
    PauseActivated { forced: bool },
    /// Filtering resumed
    PauseDeactivated,
    /// A resume request was refused because the virtualization consumer
    /// is still active
    ResumeBlocked,
    /// A raw edge arrived while paused and was dropped
    DroppedWhilePaused { key: KeyCode, edge: EdgeType },
    /// Synthetic emission failed for one edge
    InjectionError {
        key: KeyCode,
        down: bool,
        cause: String,
    },
    /// Exclusive capture of the physical device changed hands
    ArbitrationChanged { grabbed: bool },
    /// A configuration snapshot was applied
    ThresholdUpdated { global: Duration },
}

impl ClassifiedEvent {
    /// Decision events affect the emitted key stream and must never be
    /// shed; everything else is informational.
    pub fn is_decision(&self) -> bool {
        matches!(
            self,
            ClassifiedEvent::Accepted { .. }
                | ClassifiedEvent::Suppressed { .. }
                | ClassifiedEvent::InjectionError { .. }
        )
    }
}

/// Non-blocking producer side of the event queue.
///
/// Pushes never block: when the channel is full, informational events
/// are dropped (and counted), while decision events are parked locally
/// and re-offered ahead of later pushes so their causal order holds.
pub struct EventQueue {
    tx: SyncSender<ClassifiedEvent>,
    pending: VecDeque<ClassifiedEvent>,
    dropped: u64,
}

impl EventQueue {
    /// Create a bounded queue, returning the producer and consumer ends
    pub fn bounded(capacity: usize) -> (Self, Receiver<ClassifiedEvent>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        (
            Self {
                tx,
                pending: VecDeque::new(),
                dropped: 0,
            },
            rx,
        )
    }

    /// Number of informational events shed so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Decision events awaiting channel space
    pub fn backlog(&self) -> usize {
        self.pending.len()
    }

    /// Push one event without ever blocking
    pub fn push(&mut self, event: ClassifiedEvent) {
        self.flush_pending();

        if !self.pending.is_empty() {
            // Earlier decisions are still waiting; keep order
            if event.is_decision() {
                self.pending.push_back(event);
            } else {
                self.dropped += 1;
            }
            return;
        }

        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                if event.is_decision() {
                    self.pending.push_back(event);
                } else {
                    // The producer side of a sync_channel cannot evict
                    // queued items, so the incoming event is the one shed
                    self.dropped += 1;
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                // Consumer gone; nothing left to deliver to
            }
        }
    }

    /// Re-offer parked decision events
    fn flush_pending(&mut self) {
        while let Some(event) = self.pending.pop_front() {
            match self.tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    self.pending.push_front(event);
                    return;
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.pending.clear();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted(key: u16) -> ClassifiedEvent {
        ClassifiedEvent::Accepted {
            key: KeyCode(key),
            edge: EdgeType::Down,
            delay: None,
        }
    }

    #[test]
    fn push_and_receive_in_order() {
        let (mut queue, rx) = EventQueue::bounded(8);
        queue.push(accepted(30));
        queue.push(ClassifiedEvent::PauseActivated { forced: false });

        assert_eq!(rx.recv().unwrap(), accepted(30));
        assert_eq!(
            rx.recv().unwrap(),
            ClassifiedEvent::PauseActivated { forced: false }
        );
    }

    #[test]
    fn full_queue_sheds_informational_events() {
        let (mut queue, _rx) = EventQueue::bounded(2);

        queue.push(ClassifiedEvent::NoDevice);
        queue.push(ClassifiedEvent::NoDevice);
        // Channel full now
        queue.push(ClassifiedEvent::NoDevice);
        queue.push(ClassifiedEvent::PauseDeactivated);

        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.backlog(), 0);
    }

    #[test]
    fn full_queue_parks_decision_events() {
        let (mut queue, rx) = EventQueue::bounded(1);

        queue.push(accepted(30));
        // Full: decision must be parked, not lost
        queue.push(accepted(31));
        assert_eq!(queue.backlog(), 1);
        assert_eq!(queue.dropped(), 0);

        // Consumer drains; the parked decision lands on the next push
        assert_eq!(rx.recv().unwrap(), accepted(30));
        queue.push(ClassifiedEvent::PauseDeactivated);
        assert_eq!(queue.backlog(), 0);
        assert_eq!(rx.recv().unwrap(), accepted(31));
    }

    #[test]
    fn parked_decisions_keep_order_ahead_of_new_pushes() {
        let (mut queue, rx) = EventQueue::bounded(1);

        queue.push(accepted(30));
        queue.push(accepted(31)); // parked
        queue.push(accepted(32)); // parked behind 31

        assert_eq!(rx.recv().unwrap(), accepted(30));
        queue.push(ClassifiedEvent::NoDevice); // flushes 31, sheds itself
        assert_eq!(rx.recv().unwrap(), accepted(31));
        queue.push(ClassifiedEvent::NoDevice); // flushes 32, sheds itself
        assert_eq!(rx.recv().unwrap(), accepted(32));
    }

    #[test]
    fn disconnected_consumer_never_blocks_or_panics() {
        let (mut queue, rx) = EventQueue::bounded(2);
        drop(rx);

        queue.push(accepted(30));
        queue.push(ClassifiedEvent::NoDevice);
    }

    #[test]
    fn decision_classification() {
        assert!(accepted(30).is_decision());
        assert!(ClassifiedEvent::Suppressed {
            key: KeyCode(30),
            delay: None,
            threshold: Duration::from_millis(50),
        }
        .is_decision());
        assert!(!ClassifiedEvent::NoDevice.is_decision());
        assert!(!ClassifiedEvent::PauseDeactivated.is_decision());
    }
}
