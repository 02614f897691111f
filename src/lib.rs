//! Chatter Guard - keyboard contact-bounce filter daemon
//!
//! Reads raw key edges from a physical keyboard, suppresses contact
//! bounce, and re-emits clean keystrokes on a virtual device. Plays
//! nicely with an exclusive virtualization consumer (QEMU/KVM) by
//! pausing and releasing the device while one is running.

pub mod config;
pub mod events;
pub mod filter;
pub mod keyboard;
pub mod logger;
pub mod monitor;
pub mod virt;

pub use config::Config;
pub use monitor::{Monitor, MonitorHandle};
