//! Raw evdev-based input adapter for Linux
//!
//! Scans `/dev/input/event*` for the physical keyboard, reads raw key
//! edges in non-blocking mode, and holds (or releases) the exclusive
//! capture that keeps the unfiltered stream away from other consumers.

use super::{EdgeType, InputSource, KeyCode, KeyEdge};
use nix::libc;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

/// Error type for physical device operations
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no keyboard devices found")]
    NoDevices,
    #[error("permission denied accessing {0}")]
    PermissionDenied(String),
    #[error("exclusive capture failed: {0}")]
    GrabFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("device enumeration failed: {0}")]
    EnumerationFailed(String),
}

/// A raw input event from the kernel
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct InputEvent {
    tv_sec: i64,
    tv_usec: i64,
    event_type: u16,
    code: u16,
    value: i32,
}

const EV_KEY: u16 = 0x01;
const INPUT_EVENT_SIZE: usize = std::mem::size_of::<InputEvent>();

// EVIOCGRAB: grab (arg 1) or release (arg 0) the event device
nix::ioctl_write_int!(eviocgrab, b'E', 0x90);

/// Find all keyboard input devices under /dev/input
fn find_keyboard_devices() -> Result<Vec<PathBuf>, DeviceError> {
    let input_dir = PathBuf::from("/dev/input");
    if !input_dir.exists() {
        return Err(DeviceError::EnumerationFailed(
            "/dev/input does not exist".to_string(),
        ));
    }

    let mut keyboards = Vec::new();

    if let Ok(entries) = fs::read_dir(&input_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

            if name.starts_with("event") && keyboard_key_bits(&path).is_some() {
                keyboards.push(path);
            }
        }
    }

    if keyboards.is_empty() {
        return Err(DeviceError::NoDevices);
    }

    Ok(keyboards)
}

/// Count the key-capability bits of a device, returning `None` for
/// devices that do not look like keyboards.
///
/// The capabilities file is a hex bitmap of supported keys; a real
/// keyboard maps the whole alphabetic block and then some, so a simple
/// population count separates keyboards from buttons and lid switches.
fn keyboard_key_bits(device_path: &PathBuf) -> Option<u32> {
    let name = device_path.file_name().and_then(|n| n.to_str())?;

    let caps_path = format!("/sys/class/input/{}/device/capabilities/key", name);
    if let Ok(caps) = fs::read_to_string(&caps_path) {
        let trimmed = caps.trim();
        if !trimmed.is_empty() && trimmed != "0" {
            let total_bits: u32 = trimmed
                .split_whitespace()
                .filter_map(|hex| u64::from_str_radix(hex, 16).ok())
                .map(|n| n.count_ones())
                .sum();
            if total_bits > 50 {
                return Some(total_bits);
            }
        }
        return None;
    }

    // Fallback: check device name in /sys
    let name_path = format!("/sys/class/input/{}/device/name", name);
    if let Ok(dev_name) = fs::read_to_string(&name_path) {
        let dev_name_lower = dev_name.to_lowercase();
        if dev_name_lower.contains("keyboard") || dev_name_lower.contains("kbd") {
            return Some(0);
        }
    }
    None
}

/// Read the kernel's device name for an event node
fn device_name(device_path: &PathBuf) -> String {
    device_path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|name| {
            fs::read_to_string(format!("/sys/class/input/{}/device/name", name)).ok()
        })
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Evdev input adapter bound to a single physical keyboard.
///
/// Holds the file in non-blocking mode so `poll_next_edge` returns
/// immediately when the kernel queue is empty.
pub struct EvdevSource {
    device: File,
    path: PathBuf,
    name: String,
    grabbed: bool,
    queue: VecDeque<KeyEdge>,
    buffer: Vec<u8>,
}

impl EvdevSource {
    /// Open the most capable keyboard device found on the system.
    ///
    /// When several event nodes qualify, the one with the most key bits
    /// wins; composite devices expose extra nodes for media keys that
    /// would otherwise shadow the main keyboard.
    pub fn open() -> Result<Self, DeviceError> {
        let mut candidates = find_keyboard_devices()?;
        candidates.sort_by_key(|path| std::cmp::Reverse(keyboard_key_bits(path).unwrap_or(0)));

        let mut last_err = None;
        for path in candidates {
            match Self::open_path(path) {
                Ok(source) => return Ok(source),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(DeviceError::NoDevices))
    }

    /// Open a specific event node
    pub fn open_path(path: PathBuf) -> Result<Self, DeviceError> {
        let device = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Err(DeviceError::PermissionDenied(path.display().to_string()));
            }
            Err(e) => return Err(DeviceError::Io(e)),
        };

        // Set non-blocking mode
        let fd = device.as_raw_fd();
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }

        let name = device_name(&path);
        Ok(Self {
            device,
            path,
            name,
            grabbed: false,
            queue: VecDeque::new(),
            buffer: vec![0u8; INPUT_EVENT_SIZE * 64],
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    /// Drain the kernel queue into the local edge queue
    fn fill_queue(&mut self) {
        let now = Instant::now();
        loop {
            match self.device.read(&mut self.buffer) {
                Ok(bytes_read) if bytes_read >= INPUT_EVENT_SIZE => {
                    let num_events = bytes_read / INPUT_EVENT_SIZE;
                    for i in 0..num_events {
                        let offset = i * INPUT_EVENT_SIZE;
                        let event_bytes = &self.buffer[offset..offset + INPUT_EVENT_SIZE];

                        let input_event: InputEvent =
                            unsafe { std::ptr::read(event_bytes.as_ptr() as *const InputEvent) };

                        if input_event.event_type != EV_KEY {
                            continue;
                        }

                        // value: 1 = press, 0 = release, 2 = kernel repeat
                        let edge = match input_event.value {
                            1 => EdgeType::Down,
                            0 => EdgeType::Up,
                            2 => EdgeType::AutoRepeat,
                            _ => continue,
                        };
                        self.queue
                            .push_back(KeyEdge::new(KeyCode::new(input_event.code), edge, now));
                    }
                }
                Ok(_) => break, // Not enough bytes for a complete event
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break, // Device gone or unreadable; surfaced elsewhere
            }
        }
    }
}

impl InputSource for EvdevSource {
    fn poll_next_edge(&mut self) -> Option<KeyEdge> {
        if self.queue.is_empty() {
            self.fill_queue();
        }
        self.queue.pop_front()
    }

    fn capture(&mut self) -> Result<(), DeviceError> {
        if self.grabbed {
            return Ok(());
        }
        let fd = self.device.as_raw_fd();
        match unsafe { eviocgrab(fd, 1) } {
            Ok(_) => {
                self.grabbed = true;
                Ok(())
            }
            Err(e) => Err(DeviceError::GrabFailed(e.to_string())),
        }
    }

    fn release(&mut self) {
        if !self.grabbed {
            return;
        }
        let fd = self.device.as_raw_fd();
        // Releasing an already-released grab only errors if the fd is
        // dead, in which case the grab is gone anyway.
        let _ = unsafe { eviocgrab(fd, 0) };
        self.grabbed = false;
    }

    fn description(&self) -> String {
        format!("{} ({})", self.name, self.path.display())
    }
}

impl Drop for EvdevSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Check whether any keyboard device is visible (may still be
/// unreadable without permissions)
pub fn is_keyboard_present() -> bool {
    find_keyboard_devices().is_ok()
}
