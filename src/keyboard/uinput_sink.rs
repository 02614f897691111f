//! Uinput-based output sink for Linux
//!
//! Creates a virtual keyboard via `/dev/uinput` and injects synthetic key
//! events on it. The events are indistinguishable from hardware input to
//! everything reading the virtual device.

use super::{KeyCode, OutputSink};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use thiserror::Error;

/// Error type for synthetic emission
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("failed to open /dev/uinput: {0}")]
    Open(io::Error),
    #[error("uinput device setup failed: {0}")]
    Setup(String),
    #[error("injection failed: {0}")]
    Io(#[from] io::Error),
}

const EV_SYN: u16 = 0x00;
const EV_KEY: u16 = 0x01;
const SYN_REPORT: u16 = 0x00;
const UINPUT_MAX_NAME_SIZE: usize = 80;
const ABS_CNT: usize = 64;

// Highest scancode enabled on the virtual device. Keyboard keys live
// well below this; higher codes are buttons and axes we never inject.
const MAX_KEY_CODE: u16 = 255;

nix::ioctl_write_int!(ui_set_evbit, b'U', 100);
nix::ioctl_write_int!(ui_set_keybit, b'U', 101);
nix::ioctl_none!(ui_dev_create, b'U', 1);
nix::ioctl_none!(ui_dev_destroy, b'U', 2);

#[repr(C)]
#[derive(Clone, Copy)]
struct InputId {
    bustype: u16,
    vendor: u16,
    product: u16,
    version: u16,
}

/// Legacy uinput setup block written before UI_DEV_CREATE
#[repr(C)]
struct UinputUserDev {
    name: [u8; UINPUT_MAX_NAME_SIZE],
    id: InputId,
    ff_effects_max: u32,
    absmax: [i32; ABS_CNT],
    absmin: [i32; ABS_CNT],
    absfuzz: [i32; ABS_CNT],
    absflat: [i32; ABS_CNT],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct InputEvent {
    tv_sec: i64,
    tv_usec: i64,
    event_type: u16,
    code: u16,
    value: i32,
}

const BUS_VIRTUAL: u16 = 0x06;

/// Virtual keyboard output device.
///
/// `emit` takes `&self` (writes go through `&File`), so one sink can be
/// shared between the monitor loop and the repeat emitter tasks.
pub struct UinputSink {
    device: File,
}

impl UinputSink {
    /// Create the virtual keyboard device
    pub fn create(name: &str) -> Result<Self, EmitError> {
        let device = OpenOptions::new()
            .write(true)
            .open("/dev/uinput")
            .map_err(EmitError::Open)?;
        let fd = device.as_raw_fd();

        unsafe {
            ui_set_evbit(fd, EV_KEY as u64)
                .map_err(|e| EmitError::Setup(format!("UI_SET_EVBIT: {}", e)))?;
            ui_set_evbit(fd, EV_SYN as u64)
                .map_err(|e| EmitError::Setup(format!("UI_SET_EVBIT: {}", e)))?;
            for code in 1..=MAX_KEY_CODE {
                ui_set_keybit(fd, code as u64)
                    .map_err(|e| EmitError::Setup(format!("UI_SET_KEYBIT {}: {}", code, e)))?;
            }
        }

        let mut setup = UinputUserDev {
            name: [0u8; UINPUT_MAX_NAME_SIZE],
            id: InputId {
                bustype: BUS_VIRTUAL,
                vendor: 0x1,
                product: 0x1,
                version: 1,
            },
            ff_effects_max: 0,
            absmax: [0; ABS_CNT],
            absmin: [0; ABS_CNT],
            absfuzz: [0; ABS_CNT],
            absflat: [0; ABS_CNT],
        };
        let name_bytes = name.as_bytes();
        let len = name_bytes.len().min(UINPUT_MAX_NAME_SIZE - 1);
        setup.name[..len].copy_from_slice(&name_bytes[..len]);

        let setup_bytes = unsafe {
            std::slice::from_raw_parts(
                &setup as *const UinputUserDev as *const u8,
                std::mem::size_of::<UinputUserDev>(),
            )
        };
        (&device).write_all(setup_bytes)?;

        unsafe {
            ui_dev_create(fd).map_err(|e| EmitError::Setup(format!("UI_DEV_CREATE: {}", e)))?;
        }

        Ok(Self { device })
    }

    fn write_event(&self, event_type: u16, code: u16, value: i32) -> Result<(), EmitError> {
        let event = InputEvent {
            tv_sec: 0,
            tv_usec: 0,
            event_type,
            code,
            value,
        };
        let bytes = unsafe {
            std::slice::from_raw_parts(
                &event as *const InputEvent as *const u8,
                std::mem::size_of::<InputEvent>(),
            )
        };
        (&self.device).write_all(bytes)?;
        Ok(())
    }
}

impl OutputSink for UinputSink {
    fn emit(&self, key: KeyCode, down: bool) -> Result<(), EmitError> {
        self.write_event(EV_KEY, key.as_u16(), if down { 1 } else { 0 })?;
        self.write_event(EV_SYN, SYN_REPORT, 0)?;
        Ok(())
    }
}

impl Drop for UinputSink {
    fn drop(&mut self) {
        let fd = self.device.as_raw_fd();
        let _ = unsafe { ui_dev_destroy(fd) };
    }
}
