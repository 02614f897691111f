//! Virtualization consumer probe
//!
//! A virtualization process with device passthrough (QEMU/KVM) needs the
//! raw keyboard itself; while it runs, this daemon must not hold the
//! exclusive grab. The probe answers "is that consumer active right
//! now". It may be slow, so the arbitration manager calls it at a
//! bounded interval only.

use std::fs;
use std::path::Path;

/// Synchronous check for an external virtualization consumer
pub trait VirtProbe {
    fn is_active(&mut self) -> bool;
}

/// Probe that scans `/proc/<pid>/comm` for configured process names
pub struct ProcessProbe {
    names: Vec<String>,
    proc_root: std::path::PathBuf,
}

impl ProcessProbe {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names,
            proc_root: std::path::PathBuf::from("/proc"),
        }
    }

    #[cfg(test)]
    fn with_root(names: Vec<String>, proc_root: std::path::PathBuf) -> Self {
        Self { names, proc_root }
    }

    fn scan(&self) -> bool {
        let entries = match fs::read_dir(&self.proc_root) {
            Ok(entries) => entries,
            Err(_) => return false,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !is_pid_dir(&path) {
                continue;
            }
            if let Ok(comm) = fs::read_to_string(path.join("comm")) {
                let comm = comm.trim();
                if self.names.iter().any(|name| name == comm) {
                    return true;
                }
            }
        }
        false
    }
}

fn is_pid_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

impl VirtProbe for ProcessProbe {
    fn is_active(&mut self) -> bool {
        if self.names.is_empty() {
            return false;
        }
        self.scan()
    }
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new(vec![
            "qemu-system-x86_64".to_string(),
            "qemu-system-i386".to_string(),
            "kvm".to_string(),
        ])
    }
}
