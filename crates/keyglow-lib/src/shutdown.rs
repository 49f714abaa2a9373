//! Shutdown sequence: hand every keyboard back to its stock driver.
//!
//! Each lock is taken with a bounded wait. A lock that cannot be had in time
//! is skipped and reported, never waited on forever, so the process always
//! gets to exit.

use std::time::Duration;

use crate::device::{KeyboardDevice, UsbBackend};
use crate::protocol::ROOT_INDEX;
use crate::registry::DeviceRegistry;

/// What the shutdown sequence managed to do.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Slots whose keyboard is back in stock mode.
    pub reverted: Vec<usize>,
    /// Slots whose revert failed; the handle was released anyway.
    pub failed: Vec<usize>,
    /// Slots skipped because their lock timed out.
    pub contended: Vec<usize>,
    /// The structural lock timed out and devices were visited without it.
    pub structural_contended: bool,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.contended.is_empty() && !self.structural_contended
    }
}

/// Revert and release every keyboard, close the root controller, then
/// release the USB subsystem.
///
/// `timeout` bounds each lock acquisition; `None` waits indefinitely.
///
/// A keyboard whose slot lock is still held when `timeout` runs out is
/// skipped: it is neither reverted nor released and stays in the driven
/// mode. Its index is listed in [`ShutdownReport::contended`].
pub fn shutdown<B: UsbBackend>(
    registry: &DeviceRegistry<B::Device>,
    backend: &mut B,
    timeout: Option<Duration>,
) -> ShutdownReport {
    let mut report = ShutdownReport::default();

    let topo = registry.lock_topology_with_deadline(timeout);
    if topo.is_contended() {
        log::warn!("[shutdown] device list is busy, continuing without it");
        report.structural_contended = true;
    }

    for index in (ROOT_INDEX + 1)..registry.capacity() {
        let Some(mut slot) = topo.device_with_deadline(index, timeout) else {
            log::warn!("[shutdown] slot {index} is busy, skipping");
            report.contended.push(index);
            continue;
        };
        if !slot.is_connected() {
            continue;
        }
        if let Some(handle) = slot.handle_mut() {
            handle.stop_input();
            match handle.revert_to_stock() {
                Ok(()) => report.reverted.push(index),
                Err(e) => {
                    log::warn!("[shutdown] slot {index}: {e}");
                    report.failed.push(index);
                }
            }
        }
        slot.disconnect();
    }

    match topo.device_with_deadline(ROOT_INDEX, timeout) {
        Some(mut root) => root.close_root(),
        None => {
            log::warn!("[shutdown] root controller is busy, skipping");
            report.contended.push(ROOT_INDEX);
        }
    }
    drop(topo);

    backend.deinit();
    log::info!(
        "[shutdown] {} keyboard(s) returned to stock mode",
        report.reverted.len()
    );
    report
}
