//! Device registry: the fixed slot table and its two lock levels.
//!
//! A structural lock guards the table's shape (attach, detach, scan) and
//! every slot carries its own lock for queue and state. Device locks are only
//! reachable through a [`TopologyGuard`], so the order structural → device
//! cannot be inverted.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::command::CommandChannel;
use crate::config::Layout;
use crate::device::{KeyboardDevice, Report};
use crate::lighting::Lighting;
use crate::protocol::{DEV_MAX, Features, Indicators, ROOT_INDEX};

// ── Slot ──

/// Lifecycle of one slot: `Empty → Connecting → Connected → Disconnecting → Empty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Connecting,
    Connected,
    Disconnecting,
}

/// What commands act on.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    /// Always a subset of the process-wide feature mask.
    pub features: Features,
    pub lighting: Lighting,
    /// Per-device override of the system layout.
    pub layout: Option<Layout>,
}

impl DeviceState {
    fn empty() -> Self {
        DeviceState {
            features: Features::empty(),
            lighting: Lighting::new(0),
            layout: None,
        }
    }
}

pub struct Slot<D> {
    index: usize,
    status: SlotState,
    /// USB product id; `None` for the root controller.
    pub model: Option<u16>,
    pub firmware_version: u16,
    pub serial: Option<String>,
    /// Pending USB writes, oldest first.
    pub queue: VecDeque<Report>,
    pub channel: Option<CommandChannel>,
    handle: Option<D>,
    pub state: DeviceState,
    /// Last indicator state queued for the keyboard.
    pub last_indicators: Option<Indicators>,
    /// Consecutive resets since the last successful send.
    pub(crate) resets: u8,
}

impl<D: KeyboardDevice> Slot<D> {
    fn empty(index: usize) -> Self {
        Slot {
            index,
            status: SlotState::Empty,
            model: None,
            firmware_version: 0,
            serial: None,
            queue: VecDeque::new(),
            channel: None,
            handle: None,
            state: DeviceState::empty(),
            last_indicators: None,
            resets: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn status(&self) -> SlotState {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == SlotState::Connected
    }

    pub fn is_root(&self) -> bool {
        self.index == ROOT_INDEX
    }

    pub fn handle(&self) -> Option<&D> {
        self.handle.as_ref()
    }

    pub fn handle_mut(&mut self) -> Option<&mut D> {
        self.handle.as_mut()
    }

    /// Queue head and transport handle, borrowed together for a send.
    pub(crate) fn head_and_handle(&mut self) -> Option<(&Report, &mut D)> {
        Some((self.queue.front()?, self.handle.as_mut()?))
    }

    /// Take the keyboard out of service: release its handle and clear the slot.
    ///
    /// No-op on the root controller.
    pub fn disconnect(&mut self) {
        if self.is_root() {
            log::warn!("[registry] refusing to disconnect the root controller");
            return;
        }
        self.status = SlotState::Disconnecting;
        if let Some(handle) = self.handle.take() {
            log::info!(
                "[registry] slot {}: {} disconnected",
                self.index,
                handle.info().model_name()
            );
        }
        self.reset();
    }

    /// Clear every field back to an empty slot.
    fn reset(&mut self) {
        *self = Slot::empty(self.index);
    }

    /// Close the root controller's command channel and drop queued work.
    pub(crate) fn close_root(&mut self) {
        self.channel = None;
        self.queue.clear();
    }
}

// ── Lock deadlines ──

/// How long a lock acquisition may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDeadline {
    Unbounded,
    Within(Duration),
}

impl LockDeadline {
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map_or(LockDeadline::Unbounded, LockDeadline::Within)
    }

    /// `None` when the deadline passed without getting the lock.
    pub fn acquire<'a, T>(self, mutex: &'a Mutex<T>) -> Option<MutexGuard<'a, T>> {
        match self {
            LockDeadline::Unbounded => Some(mutex.lock()),
            LockDeadline::Within(timeout) => mutex.try_lock_for(timeout),
        }
    }
}

// ── Registry ──

pub struct DeviceRegistry<D> {
    structural: Mutex<()>,
    slots: Vec<Mutex<Slot<D>>>,
}

impl<D: KeyboardDevice> DeviceRegistry<D> {
    /// Table with the root controller connected in slot 0.
    pub fn new(root_features: Features) -> Self {
        let slots = (0..DEV_MAX)
            .map(|i| {
                let mut slot = Slot::empty(i);
                if i == ROOT_INDEX {
                    slot.status = SlotState::Connected;
                    slot.state.features = root_features;
                }
                Mutex::new(slot)
            })
            .collect();
        DeviceRegistry {
            structural: Mutex::new(()),
            slots,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Take the structural lock, waiting as long as needed.
    pub fn lock_topology(&self) -> TopologyGuard<'_, D> {
        TopologyGuard {
            registry: self,
            structural: Some(self.structural.lock()),
        }
    }

    /// Take the structural lock within `timeout`.
    ///
    /// On timeout the guard is still returned, marked contended; shutdown
    /// proceeds without the lock rather than hang.
    pub fn lock_topology_with_deadline(&self, timeout: Option<Duration>) -> TopologyGuard<'_, D> {
        TopologyGuard {
            registry: self,
            structural: LockDeadline::from_timeout(timeout).acquire(&self.structural),
        }
    }
}

/// Proof of structural access; the only way to reach a device lock.
pub struct TopologyGuard<'a, D> {
    registry: &'a DeviceRegistry<D>,
    structural: Option<MutexGuard<'a, ()>>,
}

impl<'a, D: KeyboardDevice> TopologyGuard<'a, D> {
    /// Whether the structural lock timed out and is not actually held.
    pub fn is_contended(&self) -> bool {
        self.structural.is_none()
    }

    /// Lock slot `index`. `None` if the index is out of range.
    pub fn device(&self, index: usize) -> Option<MutexGuard<'a, Slot<D>>> {
        self.registry.slots.get(index).map(|m| m.lock())
    }

    /// Lock slot `index` within `timeout`. `None` if out of range or timed out.
    pub fn device_with_deadline(
        &self,
        index: usize,
        timeout: Option<Duration>,
    ) -> Option<MutexGuard<'a, Slot<D>>> {
        let mutex = self.registry.slots.get(index)?;
        LockDeadline::from_timeout(timeout).acquire(mutex)
    }

    /// Ids of every attached keyboard (serial, else bus path).
    pub fn attached_ids(&self) -> Vec<String> {
        (0..self.registry.capacity())
            .filter_map(|i| {
                let slot = self.device(i)?;
                slot.handle().map(|h| h.info().id().to_string())
            })
            .collect()
    }

    /// Put `device` into the first empty slot after the root.
    ///
    /// Returns the slot index, or the device back when the table is full.
    pub fn attach(&self, device: D, features: Features) -> std::result::Result<usize, D> {
        for i in (ROOT_INDEX + 1)..self.registry.capacity() {
            let Some(mut slot) = self.device(i) else {
                continue;
            };
            if slot.status != SlotState::Empty {
                continue;
            }
            slot.status = SlotState::Connecting;
            let info = device.info();
            slot.model = Some(info.product_id);
            slot.firmware_version = info.firmware_version;
            slot.serial = info.serial.clone();
            slot.state = DeviceState {
                features,
                lighting: Lighting::new(info.led_count),
                layout: None,
            };
            log::info!(
                "[registry] slot {i}: {} (firmware {:x}.{:02x})",
                info.model_name(),
                info.firmware_version >> 8,
                info.firmware_version & 0xff
            );
            slot.handle = Some(device);
            slot.status = SlotState::Connected;
            return Ok(i);
        }
        Err(device)
    }
}
