//! Outgoing USB queue drain: one packet per device per tick.
//!
//! A failed send is retried after a device reset; when the reset budget is
//! spent (or the reset itself fails) the keyboard is disconnected.

use crate::device::KeyboardDevice;
use crate::registry::Slot;

/// How many consecutive resets a device gets before it is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub resets: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { resets: 1 }
    }
}

/// Result of one drain step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing queued, or no handle to send on.
    Idle,
    Sent,
    /// Send failed, device reset; the report stays queued.
    Reset,
    /// Send failed and recovery did not work; the slot is now empty.
    Disconnected,
}

/// Send the head of `slot`'s queue, if any.
pub fn drain_one<D: KeyboardDevice>(slot: &mut Slot<D>, policy: &RetryPolicy) -> DrainOutcome {
    let index = slot.index();
    let Some((report, handle)) = slot.head_and_handle() else {
        return DrainOutcome::Idle;
    };

    let err = match handle.send(report) {
        Ok(()) => {
            slot.queue.pop_front();
            slot.resets = 0;
            return DrainOutcome::Sent;
        }
        Err(e) => e,
    };

    log::debug!("[usb] slot {index}: {err}");
    if slot.resets < policy.resets {
        slot.resets += 1;
        let reset = slot.handle_mut().map(|h| h.reset());
        match reset {
            Some(Ok(())) => {
                log::info!("[usb] slot {index}: reset after failed send");
                return DrainOutcome::Reset;
            }
            Some(Err(e)) => log::debug!("[usb] slot {index}: {e}"),
            None => {}
        }
    }

    log::warn!("[usb] slot {index}: keyboard not responding, disconnecting");
    slot.disconnect();
    DrainOutcome::Disconnected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockKeyboard;
    use crate::protocol::Features;
    use crate::registry::{DeviceRegistry, SlotState};

    fn with_slot(kb: MockKeyboard, f: impl FnOnce(&mut Slot<MockKeyboard>)) {
        let reg = DeviceRegistry::new(Features::ROOT_DEFAULT);
        let topo = reg.lock_topology();
        let idx = topo.attach(kb, Features::all()).ok().unwrap();
        let mut slot = topo.device(idx).unwrap();
        f(&mut slot);
    }

    #[test]
    fn empty_queue_is_idle() {
        let kb = MockKeyboard::new("A");
        let log = kb.log();
        with_slot(kb, |slot| {
            assert_eq!(drain_one(slot, &RetryPolicy::default()), DrainOutcome::Idle);
        });
        assert_eq!(log.lock().send_attempts, 0);
    }

    #[test]
    fn sends_one_report_per_call() {
        let kb = MockKeyboard::new("A");
        let log = kb.log();
        with_slot(kb, |slot| {
            slot.queue.push_back(vec![1]);
            slot.queue.push_back(vec![2]);
            assert_eq!(drain_one(slot, &RetryPolicy::default()), DrainOutcome::Sent);
            assert_eq!(slot.queue.len(), 1);
        });
        assert_eq!(log.lock().sent, vec![vec![1]]);
    }

    #[test]
    fn failed_send_with_good_reset_keeps_report() {
        let kb = MockKeyboard::new("A");
        let log = kb.log();
        log.lock().fail_sends = 1;
        with_slot(kb, |slot| {
            slot.queue.push_back(vec![7]);
            assert_eq!(drain_one(slot, &RetryPolicy::default()), DrainOutcome::Reset);
            assert_eq!(slot.queue.len(), 1);
            assert_eq!(drain_one(slot, &RetryPolicy::default()), DrainOutcome::Sent);
            assert!(slot.queue.is_empty());
        });
        let log = log.lock();
        assert_eq!(log.resets, 1);
        assert_eq!(log.sent, vec![vec![7]]);
    }

    #[test]
    fn failed_send_and_failed_reset_disconnects() {
        let kb = MockKeyboard::new("A");
        let log = kb.log();
        {
            let mut l = log.lock();
            l.fail_sends = 1;
            l.fail_reset = true;
        }
        with_slot(kb, |slot| {
            slot.queue.push_back(vec![7]);
            assert_eq!(
                drain_one(slot, &RetryPolicy::default()),
                DrainOutcome::Disconnected
            );
            assert_eq!(slot.status(), SlotState::Empty);
            assert!(slot.queue.is_empty());
        });
        assert!(log.lock().dropped);
    }

    #[test]
    fn exhausted_budget_disconnects_without_reset() {
        let kb = MockKeyboard::new("A");
        let log = kb.log();
        log.lock().fail_sends = 2;
        with_slot(kb, |slot| {
            slot.queue.push_back(vec![7]);
            let policy = RetryPolicy::default();
            assert_eq!(drain_one(slot, &policy), DrainOutcome::Reset);
            assert_eq!(drain_one(slot, &policy), DrainOutcome::Disconnected);
        });
        assert_eq!(log.lock().resets, 1);
        assert_eq!(log.lock().send_attempts, 2);
    }

    #[test]
    fn zero_budget_disconnects_immediately() {
        let kb = MockKeyboard::new("A");
        let log = kb.log();
        log.lock().fail_sends = 1;
        with_slot(kb, |slot| {
            slot.queue.push_back(vec![7]);
            assert_eq!(
                drain_one(slot, &RetryPolicy { resets: 0 }),
                DrainOutcome::Disconnected
            );
        });
        assert_eq!(log.lock().resets, 0);
    }

    #[test]
    fn success_restores_budget() {
        let kb = MockKeyboard::new("A");
        let log = kb.log();
        log.lock().fail_sends = 1;
        with_slot(kb, |slot| {
            let policy = RetryPolicy::default();
            slot.queue.push_back(vec![1]);
            slot.queue.push_back(vec![2]);
            assert_eq!(drain_one(slot, &policy), DrainOutcome::Reset);
            assert_eq!(drain_one(slot, &policy), DrainOutcome::Sent);
            log.lock().fail_sends = 1;
            assert_eq!(drain_one(slot, &policy), DrainOutcome::Reset);
        });
    }
}
