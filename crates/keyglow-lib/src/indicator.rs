//! Indicator LED sync (Num/Caps/Scroll Lock).
//!
//! Indicator state is polled rather than event-driven: the OS may change it
//! at any time and keyboards do not report it back.

use std::path::PathBuf;

use crate::device::KeyboardDevice;
use crate::protocol::Indicators;
use crate::registry::Slot;
use crate::report::ReportEncoder;

/// Where the desired indicator state comes from.
pub trait IndicatorSource: Send {
    fn read(&self) -> Indicators;
}

/// Reads `/sys/class/leds/<dev>::{numlock,capslock,scrolllock}/brightness`.
///
/// A lock counts as on if any input device reports it on.
#[derive(Debug, Clone)]
pub struct SysfsIndicators {
    root: PathBuf,
}

impl Default for SysfsIndicators {
    fn default() -> Self {
        Self::new("/sys/class/leds")
    }
}

impl SysfsIndicators {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SysfsIndicators { root: root.into() }
    }
}

const LED_NAMES: [(&str, Indicators); 3] = [
    ("::numlock", Indicators::NUM_LOCK),
    ("::capslock", Indicators::CAPS_LOCK),
    ("::scrolllock", Indicators::SCROLL_LOCK),
];

impl IndicatorSource for SysfsIndicators {
    fn read(&self) -> Indicators {
        let mut state = Indicators::empty();
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return state;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(&(_, flag)) = LED_NAMES.iter().find(|(suffix, _)| name.ends_with(*suffix))
            else {
                continue;
            };
            let on = std::fs::read_to_string(entry.path().join("brightness"))
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .is_some_and(|b| b > 0);
            if on {
                state |= flag;
            }
        }
        state
    }
}

/// Queue an indicator report when the desired state changed.
///
/// Only runs on an idle queue so indicator writes never jump ahead of
/// lighting frames. Returns whether a report was queued.
pub fn sync<D: KeyboardDevice>(
    slot: &mut Slot<D>,
    source: &dyn IndicatorSource,
    encoder: &dyn ReportEncoder,
) -> bool {
    if !slot.queue.is_empty() || slot.handle().is_none() {
        return false;
    }
    let current = source.read();
    if slot.last_indicators == Some(current) {
        return false;
    }
    log::debug!("[indicator] slot {}: {current:?}", slot.index());
    slot.queue.push_back(encoder.indicators(current));
    slot.last_indicators = Some(current);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{MockIndicators, MockKeyboard};
    use crate::protocol::Features;
    use crate::registry::DeviceRegistry;
    use crate::report::PlanarEncoder;

    #[test]
    fn first_sync_always_queues() {
        let reg = DeviceRegistry::new(Features::ROOT_DEFAULT);
        let topo = reg.lock_topology();
        topo.attach(MockKeyboard::new("A"), Features::all()).ok().unwrap();
        let mut slot = topo.device(1).unwrap();
        let src = MockIndicators::default();
        assert!(sync(&mut slot, &src, &PlanarEncoder));
        assert_eq!(slot.queue.len(), 1);
        assert_eq!(slot.last_indicators, Some(Indicators::empty()));
    }

    #[test]
    fn unchanged_state_queues_nothing() {
        let reg = DeviceRegistry::new(Features::ROOT_DEFAULT);
        let topo = reg.lock_topology();
        topo.attach(MockKeyboard::new("A"), Features::all()).ok().unwrap();
        let mut slot = topo.device(1).unwrap();
        let src = MockIndicators::default();
        sync(&mut slot, &src, &PlanarEncoder);
        slot.queue.clear();
        assert!(!sync(&mut slot, &src, &PlanarEncoder));

        src.set(Indicators::CAPS_LOCK);
        assert!(sync(&mut slot, &src, &PlanarEncoder));
        assert_eq!(slot.queue.back(), Some(&vec![Indicators::CAPS_LOCK.bits()]));
    }

    #[test]
    fn busy_queue_defers_sync() {
        let reg = DeviceRegistry::new(Features::ROOT_DEFAULT);
        let topo = reg.lock_topology();
        topo.attach(MockKeyboard::new("A"), Features::all()).ok().unwrap();
        let mut slot = topo.device(1).unwrap();
        slot.queue.push_back(vec![0]);
        assert!(!sync(&mut slot, &MockIndicators::default(), &PlanarEncoder));
        assert_eq!(slot.last_indicators, None);
    }

    #[test]
    fn root_controller_is_skipped() {
        let reg = DeviceRegistry::<MockKeyboard>::new(Features::ROOT_DEFAULT);
        let topo = reg.lock_topology();
        let mut root = topo.device(0).unwrap();
        assert!(!sync(&mut root, &MockIndicators::default(), &PlanarEncoder));
    }

    #[test]
    fn sysfs_reads_brightness_files() {
        let dir = tempfile::tempdir().unwrap();
        for (name, value) in [
            ("input3::capslock", "1"),
            ("input3::numlock", "0"),
            ("input5::numlock", "1"),
            ("phy0-led", "1"),
        ] {
            let led = dir.path().join(name);
            std::fs::create_dir(&led).unwrap();
            std::fs::write(led.join("brightness"), format!("{value}\n")).unwrap();
        }
        let state = SysfsIndicators::new(dir.path()).read();
        assert_eq!(state, Indicators::CAPS_LOCK | Indicators::NUM_LOCK);
    }

    #[test]
    fn sysfs_missing_root_reads_all_off() {
        let src = SysfsIndicators::new("/nonexistent/keyglow/leds");
        assert_eq!(src.read(), Indicators::empty());
    }
}
