//! The tick loop: intake, drain and indicator sync for every device, paced
//! by the frame scheduler, until a shutdown is requested.

use std::time::{Duration, Instant};

use crate::command::{self, CommandSet, StandardCommands};
use crate::config::{DaemonConfig, Layout, layout_from_locale, system_locale};
use crate::devnode::DevNodes;
use crate::discovery::DiscoveryState;
use crate::drain::{self, DrainOutcome, RetryPolicy};
use crate::device::{KeyboardDevice, UsbBackend};
use crate::error::Result;
use crate::indicator::{self, IndicatorSource, SysfsIndicators};
use crate::protocol::{Features, ROOT_INDEX};
use crate::registry::{DeviceRegistry, TopologyGuard};
use crate::report::{PlanarEncoder, ReportEncoder};
use crate::scheduler::{self, FrameScheduler, SchedulerState};
use crate::shutdown::{self, ShutdownReport};
use crate::signal::ShutdownRequest;

/// What happened during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    /// Keyboards attached by this tick's scan.
    pub attached: usize,
    pub applied: usize,
    pub rejected: usize,
    /// Reports written to keyboards.
    pub sent: usize,
    pub disconnected: usize,
    /// When the next tick should start.
    pub deadline: Instant,
}

pub struct Daemon<B: UsbBackend> {
    registry: DeviceRegistry<B::Device>,
    backend: B,
    scheduler: FrameScheduler,
    commands: Box<dyn CommandSet>,
    encoder: Box<dyn ReportEncoder>,
    indicators: Box<dyn IndicatorSource>,
    discovery: DiscoveryState,
    devnodes: Option<DevNodes>,
    retry: RetryPolicy,
    feature_mask: Features,
    layout: Layout,
    shutdown_timeout: Option<Duration>,
    request: ShutdownRequest,
    stopped: bool,
}

impl<B: UsbBackend> Daemon<B> {
    pub fn new(backend: B, config: &DaemonConfig, request: ShutdownRequest) -> Self {
        let feature_mask = config.feature_mask();
        Daemon {
            registry: DeviceRegistry::new(Features::ROOT_DEFAULT & feature_mask),
            backend,
            scheduler: FrameScheduler::new(config.fps),
            commands: Box::new(StandardCommands::new()),
            encoder: Box::new(PlanarEncoder),
            indicators: Box::new(SysfsIndicators::default()),
            discovery: DiscoveryState::new(config.scan_config()),
            devnodes: None,
            retry: RetryPolicy::default(),
            feature_mask,
            layout: config
                .layout()
                .unwrap_or_else(|| layout_from_locale(&system_locale())),
            shutdown_timeout: config.shutdown_lock_timeout(),
            request,
            stopped: false,
        }
    }

    /// Expose devices as FIFOs under `nodes`.
    pub fn with_devnodes(mut self, nodes: DevNodes) -> Self {
        self.devnodes = Some(nodes);
        self
    }

    pub fn with_commands(mut self, commands: Box<dyn CommandSet>) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_encoder(mut self, encoder: Box<dyn ReportEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_indicators(mut self, indicators: Box<dyn IndicatorSource>) -> Self {
        self.indicators = indicators;
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn registry(&self) -> &DeviceRegistry<B::Device> {
        &self.registry
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn feature_mask(&self) -> Features {
        self.feature_mask
    }

    /// Layout of slot `index`: its own override, else the system layout.
    pub fn layout_of(&self, index: usize) -> Layout {
        let topo = self.registry.lock_topology();
        topo.device(index)
            .and_then(|slot| slot.state.layout)
            .unwrap_or(self.layout)
    }

    /// Open the root controller's node, write the PID file, start the clock.
    pub fn start(&mut self) -> Result<()> {
        if let Some(nodes) = &self.devnodes {
            let channel = nodes.create(ROOT_INDEX)?;
            let topo = self.registry.lock_topology();
            if let Some(mut root) = topo.device(ROOT_INDEX) {
                root.channel = Some(channel);
            }
            nodes.write_pid()?;
            log::info!("Root controller ready at {}", nodes.dir(ROOT_INDEX).display());
        }
        self.scheduler.start();
        Ok(())
    }

    /// One pass over every device, root controller first.
    pub fn tick(&mut self) -> Result<TickSummary> {
        self.scheduler.begin_tick()?;
        let accepting = !self.request.is_requested();

        let mut attached = 0;
        let mut applied = 0;
        let mut rejected = 0;
        let mut sent = 0;
        let mut disconnected = 0;
        let mut firmware = Vec::new();

        {
            let topo = self.registry.lock_topology();

            if accepting && self.discovery.scan_due() {
                attached = attach_new_keyboards(
                    &topo,
                    &mut self.backend,
                    self.devnodes.as_ref(),
                    self.feature_mask,
                );
                self.discovery.record_scan(attached);
            }

            for index in 0..self.registry.capacity() {
                let Some(mut guard) = topo.device(index) else {
                    continue;
                };
                if !guard.is_connected() {
                    continue;
                }
                let slot = &mut *guard;

                if let Some(channel) = slot.channel.as_mut() {
                    let intake = command::intake(
                        channel,
                        &mut slot.state,
                        self.commands.as_ref(),
                        self.feature_mask,
                        &self.request,
                    );
                    applied += intake.applied;
                    rejected += intake.rejected;
                }

                if slot.queue.is_empty() && slot.handle().is_some() && slot.state.lighting.is_dirty()
                {
                    slot.queue.extend(self.encoder.lighting(&slot.state.lighting));
                    slot.state.lighting.mark_clean();
                }

                match drain::drain_one(slot, &self.retry) {
                    DrainOutcome::Sent => sent += 1,
                    DrainOutcome::Disconnected => {
                        disconnected += 1;
                        if let Some(nodes) = &self.devnodes {
                            nodes.remove(index);
                        }
                        self.discovery.rescan_soon();
                        continue;
                    }
                    DrainOutcome::Idle | DrainOutcome::Reset => {}
                }

                if !slot.is_root() {
                    indicator::sync(slot, self.indicators.as_ref(), self.encoder.as_ref());
                }
                firmware.push(slot.firmware_version);
            }
        }

        let deadline = self.scheduler.end_tick(firmware)?;
        Ok(TickSummary {
            attached,
            applied,
            rejected,
            sent,
            disconnected,
            deadline,
        })
    }

    /// Tick until a shutdown is requested, then shut down. Starts the
    /// daemon first unless [`Daemon::start`] already ran.
    pub fn run(&mut self) -> Result<ShutdownReport> {
        if self.scheduler.state() == SchedulerState::Uninitialized {
            self.start()?;
        }
        while !self.request.is_requested() {
            let summary = self.tick()?;
            scheduler::sleep_until(summary.deadline);
        }
        Ok(self.shutdown())
    }

    /// Return keyboards to stock mode and remove device nodes. Runs once.
    pub fn shutdown(&mut self) -> ShutdownReport {
        if self.stopped {
            return ShutdownReport::default();
        }
        self.stopped = true;
        let report = shutdown::shutdown(&self.registry, &mut self.backend, self.shutdown_timeout);
        if let Some(nodes) = &self.devnodes {
            for index in (0..self.registry.capacity()).rev() {
                nodes.remove(index);
            }
        }
        report
    }
}

/// Scan for keyboards not yet attached and give each a slot and a node.
fn attach_new_keyboards<B: UsbBackend>(
    topo: &TopologyGuard<'_, B::Device>,
    backend: &mut B,
    devnodes: Option<&DevNodes>,
    mask: Features,
) -> usize {
    let mut attached = 0;
    for keyboard in backend.scan(&topo.attached_ids()) {
        let index = match topo.attach(keyboard, Features::KEYBOARD_DEFAULT & mask) {
            Ok(index) => index,
            Err(keyboard) => {
                log::warn!(
                    "[usb] no free slot for {}, ignoring it",
                    keyboard.info().model_name()
                );
                continue;
            }
        };
        attached += 1;

        let Some(nodes) = devnodes else {
            continue;
        };
        let Some(mut slot) = topo.device(index) else {
            continue;
        };
        match nodes.create(index) {
            Ok(channel) => slot.channel = Some(channel),
            Err(e) => log::warn!("[devnode] slot {index}: {e}"),
        }
        if let Some(handle) = slot.handle()
            && let Err(e) = nodes.describe(index, handle.info())
        {
            log::warn!("[devnode] slot {index}: {e}");
        }
    }
    attached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandChannel;
    use crate::device::mock::{MockBackend, MockIndicators, MockKeyboard, MockPipe};
    use crate::protocol::{Indicators, PACKETS_PER_FRAME, PACKETS_PER_FRAME_V120};
    use crate::signal::SignalDispatcher;

    fn daemon(keyboards: Vec<MockKeyboard>) -> Daemon<MockBackend> {
        let mut d = Daemon::new(
            MockBackend::with_keyboards(keyboards),
            &DaemonConfig::default(),
            ShutdownRequest::never(),
        )
        .with_indicators(Box::new(MockIndicators::default()));
        d.start().unwrap();
        d
    }

    fn attach_pipe(d: &Daemon<MockBackend>, index: usize) -> MockPipe {
        let pipe = MockPipe::new();
        let topo = d.registry().lock_topology();
        topo.device(index).unwrap().channel = Some(CommandChannel::new(Box::new(pipe.clone())));
        pipe
    }

    #[test]
    fn tick_before_start_is_an_error() {
        let mut d = Daemon::new(
            MockBackend::default(),
            &DaemonConfig::default(),
            ShutdownRequest::never(),
        );
        assert!(d.tick().is_err());
    }

    #[test]
    fn first_tick_attaches_keyboards() {
        let mut d = daemon(vec![MockKeyboard::new("A"), MockKeyboard::new("B")]);
        let summary = d.tick().unwrap();
        assert_eq!(summary.attached, 2);
        let topo = d.registry().lock_topology();
        assert_eq!(topo.attached_ids(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn at_most_one_send_per_device_per_tick() {
        let kb = MockKeyboard::new("A");
        let log = kb.log();
        let mut d = daemon(vec![kb]);
        d.tick().unwrap();
        {
            let topo = d.registry().lock_topology();
            let mut slot = topo.device(1).unwrap();
            slot.queue.extend([vec![1], vec![2], vec![3]]);
        }
        let before = log.lock().send_attempts;
        d.tick().unwrap();
        assert_eq!(log.lock().send_attempts, before + 1);
    }

    #[test]
    fn command_changes_are_encoded_and_sent() {
        let kb = MockKeyboard::new("A").with_led_count(4);
        let log = kb.log();
        let mut d = daemon(vec![kb]);
        d.tick().unwrap();
        let pipe = attach_pipe(&d, 1);
        pipe.write(b"rgb ff0000\n");

        let summary = d.tick().unwrap();
        assert_eq!(summary.applied, 1);
        // 3 planes of 4 LEDs, one packet per tick
        for _ in 0..5 {
            d.tick().unwrap();
        }
        let sent = log.lock().sent.clone();
        assert!(sent.iter().any(|r| r[0] == crate::protocol::REPORT_LIGHTING && r[1] == 0));
    }

    #[test]
    fn failing_keyboard_is_disconnected_and_slot_freed() {
        let kb = MockKeyboard::new("A");
        let log = kb.log();
        let mut d = daemon(vec![kb]);
        d.tick().unwrap();
        {
            let mut l = log.lock();
            l.fail_sends = 10;
            l.fail_reset = true;
        }
        {
            let topo = d.registry().lock_topology();
            topo.device(1).unwrap().queue.push_back(vec![9]);
        }
        let summary = d.tick().unwrap();
        assert_eq!(summary.disconnected, 1);
        assert!(d.registry().lock_topology().attached_ids().is_empty());
        assert!(log.lock().dropped);
    }

    #[test]
    fn indicators_follow_source() {
        let kb = MockKeyboard::new("A");
        let log = kb.log();
        let src = MockIndicators::default();
        let mut d = Daemon::new(
            MockBackend::with_keyboards(vec![kb]),
            &DaemonConfig::default(),
            ShutdownRequest::never(),
        )
        .with_indicators(Box::new(src.clone()));
        d.start().unwrap();

        d.tick().unwrap(); // attach + initial indicator report queued
        d.tick().unwrap(); // sent
        src.set(Indicators::CAPS_LOCK);
        d.tick().unwrap(); // queued
        d.tick().unwrap(); // sent
        let sent = log.lock().sent.clone();
        assert_eq!(sent.last(), Some(&vec![Indicators::CAPS_LOCK.bits()]));
    }

    #[test]
    fn v120_firmware_raises_packet_rate() {
        let mut d = daemon(vec![MockKeyboard::new("A")]);
        d.tick().unwrap();
        assert_eq!(d.scheduler.multiplier(), PACKETS_PER_FRAME);

        let mut d = daemon(vec![MockKeyboard::new("A").with_firmware(0x0120)]);
        d.tick().unwrap();
        assert_eq!(d.scheduler.multiplier(), PACKETS_PER_FRAME_V120);
    }

    #[test]
    fn no_commands_after_shutdown_requested() {
        let dispatcher = SignalDispatcher::new();
        let mut d = Daemon::new(
            MockBackend::with_keyboards(vec![MockKeyboard::new("A")]),
            &DaemonConfig::default(),
            dispatcher.request(),
        )
        .with_indicators(Box::new(MockIndicators::default()));
        d.start().unwrap();
        d.tick().unwrap();
        let pipe = attach_pipe(&d, 1);
        pipe.write(b"rgb off\n");
        dispatcher.on_signal();

        let summary = d.tick().unwrap();
        assert_eq!(summary.applied, 0);
        let topo = d.registry().lock_topology();
        assert!(topo.device(1).unwrap().state.lighting.enabled);
    }

    #[test]
    fn run_returns_after_signal() {
        let dispatcher = SignalDispatcher::new();
        let kb = MockKeyboard::new("A");
        let log = kb.log();
        let mut d = Daemon::new(
            MockBackend::with_keyboards(vec![kb]),
            &DaemonConfig::default(),
            dispatcher.request(),
        )
        .with_indicators(Box::new(MockIndicators::default()));
        d.start().unwrap();
        d.tick().unwrap();

        dispatcher.on_signal();
        let report = d.run().unwrap();
        assert_eq!(report.reverted, vec![1]);
        assert!(log.lock().reverted);
        assert_eq!(d.backend().deinit_calls, 1);
    }

    #[test]
    fn shutdown_runs_once() {
        let mut d = daemon(vec![MockKeyboard::new("A")]);
        d.tick().unwrap();
        assert_eq!(d.shutdown().reverted, vec![1]);
        assert_eq!(d.shutdown(), ShutdownReport::default());
        assert_eq!(d.backend().deinit_calls, 1);
    }

    #[test]
    fn layout_override_per_device() {
        let mut d = daemon(vec![MockKeyboard::new("A")]).with_layout(Layout::Us);
        d.tick().unwrap();
        let pipe = attach_pipe(&d, 1);
        pipe.write(b"layout de\n");
        d.tick().unwrap();
        assert_eq!(d.layout_of(1), Layout::De);
        assert_eq!(d.layout_of(ROOT_INDEX), Layout::Us);
    }

    #[test]
    fn nobind_masks_root_features() {
        let config = DaemonConfig {
            bind: false,
            ..Default::default()
        };
        let d = Daemon::new(MockBackend::default(), &config, ShutdownRequest::never());
        let topo = d.registry().lock_topology();
        assert_eq!(topo.device(ROOT_INDEX).unwrap().state.features, Features::empty());
    }

    #[test]
    fn devnodes_follow_attach_and_shutdown() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("kg").to_string_lossy().into_owned();
        let nodes = DevNodes::new(base.clone(), None);
        let mut d = Daemon::new(
            MockBackend::with_keyboards(vec![MockKeyboard::new("A")]),
            &DaemonConfig::default(),
            ShutdownRequest::never(),
        )
        .with_indicators(Box::new(MockIndicators::default()))
        .with_devnodes(nodes.clone());
        d.start().unwrap();
        assert!(nodes.pid_path().exists());

        d.tick().unwrap();
        assert!(nodes.cmd_path(1).exists());
        assert_eq!(
            std::fs::read_to_string(nodes.dir(1).join("serial")).unwrap(),
            "A\n"
        );

        d.shutdown();
        assert!(!nodes.dir(0).exists());
        assert!(!nodes.dir(1).exists());
    }
}
