//! Integration tests: the daemon tick loop driven through the public API
//! with mock keyboards, command pipes and indicator sources.

use keyglow_lib::command::CommandChannel;
use keyglow_lib::config::DaemonConfig;
use keyglow_lib::daemon::Daemon;
use keyglow_lib::device::mock::{MockBackend, MockIndicators, MockKeyboard, MockPipe};
use keyglow_lib::protocol::*;
use keyglow_lib::signal::{ShutdownRequest, SignalDispatcher};

fn daemon_with(keyboards: Vec<MockKeyboard>, request: ShutdownRequest) -> Daemon<MockBackend> {
    let config = DaemonConfig {
        scan_interval_ms: 1,
        ..Default::default()
    };
    let mut d = Daemon::new(MockBackend::with_keyboards(keyboards), &config, request)
        .with_indicators(Box::new(MockIndicators::default()));
    d.start().unwrap();
    d
}

fn pipe_into(d: &Daemon<MockBackend>, index: usize) -> MockPipe {
    let pipe = MockPipe::new();
    let topo = d.registry().lock_topology();
    topo.device(index).unwrap().channel = Some(CommandChannel::new(Box::new(pipe.clone())));
    pipe
}

// ── Pacing ──

#[test]
fn every_device_gets_at_most_one_write_per_tick() {
    let keyboards: Vec<_> = ["A", "B", "C"].iter().map(|s| MockKeyboard::new(s)).collect();
    let logs: Vec<_> = keyboards.iter().map(|k| k.log()).collect();
    let mut d = daemon_with(keyboards, ShutdownRequest::never());
    d.tick().unwrap();

    {
        let topo = d.registry().lock_topology();
        for i in 1..=3 {
            let mut slot = topo.device(i).unwrap();
            for n in 0..10u8 {
                slot.queue.push_back(vec![n]);
            }
        }
    }

    for tick in 1..=5u32 {
        d.tick().unwrap();
        for log in &logs {
            assert_eq!(log.lock().send_attempts, tick);
        }
    }
}

#[test]
fn deadline_is_not_in_the_past() {
    let mut d = daemon_with(vec![MockKeyboard::new("A")], ShutdownRequest::never());
    let summary = d.tick().unwrap();
    assert!(summary.deadline > std::time::Instant::now() - MIN_TICK_SLEEP);
}

// ── Failure handling ──

#[test]
fn failed_send_recovers_after_reset() {
    let kb = MockKeyboard::new("A");
    let log = kb.log();
    let mut d = daemon_with(vec![kb], ShutdownRequest::never());
    d.tick().unwrap();

    log.lock().fail_sends = 1;
    let summary = d.tick().unwrap();
    assert_eq!(summary.disconnected, 0);
    assert_eq!(log.lock().resets, 1);

    // queued report survives the reset and goes out next tick
    let summary = d.tick().unwrap();
    assert_eq!(summary.sent, 1);
}

#[test]
fn failed_send_and_reset_disconnects_in_same_tick() {
    let kb = MockKeyboard::new("A");
    let log = kb.log();
    let mut d = daemon_with(vec![kb], ShutdownRequest::never());
    d.tick().unwrap();
    {
        let mut l = log.lock();
        l.fail_sends = u32::MAX;
        l.fail_reset = true;
    }

    let summary = d.tick().unwrap();
    assert_eq!(summary.disconnected, 1);
    assert!(log.lock().dropped);
    let topo = d.registry().lock_topology();
    assert!(!topo.device(1).unwrap().is_connected());
}

// ── Hot-plug ──

#[test]
fn keyboard_plugged_in_later_is_attached() {
    let mut d = daemon_with(vec![], ShutdownRequest::never());
    d.tick().unwrap();
    assert!(d.registry().lock_topology().attached_ids().is_empty());

    d.backend_mut().pending.push(MockKeyboard::new("late"));
    std::thread::sleep(std::time::Duration::from_millis(5));
    let summary = d.tick().unwrap();
    assert_eq!(summary.attached, 1);
    assert_eq!(
        d.registry().lock_topology().attached_ids(),
        vec!["late".to_string()]
    );
}

#[test]
fn table_never_exceeds_capacity() {
    let keyboards = (0..DEV_MAX + 2)
        .map(|n| MockKeyboard::new(&format!("kb{n}")))
        .collect();
    let mut d = daemon_with(keyboards, ShutdownRequest::never());
    d.tick().unwrap();
    assert_eq!(d.registry().lock_topology().attached_ids().len(), DEV_MAX - 1);
}

// ── Firmware pacing ──

#[test]
fn mixed_firmware_uses_highest_multiplier() {
    let old = MockKeyboard::new("old");
    let new = MockKeyboard::new("new").with_firmware(FIRMWARE_V120);
    let mut d = daemon_with(vec![old, new], ShutdownRequest::never());
    let start = std::time::Instant::now();
    let summary = d.tick().unwrap();
    let expected = keyglow_lib::scheduler::frame_interval(DEFAULT_FPS, PACKETS_PER_FRAME_V120);
    assert!(summary.deadline <= start + expected + std::time::Duration::from_millis(50));
}

// ── Commands ──

#[test]
fn root_controller_accepts_notify_commands() {
    let mut d = daemon_with(vec![], ShutdownRequest::never());
    let pipe = pipe_into(&d, ROOT_INDEX);
    pipe.write(b"notifyoff\n");
    let summary = d.tick().unwrap();
    assert_eq!(summary.applied, 1);
    let topo = d.registry().lock_topology();
    assert!(!topo.device(ROOT_INDEX).unwrap().state.features.contains(Features::NOTIFY));
}

#[test]
fn rgb_on_root_controller_is_rejected() {
    let mut d = daemon_with(vec![], ShutdownRequest::never());
    let pipe = pipe_into(&d, ROOT_INDEX);
    pipe.write(b"rgb ff0000\nbogus\n");
    let summary = d.tick().unwrap();
    assert_eq!(summary.applied, 0);
    assert_eq!(summary.rejected, 2);
}

#[test]
fn commands_stop_once_shutdown_is_requested() {
    let dispatcher = SignalDispatcher::new();
    let mut d = daemon_with(vec![MockKeyboard::new("A")], dispatcher.request());
    d.tick().unwrap();
    let pipe = pipe_into(&d, 1);

    pipe.write(b"rgb 00ff00\n");
    assert_eq!(d.tick().unwrap().applied, 1);

    pipe.write(b"rgb off\n");
    dispatcher.on_signal();
    assert_eq!(d.tick().unwrap().applied, 0);
    assert!(pipe.pending() > 0, "pipe is not read after shutdown request");
}
