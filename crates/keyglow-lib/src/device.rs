//! Keyboard transport: traits + Linux `nusb` backend.
//!
//! The engine only ever talks to [`KeyboardDevice`] and [`UsbBackend`];
//! report layouts and USB plumbing stay behind those seams.

use std::fmt;

use crate::models;

// ── Error type ──

/// Keyboard transport errors.
///
/// String payloads follow the convention **"context: details"** where *context*
/// identifies the operation (e.g. `"SET_REPORT"`, `"USB open"`) and *details*
/// describes what went wrong.
#[derive(Debug)]
pub enum DeviceError {
    NotFound,
    OpenFailed(String),
    SendFailed(String),
    ResetFailed(String),
    RevertFailed(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NotFound => write!(f, "Keyboard not found"),
            DeviceError::OpenFailed(e) => write!(f, "Failed to open keyboard: {e}"),
            DeviceError::SendFailed(e) => write!(f, "Send failed: {e}"),
            DeviceError::ResetFailed(e) => write!(f, "Reset failed: {e}"),
            DeviceError::RevertFailed(e) => write!(f, "Revert to stock mode failed: {e}"),
        }
    }
}

impl std::error::Error for DeviceError {}

pub type Result<T> = std::result::Result<T, DeviceError>;

/// One encoded USB write, at most [`REPORT_SIZE`](crate::protocol::REPORT_SIZE) bytes.
pub type Report = Vec<u8>;

// ── Device info ──

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Bus location, e.g. `usb:001/004`.
    pub path: String,
    pub product_id: u16,
    pub serial: Option<String>,
    /// BCD firmware version from `bcdDevice` (`0x0120` = v1.20).
    pub firmware_version: u16,
    pub led_count: usize,
}

impl DeviceInfo {
    /// Stable identity used to avoid attaching the same keyboard twice.
    pub fn id(&self) -> &str {
        self.serial.as_deref().unwrap_or(&self.path)
    }

    /// Marketing name, or the product id when the model is unknown.
    pub fn model_name(&self) -> String {
        models::detect_model(self.product_id)
            .map(|m| m.name.to_string())
            .unwrap_or_else(|| format!("{:04x}", self.product_id))
    }
}

// ── Traits ──

/// An opened keyboard.
pub trait KeyboardDevice {
    fn info(&self) -> &DeviceInfo;

    /// Write one report. Must not block longer than the transport timeout.
    fn send(&mut self, report: &[u8]) -> Result<()>;

    /// Reset the device in place after a failed send.
    fn reset(&mut self) -> Result<()>;

    /// Return the keyboard to its stock, undriven input mode.
    fn revert_to_stock(&mut self) -> Result<()>;

    /// Stop injecting OS input events for this keyboard.
    /// Default: nothing to stop.
    fn stop_input(&mut self) {}
}

/// USB subsystem: finds keyboards and owns global USB state.
pub trait UsbBackend {
    type Device: KeyboardDevice;

    /// Open every supported keyboard whose [`DeviceInfo::id`] is not in `attached`.
    fn scan(&mut self, attached: &[String]) -> Vec<Self::Device>;

    /// Release global USB state. Called once, last, during shutdown.
    fn deinit(&mut self);
}

// ── Linux implementation ──

#[cfg(target_os = "linux")]
mod linux_impl {
    use super::*;

    use nusb::transfer::{Control, ControlType, Recipient};

    use crate::protocol::{
        CORSAIR_VID, HID_REPORT_TYPE_OUTPUT, HID_SET_REPORT, USB_CLASS_HID, USB_TIMEOUT,
    };

    pub struct NusbKeyboard {
        device: nusb::Device,
        /// `None` once the interface has been handed back to the stock driver.
        interface: Option<nusb::Interface>,
        interface_number: u8,
        info: DeviceInfo,
    }

    impl NusbKeyboard {
        fn open(dev: &nusb::DeviceInfo) -> Result<Self> {
            let interface_number = dev
                .interfaces()
                .find(|iface| iface.class() == USB_CLASS_HID)
                .map(|iface| iface.interface_number())
                .ok_or_else(|| DeviceError::OpenFailed("no HID interface".into()))?;

            let device = dev
                .open()
                .map_err(|e| DeviceError::OpenFailed(format!("USB open: {e}")))?;

            // The stock usbhid driver owns the interface until we take it.
            let interface = device
                .detach_and_claim_interface(interface_number)
                .map_err(|e| {
                    DeviceError::OpenFailed(format!("claim interface {interface_number}: {e}"))
                })?;

            let info = DeviceInfo {
                path: format!("usb:{:03}/{:03}", dev.bus_number(), dev.device_address()),
                product_id: dev.product_id(),
                serial: dev.serial_number().map(|s| s.to_string()),
                firmware_version: dev.device_version(),
                led_count: models::led_count(dev.product_id()),
            };

            Ok(NusbKeyboard {
                device,
                interface: Some(interface),
                interface_number,
                info,
            })
        }
    }

    impl KeyboardDevice for NusbKeyboard {
        fn info(&self) -> &DeviceInfo {
            &self.info
        }

        fn send(&mut self, report: &[u8]) -> Result<()> {
            let interface = self
                .interface
                .as_ref()
                .ok_or_else(|| DeviceError::SendFailed("SET_REPORT: interface released".into()))?;
            let control = Control {
                control_type: ControlType::Class,
                recipient: Recipient::Interface,
                request: HID_SET_REPORT,
                value: HID_REPORT_TYPE_OUTPUT << 8,
                index: self.interface_number as u16,
            };
            interface
                .control_out_blocking(control, report, USB_TIMEOUT)
                .map_err(|e| DeviceError::SendFailed(format!("SET_REPORT: {e}")))?;
            Ok(())
        }

        fn reset(&mut self) -> Result<()> {
            self.interface = None;
            self.device
                .reset()
                .map_err(|e| DeviceError::ResetFailed(format!("port reset: {e}")))?;
            let interface = self
                .device
                .detach_and_claim_interface(self.interface_number)
                .map_err(|e| DeviceError::ResetFailed(format!("reclaim interface: {e}")))?;
            self.interface = Some(interface);
            Ok(())
        }

        fn revert_to_stock(&mut self) -> Result<()> {
            // Releasing the interface and re-enumerating lets usbhid bind again.
            self.interface = None;
            self.device
                .reset()
                .map_err(|e| DeviceError::RevertFailed(format!("port reset: {e}")))
        }
    }

    /// `nusb`-backed USB subsystem.
    pub struct NusbBackend;

    impl NusbBackend {
        /// Verify USB enumeration works before the daemon starts.
        pub fn init() -> Result<Self> {
            nusb::list_devices()
                .map_err(|e| DeviceError::OpenFailed(format!("USB enumeration: {e}")))?;
            Ok(NusbBackend)
        }
    }

    impl UsbBackend for NusbBackend {
        type Device = NusbKeyboard;

        fn scan(&mut self, attached: &[String]) -> Vec<NusbKeyboard> {
            let devices = match nusb::list_devices() {
                Ok(devices) => devices,
                Err(e) => {
                    log::warn!("[usb] enumeration failed: {e}");
                    return Vec::new();
                }
            };

            devices
                .filter(|dev| dev.vendor_id() == CORSAIR_VID)
                .filter(|dev| models::is_supported(dev.product_id()))
                .filter(|dev| {
                    let path = format!("usb:{:03}/{:03}", dev.bus_number(), dev.device_address());
                    let id = dev.serial_number().unwrap_or(&path);
                    !attached.iter().any(|a| a == id)
                })
                .filter_map(|dev| match NusbKeyboard::open(&dev) {
                    Ok(kb) => Some(kb),
                    Err(e) => {
                        log::warn!("[usb] {:04x}: {e}", dev.product_id());
                        None
                    }
                })
                .collect()
        }

        fn deinit(&mut self) {
            log::debug!("[usb] deinit");
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux_impl::{NusbBackend, NusbKeyboard};

// ── Stub backend for unsupported platforms ──

/// Keyboard type that can never be constructed.
#[cfg(not(target_os = "linux"))]
pub enum StubKeyboard {}

#[cfg(not(target_os = "linux"))]
impl KeyboardDevice for StubKeyboard {
    fn info(&self) -> &DeviceInfo {
        match *self {}
    }
    fn send(&mut self, _report: &[u8]) -> Result<()> {
        match *self {}
    }
    fn reset(&mut self) -> Result<()> {
        match *self {}
    }
    fn revert_to_stock(&mut self) -> Result<()> {
        match *self {}
    }
}

/// Backend that never finds a keyboard.
/// Enables compilation and `cargo test` on unsupported hosts.
#[cfg(not(target_os = "linux"))]
pub struct StubBackend;

#[cfg(not(target_os = "linux"))]
impl StubBackend {
    pub fn init() -> Result<Self> {
        Ok(StubBackend)
    }
}

#[cfg(not(target_os = "linux"))]
impl UsbBackend for StubBackend {
    type Device = StubKeyboard;

    fn scan(&mut self, _attached: &[String]) -> Vec<StubKeyboard> {
        Vec::new()
    }

    fn deinit(&mut self) {}
}

/// Concrete USB backend for the current platform.
#[cfg(target_os = "linux")]
pub type PlatformBackend = NusbBackend;
#[cfg(not(target_os = "linux"))]
pub type PlatformBackend = StubBackend;

// ── Mock devices for testing ──

/// In-memory keyboards, backend, command pipe and indicator source for
/// unit and integration tests.
///
/// Always compiled (zero runtime cost), hidden from public docs.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{self, Read};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::indicator::IndicatorSource;
    use crate::protocol::{DEFAULT_LED_COUNT, Indicators};

    /// Everything a [`MockKeyboard`] was asked to do, plus injected failures.
    #[derive(Debug, Default)]
    pub struct MockLog {
        /// Reports accepted by `send`, in order.
        pub sent: Vec<Report>,
        pub send_attempts: u32,
        /// Number of upcoming `send` calls that fail.
        pub fail_sends: u32,
        pub fail_reset: bool,
        pub resets: u32,
        pub fail_revert: bool,
        pub reverted: bool,
        pub input_stopped: bool,
        /// Set when the keyboard handle is dropped (USB handle released).
        pub dropped: bool,
    }

    pub struct MockKeyboard {
        info: DeviceInfo,
        log: Arc<Mutex<MockLog>>,
    }

    impl MockKeyboard {
        pub fn new(serial: &str) -> Self {
            MockKeyboard {
                info: DeviceInfo {
                    path: format!("mock://{serial}"),
                    product_id: 0x1b13,
                    serial: Some(serial.into()),
                    firmware_version: 0x0105,
                    led_count: DEFAULT_LED_COUNT,
                },
                log: Arc::new(Mutex::new(MockLog::default())),
            }
        }

        pub fn with_firmware(mut self, version: u16) -> Self {
            self.info.firmware_version = version;
            self
        }

        pub fn with_led_count(mut self, count: usize) -> Self {
            self.info.led_count = count;
            self
        }

        /// Shared handle to the call log; stays valid after the keyboard moves.
        pub fn log(&self) -> Arc<Mutex<MockLog>> {
            Arc::clone(&self.log)
        }
    }

    impl KeyboardDevice for MockKeyboard {
        fn info(&self) -> &DeviceInfo {
            &self.info
        }

        fn send(&mut self, report: &[u8]) -> Result<()> {
            let mut log = self.log.lock();
            log.send_attempts += 1;
            if log.fail_sends > 0 {
                log.fail_sends -= 1;
                return Err(DeviceError::SendFailed("mock: send failure injected".into()));
            }
            log.sent.push(report.to_vec());
            Ok(())
        }

        fn reset(&mut self) -> Result<()> {
            let mut log = self.log.lock();
            log.resets += 1;
            if log.fail_reset {
                return Err(DeviceError::ResetFailed("mock: reset failure injected".into()));
            }
            Ok(())
        }

        fn revert_to_stock(&mut self) -> Result<()> {
            let mut log = self.log.lock();
            if log.fail_revert {
                return Err(DeviceError::RevertFailed("mock: revert failure injected".into()));
            }
            log.reverted = true;
            Ok(())
        }

        fn stop_input(&mut self) {
            self.log.lock().input_stopped = true;
        }
    }

    impl Drop for MockKeyboard {
        fn drop(&mut self) {
            self.log.lock().dropped = true;
        }
    }

    /// Backend that hands out queued keyboards on the next scan.
    #[derive(Default)]
    pub struct MockBackend {
        pub pending: Vec<MockKeyboard>,
        pub scans: u32,
        pub deinit_calls: u32,
    }

    impl MockBackend {
        pub fn with_keyboards(keyboards: Vec<MockKeyboard>) -> Self {
            MockBackend {
                pending: keyboards,
                ..Default::default()
            }
        }
    }

    impl UsbBackend for MockBackend {
        type Device = MockKeyboard;

        fn scan(&mut self, attached: &[String]) -> Vec<MockKeyboard> {
            self.scans += 1;
            let (skip, take): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
                .into_iter()
                .partition(|kb| attached.iter().any(|id| id == kb.info().id()));
            self.pending = skip;
            take
        }

        fn deinit(&mut self) {
            self.deinit_calls += 1;
        }
    }

    /// Non-blocking byte pipe: reads return `WouldBlock` when empty.
    #[derive(Clone, Default)]
    pub struct MockPipe {
        buf: Arc<Mutex<VecDeque<u8>>>,
    }

    impl MockPipe {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn write(&self, bytes: &[u8]) {
            self.buf.lock().extend(bytes.iter().copied());
        }

        /// Bytes written but not yet read.
        pub fn pending(&self) -> usize {
            self.buf.lock().len()
        }
    }

    impl Read for MockPipe {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            let mut buf = self.buf.lock();
            if buf.is_empty() {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let n = out.len().min(buf.len());
            for (dst, src) in out.iter_mut().zip(buf.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        }
    }

    /// Indicator source whose state tests flip directly.
    #[derive(Clone, Default)]
    pub struct MockIndicators {
        state: Arc<Mutex<Indicators>>,
    }

    impl MockIndicators {
        pub fn set(&self, indicators: Indicators) {
            *self.state.lock() = indicators;
        }
    }

    impl IndicatorSource for MockIndicators {
        fn read(&self) -> Indicators {
            *self.state.lock()
        }
    }
}
