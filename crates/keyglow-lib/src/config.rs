//! Daemon configuration: TOML file, command-line overrides, layout selection.
//!
//! Layers, lowest first: built-in defaults, the optional config file,
//! command-line flags.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::ScanConfig;
use crate::protocol::{DEFAULT_FPS, Features, MAX_LAYOUT_LEN, SHUTDOWN_LOCK_TIMEOUT};

// ── Layout ──

/// System keyboard layout used for key names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    De,
    Es,
    Fr,
    Se,
    Us,
    Gb,
}

impl Layout {
    /// Parse a layout code. Only the first [`MAX_LAYOUT_LEN`] characters count.
    pub fn from_code(code: &str) -> Option<Layout> {
        let code: String = code.chars().take(MAX_LAYOUT_LEN).collect();
        match code.to_ascii_lowercase().as_str() {
            "de" => Some(Layout::De),
            "es" => Some(Layout::Es),
            "fr" => Some(Layout::Fr),
            "se" => Some(Layout::Se),
            "us" => Some(Layout::Us),
            "gb" | "uk" => Some(Layout::Gb),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Layout::De => "de",
            Layout::Es => "es",
            Layout::Fr => "fr",
            Layout::Se => "se",
            Layout::Us => "us",
            Layout::Gb => "gb",
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Lowercase and turn `_` into `-`: `en_US.UTF-8` → `en-us.utf-8`.
pub fn locale_case(locale: &str) -> String {
    locale
        .chars()
        .map(|c| if c == '_' { '-' } else { c.to_ascii_lowercase() })
        .collect()
}

/// Regions whose keyboards use the US layout.
const US_LOCALES: [&str; 9] = [
    "en-us", "en-au", "en-ca", "en-hk", "en-in", "en-nz", "en-ph", "en-sg", "en-za",
];

/// Pick a layout from a locale string. Anything unrecognised is GB.
pub fn layout_from_locale(locale: &str) -> Layout {
    let locale = locale_case(locale);
    if locale.contains("de-") {
        Layout::De
    } else if locale.contains("es-") {
        Layout::Es
    } else if locale.contains("fr-") {
        Layout::Fr
    } else if locale.contains("sv-") {
        Layout::Se
    } else if US_LOCALES.iter().any(|l| locale.contains(l)) {
        Layout::Us
    } else {
        Layout::Gb
    }
}

/// The process's `LC_CTYPE` locale: `LC_ALL`, then `LC_CTYPE`, then `LANG`.
pub fn system_locale() -> String {
    ["LC_ALL", "LC_CTYPE", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| "C".to_string())
}

// ── Config file ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Lighting frames per second. Default: 30.
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Layout code (`de`, `es`, `fr`, `se`, `us`, `gb`). Unset = from locale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,

    /// Group owning the device nodes. Unset = leave as created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,

    /// Allow key rebinding. Turning this off also disables notifications.
    #[serde(default = "default_true")]
    pub bind: bool,

    /// Send key press notifications.
    #[serde(default = "default_true")]
    pub notify: bool,

    /// Run without root privileges.
    #[serde(default)]
    pub allow_nonroot: bool,

    /// Device node prefix; slot N lives at `<devpath>N`.
    #[serde(default = "default_devpath")]
    pub devpath: String,

    /// Per-lock wait during shutdown. 0 = wait indefinitely.
    #[serde(default = "default_shutdown_lock_timeout_ms")]
    pub shutdown_lock_timeout_ms: u64,

    /// First delay between USB scans when no keyboard turns up.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
}

fn default_fps() -> u32 {
    DEFAULT_FPS
}
fn default_true() -> bool {
    true
}
fn default_devpath() -> String {
    "/dev/input/keyglow".into()
}
fn default_shutdown_lock_timeout_ms() -> u64 {
    SHUTDOWN_LOCK_TIMEOUT.as_millis() as u64
}
fn default_scan_interval_ms() -> u64 {
    1000
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            fps: default_fps(),
            layout: None,
            gid: None,
            bind: true,
            notify: true,
            allow_nonroot: false,
            devpath: default_devpath(),
            shutdown_lock_timeout_ms: default_shutdown_lock_timeout_ms(),
            scan_interval_ms: default_scan_interval_ms(),
        }
    }
}

/// Command-line values that override the file. `None`/`false` = not given.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub fps: Option<u32>,
    pub layout: Option<String>,
    pub gid: Option<u32>,
    pub nobind: bool,
    pub nonotify: bool,
    pub nonroot: bool,
    pub devpath: Option<String>,
}

/// Problems found by [`DaemonConfig::validate`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    ZeroFps,
    UnknownLayout(String),
    EmptyDevpath,
    ZeroScanInterval,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ZeroFps => write!(f, "fps must be at least 1"),
            ValidationError::UnknownLayout(l) => write!(f, "Unknown layout: {l}"),
            ValidationError::EmptyDevpath => write!(f, "devpath cannot be empty"),
            ValidationError::ZeroScanInterval => write!(f, "scan_interval_ms must be at least 1"),
        }
    }
}

impl DaemonConfig {
    /// Platform config directory.
    pub fn dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("keyglow"))
    }

    /// Default config file location.
    pub fn path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("config.toml"))
    }

    /// Load from `path`, returning the config and any parse warnings.
    ///
    /// Returns `(defaults, [])` if the file doesn't exist.
    /// Returns `(defaults, [warning])` if the file exists but can't be parsed.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, vec![]),
                Err(e) => {
                    let warning = format!(
                        "config parse error ({}), using defaults: {e}",
                        path.display()
                    );
                    (Self::default(), vec![warning])
                }
            },
            Err(_) => (Self::default(), vec![]),
        }
    }

    /// Load from the default path, returning the config and any parse warnings.
    pub fn load_with_warnings() -> (Self, Vec<String>) {
        let Some(path) = Self::path() else {
            return (Self::default(), vec![]);
        };
        Self::load_from(&path)
    }

    /// Serialized form, as it would appear in a config file.
    pub fn to_toml(&self) -> crate::error::Result<String> {
        toml::to_string_pretty(self).map_err(|e| crate::KeyglowError::Config(e.to_string()))
    }

    /// Layer command-line flags on top of the file values.
    pub fn apply_overrides(&mut self, cli: &CliOverrides) {
        if let Some(fps) = cli.fps {
            self.fps = fps;
        }
        if let Some(layout) = &cli.layout {
            self.layout = Some(layout.clone());
        }
        if cli.gid.is_some() {
            self.gid = cli.gid;
        }
        if cli.nobind {
            self.bind = false;
        }
        if cli.nonotify {
            self.notify = false;
        }
        if cli.nonroot {
            self.allow_nonroot = true;
        }
        if let Some(devpath) = &cli.devpath {
            self.devpath = devpath.clone();
        }
    }

    /// Features any device may have. No binding means no notifications either.
    pub fn feature_mask(&self) -> Features {
        let mut mask = Features::all();
        if !self.bind {
            mask.remove(Features::BIND | Features::NOTIFY);
        }
        if !self.notify {
            mask.remove(Features::NOTIFY);
        }
        mask
    }

    /// The configured layout, if set and valid.
    pub fn layout(&self) -> Option<Layout> {
        self.layout.as_deref().and_then(Layout::from_code)
    }

    pub fn shutdown_lock_timeout(&self) -> Option<Duration> {
        (self.shutdown_lock_timeout_ms > 0)
            .then(|| Duration::from_millis(self.shutdown_lock_timeout_ms))
    }

    pub fn scan_config(&self) -> ScanConfig {
        let initial = Duration::from_millis(self.scan_interval_ms.max(1));
        let defaults = ScanConfig::default();
        ScanConfig {
            initial_interval: initial,
            max_interval: defaults.max_interval.max(initial),
            multiplier: defaults.multiplier,
        }
    }

    /// Validate the whole config, collecting all errors.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.fps == 0 {
            errors.push(ValidationError::ZeroFps);
        }
        if let Some(code) = &self.layout
            && Layout::from_code(code).is_none()
        {
            errors.push(ValidationError::UnknownLayout(code.clone()));
        }
        if self.devpath.trim().is_empty() {
            errors.push(ValidationError::EmptyDevpath);
        }
        if self.scan_interval_ms == 0 {
            errors.push(ValidationError::ZeroScanInterval);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
