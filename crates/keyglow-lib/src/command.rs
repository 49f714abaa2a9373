//! Command intake: line-oriented commands read from each device's channel.
//!
//! Bytes arrive on a non-blocking source and are split into `\n`-terminated
//! lines by [`LineBuffer`]. Every line is parsed into a [`Command`] and
//! checked against the device state before anything is mutated, so a bad
//! line never leaves a device half-updated.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::config::Layout;
use crate::lighting::{self, Rgb};
use crate::protocol::{Features, MAX_INTAKE_BYTES, MAX_LAYOUT_LEN};
use crate::registry::DeviceState;
use crate::signal::ShutdownRequest;

// ── Error type ──

/// Reasons a command line is rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandError {
    /// First word is not a known command.
    Unknown(String),
    /// Command needs an argument that was not given.
    MissingArgument(&'static str),
    InvalidColor(String),
    /// Key name is not in the keymap.
    UnknownKey(String),
    /// Key index is past the device's LED count.
    KeyOutOfRange(usize),
    InvalidLayout(String),
    /// Command needs a feature this device does not have.
    Unsupported(&'static str),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Unknown(w) => write!(f, "Unknown command: {w}"),
            CommandError::MissingArgument(cmd) => write!(f, "Missing argument for {cmd}"),
            CommandError::InvalidColor(c) => write!(f, "Invalid color: {c}"),
            CommandError::UnknownKey(k) => write!(f, "Unknown key: {k}"),
            CommandError::KeyOutOfRange(i) => write!(f, "Key index out of range: {i}"),
            CommandError::InvalidLayout(l) => write!(f, "Invalid layout: {l}"),
            CommandError::Unsupported(cmd) => write!(f, "{cmd} is not supported by this device"),
        }
    }
}

impl std::error::Error for CommandError {}

// ── Line splitting ──

/// Accumulates raw bytes and yields complete lines.
///
/// An unterminated tail stays buffered until its newline arrives. After
/// [`LineBuffer::discard_line`] everything up to and including the next
/// newline is dropped, so no fragment of an oversized line is ever yielded.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        let mut bytes = bytes;
        if self.discarding {
            let Some(end) = bytes.iter().position(|&b| b == b'\n') else {
                return;
            };
            self.discarding = false;
            bytes = &bytes[end + 1..];
        }
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete line without its terminator (`\n` or `\r\n`).
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Bytes held back waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the rest of an oversized line is still being skipped.
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// Drop the unterminated tail and the rest of its line, through the
    /// next newline.
    pub fn discard_line(&mut self) {
        self.pending.clear();
        self.discarding = true;
    }
}

// ── Channel ──

/// Inbound command source of one device.
pub struct CommandChannel {
    source: Box<dyn Read + Send>,
    buffer: LineBuffer,
    path: Option<PathBuf>,
}

impl CommandChannel {
    /// Wrap a source whose reads return `WouldBlock` instead of blocking.
    pub fn new(source: Box<dyn Read + Send>) -> Self {
        CommandChannel {
            source,
            buffer: LineBuffer::new(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    /// Filesystem location of the channel, if it has one.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read whatever is available now and return the complete lines.
    ///
    /// Stops at `WouldBlock`, end of stream, or after [`MAX_INTAKE_BYTES`].
    pub fn poll_lines(&mut self) -> Vec<String> {
        let mut chunk = [0u8; 1024];
        let mut total = 0;
        while total < MAX_INTAKE_BYTES {
            match self.source.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    self.buffer.push(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("[cmd] read failed: {e}");
                    break;
                }
            }
        }

        let mut lines = Vec::new();
        while let Some(line) = self.buffer.next_line() {
            lines.push(line);
        }
        if self.buffer.pending_len() > MAX_INTAKE_BYTES {
            log::warn!(
                "[cmd] discarding {} bytes without a line terminator",
                self.buffer.pending_len()
            );
            self.buffer.discard_line();
        }
        lines
    }
}

impl fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandChannel")
            .field("path", &self.path)
            .field("pending", &self.buffer.pending_len())
            .finish()
    }
}

// ── Commands ──

/// One lighting change inside an `rgb` command.
#[derive(Debug, Clone, PartialEq)]
pub enum LightOp {
    Fill(Rgb),
    Keys(Vec<usize>, Rgb),
}

/// A fully parsed command, not yet applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `rgb on` / `rgb off`
    RgbEnable(bool),
    /// `rgb <color>` and `rgb <keys>:<color>`, applied left to right.
    Rgb(Vec<LightOp>),
    Notify(bool),
    Bind(bool),
    Layout(Layout),
}

impl Command {
    /// Validate against `state`, then mutate it. On `Err` nothing changed.
    ///
    /// Feature toggles outside `mask` are accepted and ignored.
    pub fn apply(&self, state: &mut DeviceState, mask: Features) -> Result<(), CommandError> {
        match self {
            Command::RgbEnable(on) => {
                require_rgb(state)?;
                state.lighting.set_enabled(*on);
            }
            Command::Rgb(ops) => {
                require_rgb(state)?;
                let count = state.lighting.led_count();
                for op in ops {
                    if let LightOp::Keys(keys, _) = op
                        && let Some(&bad) = keys.iter().find(|&&k| k >= count)
                    {
                        return Err(CommandError::KeyOutOfRange(bad));
                    }
                }
                for op in ops {
                    match op {
                        LightOp::Fill(color) => state.lighting.fill(*color),
                        LightOp::Keys(keys, color) => {
                            for &k in keys {
                                state.lighting.set(k, *color);
                            }
                        }
                    }
                }
            }
            Command::Notify(on) => toggle(state, Features::NOTIFY, *on, mask),
            Command::Bind(on) => toggle(state, Features::BIND, *on, mask),
            Command::Layout(layout) => state.layout = Some(*layout),
        }
        Ok(())
    }
}

fn require_rgb(state: &DeviceState) -> Result<(), CommandError> {
    if state.features.contains(Features::RGB) {
        Ok(())
    } else {
        Err(CommandError::Unsupported("rgb"))
    }
}

fn toggle(state: &mut DeviceState, flag: Features, on: bool, mask: Features) {
    if !mask.contains(flag) {
        log::debug!("[cmd] {flag:?} is disabled, ignoring");
        return;
    }
    state.features.set(flag, on);
}

// ── Grammar ──

/// Parser for one command line. Swappable per daemon.
pub trait CommandSet: Send {
    /// `Ok(None)` for lines that carry no command (blank, comment).
    fn parse(&self, line: &str) -> Result<Option<Command>, CommandError>;
}

/// Word-based grammar: `rgb`, `notifyon`/`notifyoff`, `bindon`/`bindoff`,
/// `layout`. Keys are keymap names or `#<index>`.
#[derive(Debug, Default, Clone)]
pub struct StandardCommands {
    keymap: HashMap<String, usize>,
}

impl StandardCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve key names through `keymap` (name → LED index).
    pub fn with_keymap(keymap: HashMap<String, usize>) -> Self {
        StandardCommands { keymap }
    }

    fn key(&self, name: &str) -> Result<usize, CommandError> {
        if let Some(index) = name.strip_prefix('#') {
            return index
                .parse()
                .map_err(|_| CommandError::UnknownKey(name.to_string()));
        }
        self.keymap
            .get(name)
            .copied()
            .ok_or_else(|| CommandError::UnknownKey(name.to_string()))
    }

    fn light_op(&self, arg: &str) -> Result<LightOp, CommandError> {
        let color = |s: &str| {
            lighting::parse_color(s).map_err(|_| CommandError::InvalidColor(s.to_string()))
        };
        match arg.split_once(':') {
            None => Ok(LightOp::Fill(color(arg)?)),
            Some((keys, c)) => {
                let keys = keys
                    .split(',')
                    .filter(|k| !k.is_empty())
                    .map(|k| self.key(k))
                    .collect::<Result<Vec<_>, _>>()?;
                if keys.is_empty() {
                    return Err(CommandError::MissingArgument("rgb"));
                }
                Ok(LightOp::Keys(keys, color(c)?))
            }
        }
    }
}

impl CommandSet for StandardCommands {
    fn parse(&self, line: &str) -> Result<Option<Command>, CommandError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let cmd = match word {
            "rgb" => match args.as_slice() {
                [] => return Err(CommandError::MissingArgument("rgb")),
                ["on"] => Command::RgbEnable(true),
                ["off"] => Command::RgbEnable(false),
                _ => Command::Rgb(
                    args.iter()
                        .map(|a| self.light_op(a))
                        .collect::<Result<_, _>>()?,
                ),
            },
            "notifyon" => Command::Notify(true),
            "notifyoff" => Command::Notify(false),
            "bindon" => Command::Bind(true),
            "bindoff" => Command::Bind(false),
            "layout" => {
                let code = args.first().ok_or(CommandError::MissingArgument("layout"))?;
                if code.len() > MAX_LAYOUT_LEN {
                    return Err(CommandError::InvalidLayout(code.to_string()));
                }
                Command::Layout(
                    Layout::from_code(code)
                        .ok_or_else(|| CommandError::InvalidLayout(code.to_string()))?,
                )
            }
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(cmd))
    }
}

// ── Intake ──

/// What one intake pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IntakeSummary {
    pub applied: usize,
    pub rejected: usize,
}

/// Apply every complete line waiting on `channel`, in arrival order.
///
/// Once `shutdown` is requested nothing more is applied: the channel is not
/// read, and lines already read are dropped. The request is checked again
/// before every line, so a signal arriving mid-pass stops the rest.
pub fn intake(
    channel: &mut CommandChannel,
    state: &mut DeviceState,
    commands: &dyn CommandSet,
    mask: Features,
    shutdown: &ShutdownRequest,
) -> IntakeSummary {
    let mut summary = IntakeSummary::default();
    if shutdown.is_requested() {
        return summary;
    }
    for line in channel.poll_lines() {
        let parsed = commands.parse(&line);
        if shutdown.is_requested() {
            log::debug!("[cmd] shutting down, dropping {line:?}");
            break;
        }
        match parsed.and_then(|cmd| cmd.map(|c| c.apply(state, mask)).transpose()) {
            Ok(Some(())) => summary.applied += 1,
            Ok(None) => {}
            Err(e) => {
                log::warn!("[cmd] rejected {line:?}: {e}");
                summary.rejected += 1;
            }
        }
    }
    summary
}
