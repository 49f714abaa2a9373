//! Unified error type for the keyglow-lib crate.
//!
//! [`KeyglowError`] wraps module-specific errors (`DeviceError`,
//! `CommandError`, `EffectError`) and the string-valued kinds (`Config`,
//! `Color`, `Scheduler`). `From` impls let `?` cross module boundaries.

use std::fmt;

use crate::command::CommandError;
use crate::device::DeviceError;
use crate::effect::EffectError;

/// Unified error type for keyglow-lib operations.
#[derive(Debug)]
pub enum KeyglowError {
    /// USB transport error (open, send, reset, revert).
    Device(DeviceError),
    /// Command line could not be parsed or applied.
    Command(CommandError),
    /// Lighting effect parameter or gradient error.
    Effect(EffectError),
    /// Standard I/O error (device nodes, PID file, config file).
    Io(std::io::Error),
    /// Configuration validation error.
    Config(String),
    /// Color parsing error.
    Color(String),
    /// Frame scheduler used outside its lifecycle.
    Scheduler(String),
}

impl fmt::Display for KeyglowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyglowError::Device(e) => write!(f, "{e}"),
            KeyglowError::Command(e) => write!(f, "{e}"),
            KeyglowError::Effect(e) => write!(f, "{e}"),
            KeyglowError::Io(e) => write!(f, "I/O error: {e}"),
            KeyglowError::Config(e) => write!(f, "Config error: {e}"),
            KeyglowError::Color(e) => write!(f, "Color error: {e}"),
            KeyglowError::Scheduler(e) => write!(f, "Scheduler error: {e}"),
        }
    }
}

impl std::error::Error for KeyglowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KeyglowError::Device(e) => Some(e),
            KeyglowError::Command(e) => Some(e),
            KeyglowError::Effect(e) => Some(e),
            KeyglowError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DeviceError> for KeyglowError {
    fn from(e: DeviceError) -> Self {
        KeyglowError::Device(e)
    }
}

impl From<CommandError> for KeyglowError {
    fn from(e: CommandError) -> Self {
        KeyglowError::Command(e)
    }
}

impl From<EffectError> for KeyglowError {
    fn from(e: EffectError) -> Self {
        KeyglowError::Effect(e)
    }
}

impl From<std::io::Error> for KeyglowError {
    fn from(e: std::io::Error) -> Self {
        KeyglowError::Io(e)
    }
}

/// Crate-level Result alias using [`KeyglowError`].
pub type Result<T> = std::result::Result<T, KeyglowError>;
