//! keyglow: device engine for USB RGB keyboards.

pub mod command;
pub mod config;
pub mod daemon;
pub mod device;
pub mod devnode;
pub mod discovery;
pub mod drain;
pub mod effect;
pub mod error;
pub mod indicator;
pub mod instance;
pub mod lighting;
pub mod models;
pub mod protocol;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod shutdown;
pub mod signal;

pub use error::KeyglowError;
