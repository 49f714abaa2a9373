//! Termination signal handling.
//!
//! The dispatcher only flips a shared state from `Armed` to `ShuttingDown`;
//! the tick loop sees the request at its next safe point and runs the
//! shutdown sequence on the main thread. Signals after the first are logged
//! and ignored.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

const ARMED: u8 = 0;
const SHUTTING_DOWN: u8 = 1;

/// What happened to a delivered signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// First signal: shutdown requested.
    Shutdown,
    /// Shutdown already under way.
    Ignored,
}

/// Called from the signal-handling thread.
#[derive(Debug, Clone, Default)]
pub struct SignalDispatcher {
    state: Arc<AtomicU8>,
}

impl SignalDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the flag the tick loop polls.
    pub fn request(&self) -> ShutdownRequest {
        ShutdownRequest {
            state: Arc::clone(&self.state),
        }
    }

    pub fn on_signal(&self) -> SignalOutcome {
        match self
            .state
            .compare_exchange(ARMED, SHUTTING_DOWN, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                log::info!("[signal] caught termination signal, shutting down");
                SignalOutcome::Shutdown
            }
            Err(_) => {
                log::info!("[signal] ignoring signal, already shutting down");
                SignalOutcome::Ignored
            }
        }
    }
}

/// Read side of the shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownRequest {
    state: Arc<AtomicU8>,
}

impl ShutdownRequest {
    /// A request nothing will ever trigger (tests, embedding).
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_requested(&self) -> bool {
        self.state.load(Ordering::SeqCst) == SHUTTING_DOWN
    }
}
