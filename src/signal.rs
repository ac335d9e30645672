//! Cooperative cancellation driven by SIGINT / SIGTERM

use crate::error::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Shared flag checked by the session between files
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the in-flight file still completes
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Install a Ctrl-C / termination handler that cancels the returned token
///
/// Can only be called once per process.
pub fn install_interrupt_handler() -> Result<CancellationToken> {
    let token = CancellationToken::new();
    let handle = token.clone();

    ctrlc::set_handler(move || {
        if !handle.is_cancelled() {
            warn!("Termination signal received, finishing current file");
            eprintln!("\nInterrupt received, saving progress...");
        }
        handle.cancel();
    })?;

    Ok(token)
}
