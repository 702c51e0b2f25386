//! Signal-driven cancellation.
//!
//! Signals never abort a running task. The handler only sets a flag that the
//! orchestrator checks between tasks, after the last checkpoint write.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::EXIT_INTERRUPTED;

#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    flag: Arc<AtomicBool>,
}

impl InterruptFlag {
    /// A flag no signal will ever set. Used by tests and read-only commands.
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for SIGINT and SIGTERM on the current tokio runtime.
    ///
    /// The first signal sets the flag. A second one runs `before_exit` and
    /// exits immediately with the interrupted exit code; every completed task
    /// is already on disk, so `before_exit` only has to mark the run as
    /// interrupted.
    pub fn install<F>(before_exit: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let flag = Self::new();
        let handle = flag.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            handle.trigger();
            eprintln!("\nInterrupt received; stopping after the current task (press again to exit now)");
            wait_for_signal().await;
            before_exit();
            std::process::exit(EXIT_INTERRUPTED);
        });
        flag
    }

    pub fn trigger(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            tracing::warn!("Interrupt requested");
        }
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Could not install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
