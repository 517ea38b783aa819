//! Termination signal sources
//!
//! The bridge reacts to termination requests by asking the server to exit;
//! stream closures then unwind the forwarding tasks. The source is a trait
//! so tests can deliver requests without touching process signals.

use async_trait::async_trait;
use std::io;
use tokio::sync::mpsc;

/// A request for the bridge to shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// SIGINT / Ctrl-C
    Interrupt,
    /// SIGTERM
    Terminate,
}

/// Source of termination requests
#[async_trait]
pub trait TerminationSource: Send {
    /// Wait for the next request; `None` once no more can arrive
    async fn next_signal(&mut self) -> Option<TerminationSignal>;
}

/// Process-level SIGINT and SIGTERM
pub struct OsSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl OsSignals {
    /// Install the handlers; must run before the server is spawned
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> io::Result<Self> {
        Ok(Self {})
    }
}

#[async_trait]
impl TerminationSource for OsSignals {
    #[cfg(unix)]
    async fn next_signal(&mut self) -> Option<TerminationSignal> {
        tokio::select! {
            received = self.interrupt.recv() => received.map(|_| TerminationSignal::Interrupt),
            received = self.terminate.recv() => received.map(|_| TerminationSignal::Terminate),
        }
    }

    #[cfg(not(unix))]
    async fn next_signal(&mut self) -> Option<TerminationSignal> {
        tokio::signal::ctrl_c()
            .await
            .ok()
            .map(|_| TerminationSignal::Interrupt)
    }
}

#[async_trait]
impl TerminationSource for mpsc::UnboundedReceiver<TerminationSignal> {
    async fn next_signal(&mut self) -> Option<TerminationSignal> {
        self.recv().await
    }
}
