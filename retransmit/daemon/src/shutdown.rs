//! Signal-driven shutdown
//!
//! The coordinator is the only writer of the cancellation channel. The read
//! loop holds a [`ShutdownSignal`] and closes its own handle once the signal
//! fires, so no loop state is touched from the signal listener.

use log::{info, warn};
use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
};
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::watch,
    task::JoinHandle,
};

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Armed,
    Triggered,
}

/// Fires the cancellation signal exactly once
#[derive(Debug)]
pub struct ShutdownCoordinator {
    triggered: AtomicBool,
    tx: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            triggered: AtomicBool::new(false),
            tx,
        }
    }

    /// Get a handle the read loop can wait on
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn state(&self) -> ShutdownState {
        if self.triggered.load(Ordering::Acquire) {
            ShutdownState::Triggered
        } else {
            ShutdownState::Armed
        }
    }

    /// Request shutdown
    ///
    /// Returns `true` for the call that moved the coordinator from `Armed` to
    /// `Triggered`; every later call is a no-op returning `false`.
    pub fn trigger(&self) -> bool {
        if self.triggered.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.tx.send_replace(true);
        true
    }

    /// Spawn a task that triggers shutdown on SIGINT or SIGTERM
    ///
    /// The task keeps listening after the first signal so repeated signals
    /// are logged instead of falling through to the default handler.
    pub fn spawn_signal_listener(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let coordinator = Arc::clone(self);

        Ok(tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    received = sigint.recv() => match received {
                        Some(()) => "SIGINT",
                        None => return,
                    },
                    received = sigterm.recv() => match received {
                        Some(()) => "SIGTERM",
                        None => return,
                    },
                };

                if coordinator.trigger() {
                    info!("Received {}, shutting down...", name);
                } else {
                    warn!("Received {} while already shutting down, ignoring", name);
                }
            }
        }))
    }

    /// Spawn a task that triggers shutdown after `duration`
    pub fn spawn_deadline(self: &Arc<Self>, duration: std::time::Duration) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if coordinator.trigger() {
                info!("Duration reached, shutting down...");
            }
        })
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the cancellation channel
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Whether shutdown has been requested
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested
    ///
    /// A dropped coordinator counts as a request, so an orphaned loop stops.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}
