//! # Token Reclamation
//!
//! Periodic background deletion of expired credentials. Storage hygiene
//! only: [`TokenEngine::validate`] filters on expiry by itself.
//!
//! The loop stops when [`ReclaimerHandle::stop`] is called or when the handle
//! is dropped.

use crate::engine::TokenEngine;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Spawn the reclamation loop. Call this once at startup.
pub fn spawn(engine: TokenEngine, every: Duration) -> ReclaimerHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = every.as_secs_f64(), "token reclamation started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = engine.sweep_expired().await {
                        warn!("token sweep failed, retrying next tick: {}", e);
                    }
                }
                changed = shutdown_rx.changed() => {
                    // Err: the handle was dropped without stop().
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("token reclamation stopped");
    });

    ReclaimerHandle {
        shutdown: shutdown_tx,
        task,
    }
}

/// Owner of a running reclamation loop
pub struct ReclaimerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReclaimerHandle {
    /// Signal the loop and wait for it to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("token reclamation task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
