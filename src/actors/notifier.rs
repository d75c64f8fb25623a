//! NotifierActor - hands status transitions to alert collaborators
//!
//! Subscribes to the engine's transition broadcast and calls every registered
//! [`TransitionListener`] in order. A slow listener only delays the notifier,
//! never the probes; if it falls too far behind, the oldest events are
//! skipped and the skip is logged.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::evaluator::Status;

use super::messages::{NotifierCommand, TransitionEvent};

/// Callback for status transitions
#[async_trait]
pub trait TransitionListener: Send + Sync {
    async fn on_transition(&self, event: &TransitionEvent);
}

/// Writes every transition to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogListener;

#[async_trait]
impl TransitionListener for LogListener {
    async fn on_transition(&self, event: &TransitionEvent) {
        let name = event.target.display_name();
        match event.new_status {
            Status::Down | Status::Warning => warn!(
                "{name} ({}) is {} (was {}) since {}",
                event.target.address, event.new_status, event.old_status, event.timestamp
            ),
            _ => info!(
                "{name} ({}) is {} (was {}) since {}",
                event.target.address, event.new_status, event.old_status, event.timestamp
            ),
        }
    }
}

pub struct NotifierActor {
    listeners: Vec<Arc<dyn TransitionListener>>,
    event_rx: broadcast::Receiver<TransitionEvent>,
    command_rx: mpsc::Receiver<NotifierCommand>,
}

impl NotifierActor {
    pub fn new(
        listeners: Vec<Arc<dyn TransitionListener>>,
        event_rx: broadcast::Receiver<TransitionEvent>,
        command_rx: mpsc::Receiver<NotifierCommand>,
    ) -> Self {
        Self {
            listeners,
            event_rx,
            command_rx,
        }
    }

    async fn dispatch(&self, event: &TransitionEvent) {
        for listener in &self.listeners {
            listener.on_transition(event).await;
        }
    }

    #[instrument(skip(self), fields(listeners = self.listeners.len()))]
    pub async fn run(mut self) {
        debug!("starting notifier actor");

        loop {
            tokio::select! {
                result = self.event_rx.recv() => {
                    match result {
                        Ok(event) => self.dispatch(&event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("notifier lagged, skipped {skipped} transitions");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("transition channel closed, shutting down");
                            break;
                        }
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        NotifierCommand::Shutdown => {
                            debug!("received shutdown command");
                            // deliver what is already queued
                            while let Ok(event) = self.event_rx.try_recv() {
                                self.dispatch(&event).await;
                            }
                            break;
                        }
                    }
                }
            }
        }

        debug!("notifier actor stopped");
    }
}

/// Handle for controlling a NotifierActor
pub struct NotifierHandle {
    sender: mpsc::Sender<NotifierCommand>,
    task: JoinHandle<()>,
}

impl NotifierHandle {
    pub fn spawn(
        event_rx: broadcast::Receiver<TransitionEvent>,
        listeners: Vec<Arc<dyn TransitionListener>>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let actor = NotifierActor::new(listeners, event_rx, cmd_rx);
        let task = tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            task,
        }
    }

    pub async fn shutdown(self) -> Result<()> {
        self.sender
            .send(NotifierCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        self.task.await.context("notifier task failed")?;
        Ok(())
    }
}
