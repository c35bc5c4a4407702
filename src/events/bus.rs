//! EventBus: realtime publish to users and rooms, plus the push outbox.
//!
//! Publishes are fire-and-forget and must happen after the state change
//! they describe. Small recipient groups are delivered inline; larger
//! groups are chunked through a bounded worker so no caller ever does
//! recipient-count-proportional work on its own request path.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::core_types::UserId;

use super::connection::ConnectionManager;
use super::messages::Event;
use super::push::{PushNotification, PushOutbox};

const FANOUT_QUEUE_DEPTH: usize = 1024;
const FANOUT_CHUNK: usize = 256;

pub struct FanoutJob {
    pub recipients: Vec<UserId>,
    pub event: Event,
}

pub struct EventBus {
    manager: Arc<ConnectionManager>,
    outbox: Arc<PushOutbox>,
    fanout_tx: mpsc::Sender<FanoutJob>,
    inline_threshold: usize,
}

impl EventBus {
    /// Build the bus and its fan-out worker. The caller spawns
    /// `FanoutWorker::run` on the runtime.
    pub fn new(
        manager: Arc<ConnectionManager>,
        outbox: Arc<PushOutbox>,
        inline_threshold: usize,
    ) -> (Self, FanoutWorker) {
        let (fanout_tx, fanout_rx) = mpsc::channel(FANOUT_QUEUE_DEPTH);
        let bus = Self {
            manager: manager.clone(),
            outbox,
            fanout_tx,
            inline_threshold,
        };
        let worker = FanoutWorker {
            rx: fanout_rx,
            manager,
        };
        (bus, worker)
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn outbox(&self) -> &Arc<PushOutbox> {
        &self.outbox
    }

    pub fn publish_user(&self, user_id: UserId, event: Event) {
        tracing::debug!(user_id, event = event.name(), "publish");
        self.manager.send_to_user(user_id, event);
    }

    pub fn publish_room(&self, room: &str, event: Event) {
        tracing::debug!(room, event = event.name(), "publish");
        self.manager.send_to_room(room, event);
    }

    /// Deliver one event to many users. Inline below the threshold,
    /// otherwise handed to the worker. If the worker queue is full the
    /// batch degrades to inline delivery rather than getting lost.
    pub fn fan_out(&self, recipients: &[UserId], event: Event) {
        if recipients.len() < self.inline_threshold {
            for user_id in recipients {
                self.manager.send_to_user(*user_id, event.clone());
            }
            return;
        }
        let job = FanoutJob {
            recipients: recipients.to_vec(),
            event,
        };
        if let Err(mpsc::error::TrySendError::Full(job)) = self.fanout_tx.try_send(job) {
            tracing::warn!(
                recipients = job.recipients.len(),
                "fanout queue full, delivering inline"
            );
            for user_id in &job.recipients {
                self.manager.send_to_user(*user_id, job.event.clone());
            }
        }
    }

    /// Enqueue a push notification for the recipients (at-least-once).
    pub fn push(&self, recipients: &[UserId], notification: PushNotification) {
        self.outbox.enqueue(recipients, notification);
    }
}

pub struct FanoutWorker {
    rx: mpsc::Receiver<FanoutJob>,
    manager: Arc<ConnectionManager>,
}

impl FanoutWorker {
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("fanout worker started");
        loop {
            tokio::select! {
                job = self.rx.recv() => {
                    match job {
                        Some(job) => self.deliver(job).await,
                        None => return,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        // Flush whatever is already queued, then stop.
                        while let Ok(job) = self.rx.try_recv() {
                            self.deliver(job).await;
                        }
                        tracing::info!("fanout worker stopped");
                        return;
                    }
                }
            }
        }
    }

    async fn deliver(&self, job: FanoutJob) {
        for chunk in job.recipients.chunks(FANOUT_CHUNK) {
            for user_id in chunk {
                self.manager.send_to_user(*user_id, job.event.clone());
            }
            // Let other tasks breathe between chunks of a huge audience.
            tokio::task::yield_now().await;
        }
    }
}
