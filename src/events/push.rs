//! Push-notification outbox.
//!
//! Appends are cheap and never fail a state transition; a retry worker
//! drains the queue with exponential backoff and per-token dedup. Delivery
//! is at-least-once: a ticket is dropped only after the retry schedule is
//! exhausted.

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use crossbeam_queue::ArrayQueue;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;

use crate::config::FcmConfig;
use crate::core_types::UserId;

/// Retry delays per attempt; a jitter of up to 250ms is added on top.
static BACKOFF: Lazy<Vec<Duration>> = Lazy::new(|| {
    vec![
        Duration::from_secs(1),
        Duration::from_secs(2),
        Duration::from_secs(4),
        Duration::from_secs(8),
        Duration::from_secs(16),
    ]
});

const DEDUP_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

impl PushNotification {
    /// Stable fingerprint for per-token dedup.
    fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.title.hash(&mut hasher);
        self.body.hash(&mut hasher);
        self.data.to_string().hash(&mut hasher);
        hasher.finish()
    }
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, token: &str, notification: &PushNotification) -> Result<(), String>;
}

/// FCM legacy HTTP sender.
pub struct FcmSender {
    client: reqwest::Client,
    endpoint: String,
    server_key: String,
}

impl FcmSender {
    pub fn new(config: &FcmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            server_key: config.server_key.clone(),
        }
    }
}

#[async_trait]
impl PushSender for FcmSender {
    async fn send(&self, token: &str, notification: &PushNotification) -> Result<(), String> {
        let payload = serde_json::json!({
            "to": token,
            "notification": {
                "title": notification.title,
                "body": notification.body,
            },
            "data": notification.data,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("key={}", self.server_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("fcm returned {}", response.status()))
        }
    }
}

/// Logs instead of sending. Used when no FCM config is present and in tests.
pub struct NoopSender;

#[async_trait]
impl PushSender for NoopSender {
    async fn send(&self, token: &str, notification: &PushNotification) -> Result<(), String> {
        tracing::debug!(token, title = %notification.title, "push (noop)");
        Ok(())
    }
}

struct PushTicket {
    token: String,
    notification: Arc<PushNotification>,
    attempt: usize,
    due_at: Instant,
}

pub struct PushOutbox {
    queue: ArrayQueue<PushTicket>,
    /// user -> registered device tokens.
    tokens: DashMap<UserId, HashSet<String>>,
    /// (token, fingerprint) -> last delivery, for the dedup window.
    recently_sent: DashMap<(String, u64), Instant>,
}

impl PushOutbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            tokens: DashMap::new(),
            recently_sent: DashMap::new(),
        }
    }

    pub fn register_token(&self, user_id: UserId, token: impl Into<String>) {
        self.tokens.entry(user_id).or_default().insert(token.into());
    }

    pub fn remove_token(&self, user_id: UserId, token: &str) {
        if let Some(mut tokens) = self.tokens.get_mut(&user_id) {
            tokens.remove(token);
        }
    }

    /// Fan a notification out to every registered token of the recipients.
    /// Queue overflow drops the oldest-pressure tickets with a warning
    /// rather than blocking the caller.
    pub fn enqueue(&self, recipients: &[UserId], notification: PushNotification) {
        let notification = Arc::new(notification);
        let now = Instant::now();
        for user_id in recipients {
            let Some(tokens) = self.tokens.get(user_id) else {
                continue;
            };
            for token in tokens.iter() {
                let ticket = PushTicket {
                    token: token.clone(),
                    notification: notification.clone(),
                    attempt: 0,
                    due_at: now,
                };
                if self.queue.push(ticket).is_err() {
                    tracing::warn!(user_id, "push outbox full, dropping ticket");
                }
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Retry worker. Runs until the shutdown flag flips, then drains once.
    pub async fn run_worker(
        self: Arc<Self>,
        sender: Arc<dyn PushSender>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tick = tokio::time::interval(Duration::from_millis(100));
        tracing::info!("push outbox worker started");
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.process_batch(sender.as_ref(), 256).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        self.drain(sender.as_ref()).await;
                        tracing::info!("push outbox worker stopped");
                        return;
                    }
                }
            }
        }
    }

    /// One pass over due tickets. Undue tickets are re-queued.
    async fn process_batch(&self, sender: &dyn PushSender, limit: usize) {
        let now = Instant::now();
        let mut requeue = Vec::new();
        for _ in 0..limit {
            let Some(ticket) = self.queue.pop() else {
                break;
            };
            if ticket.due_at > now {
                requeue.push(ticket);
                continue;
            }
            self.deliver(sender, ticket).await;
        }
        for ticket in requeue {
            let _ = self.queue.push(ticket);
        }
        self.recently_sent
            .retain(|_, sent_at| sent_at.elapsed() < DEDUP_WINDOW);
    }

    async fn deliver(&self, sender: &dyn PushSender, ticket: PushTicket) {
        let dedup_key = (ticket.token.clone(), ticket.notification.fingerprint());
        if let Some(sent_at) = self.recently_sent.get(&dedup_key)
            && sent_at.elapsed() < DEDUP_WINDOW
        {
            tracing::debug!(token = %ticket.token, "push deduped");
            return;
        }

        match sender.send(&ticket.token, &ticket.notification).await {
            Ok(()) => {
                self.recently_sent.insert(dedup_key, Instant::now());
            }
            Err(error) => {
                if ticket.attempt + 1 < BACKOFF.len() {
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                    let retry = PushTicket {
                        due_at: Instant::now() + BACKOFF[ticket.attempt] + jitter,
                        attempt: ticket.attempt + 1,
                        ..ticket
                    };
                    tracing::debug!(
                        token = %retry.token,
                        attempt = retry.attempt,
                        %error,
                        "push failed, will retry"
                    );
                    let _ = self.queue.push(retry);
                } else {
                    tracing::error!(token = %ticket.token, %error, "push dropped after retries");
                }
            }
        }
    }

    /// Best-effort single pass used at shutdown: every remaining ticket gets
    /// one delivery attempt, failures are dropped.
    pub async fn drain(&self, sender: &dyn PushSender) {
        while let Some(ticket) = self.queue.pop() {
            if let Err(error) = sender.send(&ticket.token, &ticket.notification).await {
                tracing::warn!(token = %ticket.token, %error, "push lost in shutdown drain");
            }
        }
    }
}
