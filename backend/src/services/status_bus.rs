//! # Status Bus
//!
//! Ordered, capped feed of user-facing status messages.
//!
//! ## Rules
//!
//! - At most [`MAX_MESSAGES`] messages are held; adding one more evicts
//!   the oldest
//! - `pending` and `error` messages stay until removed or cleared
//! - `success` and `info` messages expire [`AUTO_EXPIRE_SECS`] seconds
//!   after creation
//! - Every change publishes the full feed to subscribers
//!
//! ```text
//!   add(m4)    [m1, m2, m3]  →  [m2, m3, m4]
//!   upsert(m3) [m2, m3, m4]  →  [m2, m3', m4]   (position kept)
//!   remove(m2) [m2, m3, m4]  →  [m3, m4]
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::B256;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

pub const MAX_MESSAGES: usize = 3;
pub const AUTO_EXPIRE_SECS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCategory {
    Pending,
    Success,
    Error,
    Info,
}

impl StatusCategory {
    pub fn auto_expires(&self) -> bool {
        matches!(self, StatusCategory::Success | StatusCategory::Info)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    pub id: String,
    pub category: StatusCategory,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl StatusMessage {
    pub fn new(id: impl Into<String>, category: StatusCategory, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category,
            text: text.into(),
            tx_hash: None,
            chain_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn pending(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, StatusCategory::Pending, text)
    }

    pub fn success(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, StatusCategory::Success, text)
    }

    pub fn error(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, StatusCategory::Error, text)
    }

    pub fn info(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, StatusCategory::Info, text)
    }

    /// Link the message to a transaction for explorer lookup.
    pub fn with_tx(mut self, chain_id: u64, hash: B256) -> Self {
        self.chain_id = Some(chain_id);
        self.tx_hash = Some(hash);
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.category.auto_expires()
            && now - self.created_at >= chrono::Duration::seconds(AUTO_EXPIRE_SECS)
    }
}

/// Shared status feed. Clones refer to the same feed.
#[derive(Clone)]
pub struct StatusBus {
    messages: Arc<Mutex<VecDeque<StatusMessage>>>,
    feed: broadcast::Sender<Vec<StatusMessage>>,
}

impl StatusBus {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(64);
        Self {
            messages: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_MESSAGES + 1))),
            feed,
        }
    }

    /// Receive the full feed after every change.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<StatusMessage>> {
        self.feed.subscribe()
    }

    /// Append a message, evicting the oldest beyond the cap.
    ///
    /// An existing message with the same id is dropped first.
    pub fn add(&self, message: StatusMessage) {
        let mut messages = self.messages.lock();
        messages.retain(|m| m.id != message.id);
        messages.push_back(message);
        while messages.len() > MAX_MESSAGES {
            if let Some(evicted) = messages.pop_front() {
                debug!("Status feed full, evicted {}", evicted.id);
            }
        }
        self.publish(&messages);
    }

    /// Replace the message with the same id in place, or add it.
    pub fn upsert(&self, message: StatusMessage) {
        let mut messages = self.messages.lock();
        let position = messages.iter().position(|m| m.id == message.id);
        match position {
            Some(index) => {
                messages[index] = message;
                self.publish(&messages);
            }
            None => {
                drop(messages);
                self.add(message);
            }
        }
    }

    /// Remove by id. Returns whether a message was removed.
    pub fn remove(&self, id: &str) -> bool {
        let mut messages = self.messages.lock();
        let before = messages.len();
        messages.retain(|m| m.id != id);
        let removed = messages.len() != before;
        if removed {
            self.publish(&messages);
        }
        removed
    }

    pub fn clear(&self) {
        let mut messages = self.messages.lock();
        if !messages.is_empty() {
            messages.clear();
            self.publish(&messages);
        }
    }

    /// Current feed, oldest first, with expired messages filtered out.
    pub fn messages(&self) -> Vec<StatusMessage> {
        self.messages_at(Utc::now())
    }

    pub fn messages_at(&self, now: DateTime<Utc>) -> Vec<StatusMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| !m.is_expired_at(now))
            .cloned()
            .collect()
    }

    /// Drop expired messages. Returns how many were dropped.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let mut messages = self.messages.lock();
        let before = messages.len();
        messages.retain(|m| !m.is_expired_at(now));
        let pruned = before - messages.len();
        if pruned > 0 {
            self.publish(&messages);
        }
        pruned
    }

    /// Prune expired messages once a second, forever.
    pub async fn start_expiry_loop(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            self.prune_expired(Utc::now());
        }
    }

    fn publish(&self, messages: &VecDeque<StatusMessage>) {
        // No subscribers is fine
        let _ = self.feed.send(messages.iter().cloned().collect());
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}
