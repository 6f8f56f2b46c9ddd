use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::config::HISTORY_CAPACITY;

/// One chunk read from a session. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sender: String,
    content: Vec<u8>,
    created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            sender: sender.into(),
            content,
            created_at: Utc::now(),
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

pub struct MessageHistory {
    messages: Mutex<VecDeque<Message>>,
    capacity: usize,
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl MessageHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity.min(HISTORY_CAPACITY))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append(&self, message: Message) {
        let mut messages = self.lock();

        messages.push_back(message);

        while messages.len() > self.capacity {
            messages.pop_front();
        }
    }

    /// Up to `n` stored messages taken from the head of the queue, so once
    /// more than `n` are stored these are the *oldest* `n`, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Message> {
        self.lock().iter().take(n).cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Message>> {
        // a panic while holding the lock cannot leave the deque half-updated
        self.messages.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
