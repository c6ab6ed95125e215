/// Per-user conversation history
use fnv::FnvHashMap;
use std::collections::VecDeque;
use tokio::sync::Mutex;

pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Bounded ring buffer of recent texts for every user
pub struct ConversationHistory {
    capacity: usize,
    buffers: Mutex<FnvHashMap<String, VecDeque<String>>>,
}

impl ConversationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffers: Mutex::new(FnvHashMap::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push `text` for `uid`, evicting the oldest entry when full
    pub async fn append(&self, uid: &str, text: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }

        let mut buffers = self.buffers.lock().await;
        let buffer = buffers
            .entry(uid.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(text.into());
    }

    /// Up to `max_len` most recent entries for `uid`, oldest first
    pub async fn read(&self, uid: &str, max_len: usize) -> Vec<String> {
        if max_len == 0 {
            return Vec::new();
        }

        let buffers = self.buffers.lock().await;
        match buffers.get(uid) {
            Some(buffer) => {
                let skip = buffer.len().saturating_sub(max_len);
                buffer.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Number of users with a buffer
    pub async fn user_count(&self) -> usize {
        self.buffers.lock().await.len()
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
