//! Durable, ordered, per-bot message queue.
//!
//! The queue is format-agnostic: payloads are stored and returned byte for
//! byte. A successful [`QueueStore::dequeue`] is the only thing that marks a
//! message as consumed.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use crate::error::AppResult;
use crate::identity::BotIdentity;

/// Append/pop storage keyed by bot identity.
///
/// Implementations must be safe under concurrent use from many webhook
/// requests and workers, and must surface storage failures as errors rather
/// than dropping payloads.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Appends `payload` to the tail of the bot's queue.
    async fn enqueue(&self, bot: &BotIdentity, payload: &[u8]) -> AppResult<()>;

    /// Removes and returns the head of the bot's queue; `None` when empty.
    /// Never waits for a message to arrive.
    async fn dequeue(&self, bot: &BotIdentity) -> AppResult<Option<Vec<u8>>>;

    /// Number of messages waiting.
    async fn len(&self, bot: &BotIdentity) -> AppResult<usize>;
}

/// In-process queue backend.
///
/// Used by tests and by single-process deployments (`relaybot run`) where the
/// web handler and the workers share one address space.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueue {
    async fn enqueue(&self, bot: &BotIdentity, payload: &[u8]) -> AppResult<()> {
        let mut queues = self.queues.lock().await;
        queues.entry(bot.queue_key()).or_default().push_back(payload.to_vec());
        Ok(())
    }

    async fn dequeue(&self, bot: &BotIdentity) -> AppResult<Option<Vec<u8>>> {
        let mut queues = self.queues.lock().await;
        Ok(queues.get_mut(&bot.queue_key()).and_then(VecDeque::pop_front))
    }

    async fn len(&self, bot: &BotIdentity) -> AppResult<usize> {
        let queues = self.queues.lock().await;
        Ok(queues.get(&bot.queue_key()).map_or(0, VecDeque::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryQueue::new();
        let bot = BotIdentity::new("1:a");

        for payload in [b"A".as_slice(), b"B", b"C"] {
            queue.enqueue(&bot, payload).await.unwrap();
        }
        assert_eq!(queue.len(&bot).await.unwrap(), 3);

        assert_eq!(queue.dequeue(&bot).await.unwrap().as_deref(), Some(b"A".as_slice()));
        assert_eq!(queue.dequeue(&bot).await.unwrap().as_deref(), Some(b"B".as_slice()));
        assert_eq!(queue.dequeue(&bot).await.unwrap().as_deref(), Some(b"C".as_slice()));
        assert_eq!(queue.dequeue(&bot).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_dequeue_returns_immediately() {
        let queue = MemoryQueue::new();
        let bot = BotIdentity::new("1:a");
        let result = tokio::time::timeout(std::time::Duration::from_millis(50), queue.dequeue(&bot)).await;
        assert_eq!(result.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn test_bots_are_isolated() {
        let queue = MemoryQueue::new();
        let first = BotIdentity::new("1:a");
        let second = BotIdentity::new("2:b");

        queue.enqueue(&first, b"for-first").await.unwrap();
        assert_eq!(queue.dequeue(&second).await.unwrap(), None);
        assert_eq!(queue.len(&second).await.unwrap(), 0);
        assert_eq!(
            queue.dequeue(&first).await.unwrap().as_deref(),
            Some(b"for-first".as_slice())
        );
    }

    #[tokio::test]
    async fn test_concurrent_producers_lose_nothing() {
        let queue = Arc::new(MemoryQueue::new());
        let bot = BotIdentity::new("1:a");

        let mut handles = Vec::new();
        for producer in 0..8u8 {
            let queue = Arc::clone(&queue);
            let bot = bot.clone();
            handles.push(tokio::spawn(async move {
                for seq in 0..25u8 {
                    queue.enqueue(&bot, &[producer, seq]).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(queue.len(&bot).await.unwrap(), 200);

        // Per-producer order survives the interleaving.
        let mut last_seen = [None::<u8>; 8];
        while let Some(payload) = queue.dequeue(&bot).await.unwrap() {
            let (producer, seq) = (payload[0] as usize, payload[1]);
            if let Some(prev) = last_seen[producer] {
                assert!(seq > prev);
            }
            last_seen[producer] = Some(seq);
        }
    }
}
