use std::sync::{Arc, Mutex};

/// Contributions not yet confirmed by the remote store, oldest first
///
/// Clones share the same queue so a send in flight and a new failure can
/// both touch it. The lock is never held across an await point.
#[derive(Clone, Debug, Default)]
pub struct PendingQueue {
    chunks: Arc<Mutex<Vec<String>>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chunks(chunks: Vec<String>) -> Self {
        PendingQueue {
            chunks: Arc::new(Mutex::new(chunks)),
        }
    }

    pub fn push(&self, chunk: String) {
        if let Ok(mut chunks) = self.chunks.lock() {
            chunks.push(chunk);
        }
    }

    /// Copy of the current content
    pub fn snapshot(&self) -> Vec<String> {
        self.chunks.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Remove the `count` oldest chunks
    pub fn drain_front(&self, count: usize) {
        if let Ok(mut chunks) = self.chunks.lock() {
            let n = count.min(chunks.len());
            chunks.drain(..n);
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_front_keeps_newer() {
        let queue = PendingQueue::from_chunks(vec!["a".into(), "b".into()]);
        let shared = queue.clone();
        shared.push("c".into());
        assert_eq!(queue.len(), 3);

        queue.drain_front(2);
        assert_eq!(queue.snapshot(), vec!["c".to_string()]);

        queue.drain_front(5);
        assert!(queue.is_empty());
    }
}
