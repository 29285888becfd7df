//! In-memory nonce store for replay attack prevention.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::RemoteError;

use super::CompanionIdentity;

/// Replay cache key: one nonce is scoped to one sender.
type NonceKey = (CompanionIdentity, String);

#[derive(Default)]
struct NonceTable {
    /// Live records, (sender, nonce) -> expiry.
    records: HashMap<NonceKey, Instant>,
    /// Insertion order, which is expiry order for a fixed TTL.
    expiry_queue: VecDeque<(Instant, NonceKey)>,
}

impl NonceTable {
    /// Pop expired entries from the front of the queue. Stops at the first
    /// live entry, so the cost is bounded by the number removed.
    fn sweep(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some((expiry, _)) = self.expiry_queue.front() {
            if *expiry > now {
                break;
            }
            if let Some((expiry, key)) = self.expiry_queue.pop_front() {
                // A key re-recorded after lazy expiry has a newer queue entry.
                if self.records.get(&key) == Some(&expiry) {
                    self.records.remove(&key);
                    removed += 1;
                }
            }
        }
        removed
    }
}

/// Thread-safe in-memory nonce store with TTL-based expiry.
pub struct NonceStore {
    table: Mutex<NonceTable>,
    /// Time-to-live for nonces.
    ttl: Duration,
}

impl NonceStore {
    /// Create a new nonce store with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            table: Mutex::new(NonceTable::default()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, NonceTable> {
        match self.table.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(), // Recover from mutex poisoning
        }
    }

    /// Record `(sender, nonce)` if no live record exists.
    ///
    /// Fails with `Replay` and leaves the store untouched otherwise.
    pub fn check_and_record(
        &self,
        sender: &CompanionIdentity,
        nonce: &str,
    ) -> Result<(), RemoteError> {
        self.check_and_record_at(sender, nonce, Instant::now())
    }

    /// `check_and_record` against an explicit clock reading.
    pub fn check_and_record_at(
        &self,
        sender: &CompanionIdentity,
        nonce: &str,
        now: Instant,
    ) -> Result<(), RemoteError> {
        let mut table = self.lock();
        let key = (*sender, nonce.to_string());

        let live = matches!(table.records.get(&key), Some(expiry) if *expiry > now);
        if live {
            return Err(RemoteError::Replay {
                sender: sender.to_hex(),
            });
        }

        // An expired record is treated as absent and overwritten.
        let expiry = now + self.ttl;
        table.records.insert(key.clone(), expiry);
        table.expiry_queue.push_back((expiry, key));

        Ok(())
    }

    /// Get the current number of stored nonces (for monitoring).
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired nonces. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    /// `cleanup` against an explicit clock reading.
    pub fn cleanup_at(&self, now: Instant) -> usize {
        self.lock().sweep(now)
    }

    /// Start a background cleanup task.
    ///
    /// This spawns a tokio task that periodically removes expired nonces.
    pub fn start_cleanup_task(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            loop {
                interval_timer.tick().await;
                let removed = store.cleanup();
                if removed > 0 {
                    debug!(removed, remaining = store.len(), "Swept expired nonces");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(byte: u8) -> CompanionIdentity {
        CompanionIdentity::from_bytes([byte; 32])
    }

    #[test]
    fn test_new_nonce_accepted() {
        let store = NonceStore::new(Duration::from_secs(120));
        assert!(store.check_and_record(&sender(1), "nonce1").is_ok());
        assert!(store.check_and_record(&sender(1), "nonce2").is_ok());
    }

    #[test]
    fn test_duplicate_nonce_rejected() {
        let store = NonceStore::new(Duration::from_secs(120));
        assert!(store.check_and_record(&sender(1), "nonce1").is_ok());

        let result = store.check_and_record(&sender(1), "nonce1");
        assert!(matches!(result, Err(RemoteError::Replay { .. })));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_nonce_scoped_per_sender() {
        let store = NonceStore::new(Duration::from_secs(120));
        assert!(store.check_and_record(&sender(1), "shared").is_ok());
        assert!(store.check_and_record(&sender(2), "shared").is_ok());
    }

    #[test]
    fn test_expired_nonce_accepted_again() {
        let store = NonceStore::new(Duration::from_secs(120));
        let start = Instant::now();
        store
            .check_and_record_at(&sender(1), "nonce1", start)
            .unwrap();

        let before_expiry = start + Duration::from_secs(119);
        assert!(store
            .check_and_record_at(&sender(1), "nonce1", before_expiry)
            .is_err());

        let at_expiry = start + Duration::from_secs(120);
        assert!(store
            .check_and_record_at(&sender(1), "nonce1", at_expiry)
            .is_ok());
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let store = NonceStore::new(Duration::from_secs(10));
        let start = Instant::now();
        store.check_and_record_at(&sender(1), "a", start).unwrap();
        store
            .check_and_record_at(&sender(1), "b", start + Duration::from_secs(5))
            .unwrap();
        assert_eq!(store.len(), 2);

        assert_eq!(store.cleanup_at(start + Duration::from_secs(10)), 1);
        assert_eq!(store.len(), 1);

        assert_eq!(store.cleanup_at(start + Duration::from_secs(15)), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep_keeps_rerecorded_nonce() {
        let store = NonceStore::new(Duration::from_secs(10));
        let start = Instant::now();
        store.check_and_record_at(&sender(1), "a", start).unwrap();
        // Lazily expired and recorded again with a later expiry.
        store
            .check_and_record_at(&sender(1), "a", start + Duration::from_secs(12))
            .unwrap();

        // The stale queue entry must not evict the fresh record.
        assert_eq!(store.cleanup_at(start + Duration::from_secs(13)), 0);
        assert_eq!(store.len(), 1);
        assert!(store
            .check_and_record_at(&sender(1), "a", start + Duration::from_secs(14))
            .is_err());
    }

    #[tokio::test]
    async fn test_cleanup_task_sweeps() {
        let store = Arc::new(NonceStore::new(Duration::from_millis(10)));
        store.check_and_record(&sender(1), "nonce1").unwrap();

        let handle = store.start_cleanup_task(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert!(store.is_empty());
    }
}
