use std::num::NonZeroUsize;
use std::sync::Mutex;

use keel_types::TransactionReference;
use lru::LruCache;

/// Reasons for the most recent rejections, so that a caller holding only a
/// reference can tell a rejected request from a pending one.
///
/// Bounded: the least recently touched entry is evicted first.
pub(crate) struct RecentRejections {
    cache: Mutex<LruCache<TransactionReference, String>>,
}

impl RecentRejections {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn record(&self, reference: TransactionReference, reason: &str) {
        self.cache
            .lock()
            .expect("lock poisoned")
            .put(reference, reason.to_string());
    }

    pub fn get(&self, reference: &TransactionReference) -> Option<String> {
        self.cache.lock().expect("lock poisoned").get(reference).cloned()
    }

    /// Drop a stale reason once the request was delivered after all.
    pub fn forget(&self, reference: &TransactionReference) {
        self.cache.lock().expect("lock poisoned").pop(reference);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::Hash;

    fn reference(n: u8) -> TransactionReference {
        TransactionReference::from_hash(Hash::of(&[n]))
    }

    fn cache(capacity: usize) -> RecentRejections {
        RecentRejections::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn recorded_reason_is_returned() {
        let rejections = cache(4);
        rejections.record(reference(1), "invalid request");
        assert_eq!(rejections.get(&reference(1)).as_deref(), Some("invalid request"));
        assert_eq!(rejections.get(&reference(2)), None);
    }

    #[test]
    fn oldest_entry_is_evicted_at_capacity() {
        let rejections = cache(2);
        rejections.record(reference(1), "a");
        rejections.record(reference(2), "b");
        rejections.record(reference(3), "c");
        assert_eq!(rejections.get(&reference(1)), None);
        assert_eq!(rejections.get(&reference(2)).as_deref(), Some("b"));
        assert_eq!(rejections.get(&reference(3)).as_deref(), Some("c"));
    }

    #[test]
    fn forgotten_entry_is_gone() {
        let rejections = cache(2);
        rejections.record(reference(1), "a");
        rejections.forget(&reference(1));
        assert_eq!(rejections.get(&reference(1)), None);
    }
}
