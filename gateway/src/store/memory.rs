use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Process-local TTL maps for states and deliveries.
#[derive(Default)]
pub struct MemoryStore {
    states: DashMap<String, Expiring<String>>,
    deliveries: DashMap<String, Expiring<()>>,
}

/// Cap for TTLs too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: now
                .checked_add(ttl)
                .unwrap_or_else(|| now + FAR_FUTURE),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

impl MemoryStore {
    pub fn store_install_state(&self, nonce: &str, payload: String, ttl: Duration) {
        sweep(&self.states);
        self.states
            .insert(nonce.to_owned(), Expiring::new(payload, ttl));
    }

    /// Removes the state and returns its payload if it had not expired.
    pub fn consume_install_state(&self, nonce: &str) -> Option<String> {
        let (_, entry) = self.states.remove(nonce)?;
        entry.is_live(Instant::now()).then_some(entry.value)
    }

    /// Returns `false` if the delivery id is already recorded and still live.
    pub fn mark_delivery(&self, delivery_id: &str, ttl: Duration) -> bool {
        sweep(&self.deliveries);

        let now = Instant::now();
        match self.deliveries.entry(delivery_id.to_owned()) {
            Entry::Occupied(entry) if entry.get().is_live(now) => false,
            Entry::Occupied(mut entry) => {
                entry.insert(Expiring::new((), ttl));
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(Expiring::new((), ttl));
                true
            }
        }
    }

    pub fn forget_delivery(&self, delivery_id: &str) {
        self.deliveries.remove(delivery_id);
    }

    #[cfg(test)]
    fn len(&self) -> (usize, usize) {
        (self.states.len(), self.deliveries.len())
    }
}

fn sweep<T>(map: &DashMap<String, Expiring<T>>) {
    let now = Instant::now();
    map.retain(|_, entry| entry.is_live(now));
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn state_is_single_use() {
        let store = MemoryStore::default();
        store.store_install_state("n1", "payload".to_owned(), TTL);

        assert_eq!(store.consume_install_state("n1").as_deref(), Some("payload"));
        assert_eq!(store.consume_install_state("n1"), None);
    }

    #[test]
    fn unknown_state_is_none() {
        let store = MemoryStore::default();
        assert_eq!(store.consume_install_state("never-issued"), None);
    }

    #[test]
    fn expired_state_is_not_returned() {
        let store = MemoryStore::default();
        store.store_install_state("n1", "payload".to_owned(), Duration::ZERO);
        assert_eq!(store.consume_install_state("n1"), None);
    }

    #[test]
    fn expired_entries_are_swept_on_insert() {
        let store = MemoryStore::default();
        store.store_install_state("old", String::new(), Duration::ZERO);
        store.mark_delivery("old", Duration::ZERO);

        store.store_install_state("new", String::new(), TTL);
        store.mark_delivery("new", TTL);

        assert_eq!(store.len(), (1, 1));
    }

    #[test]
    fn huge_ttl_does_not_overflow() {
        let store = MemoryStore::default();
        store.store_install_state("n1", "payload".to_owned(), Duration::MAX);
        assert!(store.mark_delivery("d1", Duration::MAX));
        assert!(!store.mark_delivery("d1", Duration::MAX));

        assert_eq!(store.consume_install_state("n1").as_deref(), Some("payload"));
    }

    #[test]
    fn delivery_is_recorded_once() {
        let store = MemoryStore::default();
        assert!(store.mark_delivery("d1", TTL));
        assert!(!store.mark_delivery("d1", TTL));

        store.forget_delivery("d1");
        assert!(store.mark_delivery("d1", TTL));
    }
}
