//! In-memory reputation store of known-bad IP addresses.
//!
//! The store is the only state shared between the ingestion task, the
//! pruning task and lookup callers. It is a sharded concurrent map: inserts,
//! reads and removals lock one shard for the duration of a single record.
//! Pruning scans shards under read locks and deletes record by record, so
//! a lookup never waits behind a whole-shard sweep.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Sighting history of one malicious IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReputationRecord {
    first_seen: Instant,
    last_seen: Instant,
}

impl ReputationRecord {
    fn new(now: Instant) -> Self {
        Self {
            first_seen: now,
            last_seen: now,
        }
    }

    /// When a feed first reported this IP. Never changes after creation.
    pub fn first_seen(&self) -> Instant {
        self.first_seen
    }

    /// Most recent feed sighting.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Time since the last sighting, zero if `now` is not after it.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    /// Check if this record has gone unseen for longer than `max_age`.
    pub fn is_stale(&self, max_age: Duration, now: Instant) -> bool {
        self.age(now) > max_age
    }
}

/// Outcome of [`ReputationStore::insert_or_refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sighting {
    /// The key was new and a record was created.
    Inserted,
    /// The key already existed and its `last_seen` was bumped.
    Refreshed,
}

/// Thread-safe map of canonical IP to sighting history.
#[derive(Debug, Default)]
pub struct ReputationStore {
    records: DashMap<IpAddr, ReputationRecord>,
}

impl ReputationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting of `key` at `now`.
    ///
    /// Creates the record on first sighting; otherwise only `last_seen`
    /// moves, and never backwards. The check and the write happen under the
    /// same shard lock, so two feeds reporting the same new IP at once still
    /// produce a single record.
    pub fn insert_or_refresh(&self, key: IpAddr, now: Instant) -> Sighting {
        match self.records.entry(key) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if now > record.last_seen {
                    record.last_seen = now;
                }
                Sighting::Refreshed
            }
            Entry::Vacant(entry) => {
                entry.insert(ReputationRecord::new(now));
                Sighting::Inserted
            }
        }
    }

    /// Check whether `key` is currently listed.
    pub fn lookup(&self, key: &IpAddr) -> bool {
        self.records.contains_key(key)
    }

    /// Copy of the record for `key`, if listed.
    pub fn get(&self, key: &IpAddr) -> Option<ReputationRecord> {
        self.records.get(key).map(|r| *r)
    }

    /// Remove every record not seen within `max_age` of `now`.
    ///
    /// Returns the number of records removed. A record refreshed at or after
    /// `now` is never removed, whichever of the two gets the shard lock first.
    pub fn prune_older_than(&self, max_age: Duration, now: Instant) -> usize {
        let stale = self.stale_keys(max_age, now);
        self.remove_stale(&stale, max_age, now)
    }

    fn stale_keys(&self, max_age: Duration, now: Instant) -> Vec<IpAddr> {
        self.records
            .iter()
            .filter(|entry| entry.value().is_stale(max_age, now))
            .map(|entry| *entry.key())
            .collect()
    }

    // Staleness is re-checked under the key's lock: a refresh that landed
    // since the scan keeps the record.
    fn remove_stale(&self, keys: &[IpAddr], max_age: Duration, now: Instant) -> usize {
        keys.iter()
            .filter(|key| {
                self.records
                    .remove_if(*key, |_, record| record.is_stale(max_age, now))
                    .is_some()
            })
            .count()
    }

    /// Get the number of live records.
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const HOUR: Duration = Duration::from_secs(3600);

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_insert_then_lookup() {
        let store = ReputationStore::new();
        let now = Instant::now();

        assert_eq!(store.insert_or_refresh(ip("1.2.3.4"), now), Sighting::Inserted);
        assert!(store.lookup(&ip("1.2.3.4")));
        assert!(!store.lookup(&ip("5.6.7.8")));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let store = ReputationStore::new();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(60);

        store.insert_or_refresh(ip("1.2.3.4"), t0);
        assert_eq!(store.insert_or_refresh(ip("1.2.3.4"), t1), Sighting::Refreshed);
        assert_eq!(store.insert_or_refresh(ip("1.2.3.4"), t1), Sighting::Refreshed);

        assert_eq!(store.count(), 1);
        let record = store.get(&ip("1.2.3.4")).unwrap();
        assert_eq!(record.last_seen(), t1);
    }

    #[test]
    fn test_first_seen_never_changes() {
        let store = ReputationStore::new();
        let t0 = Instant::now();

        store.insert_or_refresh(ip("10.0.0.1"), t0);
        for minutes in 1..=10 {
            store.insert_or_refresh(ip("10.0.0.1"), t0 + Duration::from_secs(minutes * 60));
        }

        let record = store.get(&ip("10.0.0.1")).unwrap();
        assert_eq!(record.first_seen(), t0);
        assert_eq!(record.last_seen(), t0 + Duration::from_secs(600));
    }

    #[test]
    fn test_older_refresh_keeps_last_seen() {
        let store = ReputationStore::new();
        let t0 = Instant::now();
        let later = t0 + Duration::from_secs(120);

        store.insert_or_refresh(ip("1.1.1.1"), later);
        store.insert_or_refresh(ip("1.1.1.1"), t0);

        let record = store.get(&ip("1.1.1.1")).unwrap();
        assert_eq!(record.last_seen(), later);
        assert!(record.last_seen() >= record.first_seen());
    }

    #[test]
    fn test_prune_removes_stale_and_keeps_fresh() {
        let store = ReputationStore::new();
        let base = Instant::now();
        let now = base + 3 * HOUR;

        // last_seen = now - 2h
        store.insert_or_refresh(ip("1.2.3.4"), base + HOUR);
        // last_seen = now - 30m
        store.insert_or_refresh(ip("5.6.7.8"), now - Duration::from_secs(1800));

        let removed = store.prune_older_than(HOUR, now);
        assert_eq!(removed, 1);
        assert!(!store.lookup(&ip("1.2.3.4")));
        assert!(store.lookup(&ip("5.6.7.8")));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_prune_boundary_is_exclusive() {
        let store = ReputationStore::new();
        let base = Instant::now();

        store.insert_or_refresh(ip("1.2.3.4"), base);
        assert_eq!(store.prune_older_than(HOUR, base + HOUR), 0);
        assert_eq!(store.prune_older_than(HOUR, base + HOUR + Duration::from_millis(1)), 1);
    }

    #[test]
    fn test_refresh_before_prune_survives() {
        let store = ReputationStore::new();
        let base = Instant::now();
        let now = base + 2 * HOUR;

        store.insert_or_refresh(ip("1.2.3.4"), base);
        store.insert_or_refresh(ip("1.2.3.4"), now);

        assert_eq!(store.prune_older_than(HOUR, now), 0);
        assert!(store.lookup(&ip("1.2.3.4")));
    }

    #[test]
    fn test_record_refreshed_after_prune_snapshot_is_kept() {
        let store = ReputationStore::new();
        let base = Instant::now();
        let prune_now = base + 2 * HOUR;

        // A refresh stamped later than the prune's `now` has zero age.
        store.insert_or_refresh(ip("1.2.3.4"), prune_now + Duration::from_secs(1));
        assert_eq!(store.prune_older_than(HOUR, prune_now), 0);
    }

    #[test]
    fn test_refresh_between_scan_and_removal_wins() {
        let store = ReputationStore::new();
        let base = Instant::now();
        let prune_now = base + 2 * HOUR;

        store.insert_or_refresh(ip("1.2.3.4"), base);
        store.insert_or_refresh(ip("5.6.7.8"), base);

        let stale = store.stale_keys(HOUR, prune_now);
        assert_eq!(stale.len(), 2);

        store.insert_or_refresh(ip("1.2.3.4"), prune_now);
        assert_eq!(store.remove_stale(&stale, HOUR, prune_now), 1);
        assert!(store.lookup(&ip("1.2.3.4")));
        assert!(!store.lookup(&ip("5.6.7.8")));
    }

    #[test]
    fn test_lookups_and_refreshes_during_prune() {
        let store = Arc::new(ReputationStore::new());
        let base = Instant::now();
        let prune_now = base + 2 * HOUR;

        for k in 0..20_000u32 {
            store.insert_or_refresh(IpAddr::from((0x0a00_0000 + k).to_be_bytes()), base);
        }

        let pruner = {
            let store = store.clone();
            thread::spawn(move || store.prune_older_than(HOUR, prune_now))
        };
        let refresher = {
            let store = store.clone();
            thread::spawn(move || {
                for k in 0..1_000u32 {
                    let key = IpAddr::from((0x0b00_0000 + k).to_be_bytes());
                    store.insert_or_refresh(key, prune_now);
                    assert!(store.lookup(&key));
                }
            })
        };

        let removed = pruner.join().unwrap();
        refresher.join().unwrap();

        assert_eq!(removed, 20_000);
        assert_eq!(store.count(), 1_000);
    }

    #[test]
    fn test_empty_store() {
        let store = ReputationStore::new();
        assert!(store.is_empty());
        assert_eq!(store.count(), 0);
        assert_eq!(store.prune_older_than(HOUR, Instant::now()), 0);
        assert!(store.get(&ip("1.2.3.4")).is_none());
    }

    #[test]
    fn test_concurrent_same_key_creates_one_record() {
        let store = Arc::new(ReputationStore::new());
        let now = Instant::now();

        let inserted: usize = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.insert_or_refresh(ip("9.9.9.9"), now))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|s| *s == Sighting::Inserted)
            .count();

        assert_eq!(inserted, 1);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_concurrent_lookups_and_refreshes() {
        let store = Arc::new(ReputationStore::new());
        let now = Instant::now();
        let writers = 4u8;
        let keys_per_writer = 250u16;

        let mut handles = Vec::new();
        for w in 0..writers {
            let store = store.clone();
            handles.push(thread::spawn(move || {
                for k in 0..keys_per_writer {
                    let key = IpAddr::from([10, w, (k >> 8) as u8, k as u8]);
                    store.insert_or_refresh(key, now);
                    assert!(store.lookup(&key));
                }
            }));
        }
        for _ in 0..4 {
            let store = store.clone();
            handles.push(thread::spawn(move || {
                for k in 0..keys_per_writer {
                    let key = IpAddr::from([10, 0, (k >> 8) as u8, k as u8]);
                    if let Some(record) = store.get(&key) {
                        assert!(record.last_seen() >= record.first_seen());
                    }
                    let _ = store.lookup(&key);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.count(), writers as usize * keys_per_writer as usize);
    }
}
