//! Durable record of content that has already been forwarded.
//!
//! A key is recorded only after a confirmed send. Every mutation is persisted
//! synchronously; persistence failures are logged and never propagated, since
//! the forward already happened and the worst case is one repeat after a crash.

pub mod storage;

use std::{collections::HashMap, sync::Arc, time::Duration as StdDuration};

use chrono::{DateTime, Duration, Utc};

use crate::{
    clock::{format_timestamp, parse_timestamp, Clock},
    fingerprint::Fingerprint,
    Result,
};

pub use storage::{JsonFileStorage, MemoryStorage, RecordMap, RecordStorage};

#[derive(Clone, Copy, Debug)]
pub struct DedupConfig {
    pub retention: StdDuration,
    /// Eviction starts once the store holds more than this many records.
    pub high_water: usize,
    /// Eviction trims down to this many records.
    pub low_water: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            retention: StdDuration::from_secs(24 * 60 * 60),
            high_water: 10_000,
            low_water: 5_000,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Record {
    recorded_at: DateTime<Utc>,
    seq: u64,
}

/// Outcome of [`DedupStore::load`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub pruned: usize,
    pub evicted: usize,
    /// Storage was unreadable or corrupt and the store started empty.
    pub degraded: bool,
}

pub struct DedupStore {
    cfg: DedupConfig,
    retention: Duration,
    storage: Box<dyn RecordStorage>,
    clock: Arc<dyn Clock>,
    records: HashMap<Fingerprint, Record>,
    next_seq: u64,
}

impl DedupStore {
    pub fn new(cfg: DedupConfig, storage: Box<dyn RecordStorage>, clock: Arc<dyn Clock>) -> Self {
        let retention = Duration::from_std(cfg.retention).unwrap_or_else(|_| Duration::days(36_500));
        Self {
            cfg,
            retention,
            storage,
            clock,
            records: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Replace in-memory state with the persisted records that are still inside
    /// the retention window. Writes the pruned set back if anything was dropped.
    pub fn load(&mut self) -> LoadReport {
        self.records.clear();
        self.next_seq = 0;

        let raw = match self.storage.read() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::info!(storage = %self.storage.describe(), "no dedup records yet, starting empty");
                return LoadReport::default();
            }
            Err(e) => {
                tracing::warn!(
                    storage = %self.storage.describe(),
                    error = %e,
                    "dedup storage unreadable, starting empty"
                );
                return LoadReport {
                    degraded: true,
                    ..LoadReport::default()
                };
            }
        };

        let now = self.clock.now();
        let total = raw.len();
        let mut kept: Vec<(Fingerprint, DateTime<Utc>)> = raw
            .iter()
            .filter_map(|(k, ts)| {
                let key = Fingerprint::from_hex(k)?;
                let recorded_at = parse_timestamp(ts)?;
                Some((key, recorded_at))
            })
            .filter(|(_, recorded_at)| !self.is_expired_at(*recorded_at, now))
            .collect();
        kept.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        for (key, recorded_at) in kept {
            self.insert(key, recorded_at);
        }

        let pruned = total - self.records.len();
        let evicted = self.evict_if_over_ceiling();
        if pruned > 0 || evicted > 0 {
            tracing::info!(pruned, evicted, "dropped stale dedup records");
            self.persist_or_log();
        }

        let report = LoadReport {
            loaded: self.records.len(),
            pruned,
            evicted,
            degraded: false,
        };
        tracing::info!(loaded = report.loaded, "dedup records loaded");
        report
    }

    /// Whether `key` was forwarded within the retention window.
    pub fn contains(&self, key: &Fingerprint) -> bool {
        let now = self.clock.now();
        self.records
            .get(key)
            .is_some_and(|r| !self.is_expired_at(r.recorded_at, now))
    }

    /// Record a confirmed forward of `key` at the current time and persist.
    pub fn record(&mut self, key: Fingerprint) {
        let now = self.clock.now();
        tracing::debug!(hash = key.short(), "recording forwarded content");
        self.insert(key, now);
        self.evict_if_over_ceiling();
        self.persist_or_log();
    }

    /// Drop expired records from memory. Returns how many were removed.
    pub fn prune_expired(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.records.len();
        let retention = self.retention;
        self.records
            .retain(|_, r| now.signed_duration_since(r.recorded_at) < retention);
        before - self.records.len()
    }

    /// Write the full mapping to storage.
    pub fn persist(&self) -> Result<()> {
        let map: RecordMap = self
            .records
            .iter()
            .map(|(k, r)| (k.as_str().to_string(), format_timestamp(r.recorded_at)))
            .collect();
        self.storage.write(&map)
    }

    fn persist_or_log(&self) {
        if let Err(e) = self.persist() {
            tracing::warn!(
                storage = %self.storage.describe(),
                error = %e,
                "failed to persist dedup records; recent forwards may repeat after a restart"
            );
        }
    }

    fn insert(&mut self, key: Fingerprint, recorded_at: DateTime<Utc>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.insert(key, Record { recorded_at, seq });
    }

    fn is_expired_at(&self, recorded_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(recorded_at) >= self.retention
    }

    /// Oldest-first eviction down to the low-water mark once past the high-water mark.
    fn evict_if_over_ceiling(&mut self) -> usize {
        if self.records.len() <= self.cfg.high_water {
            return 0;
        }

        let mut by_age: Vec<(DateTime<Utc>, u64, Fingerprint)> = self
            .records
            .iter()
            .map(|(k, r)| (r.recorded_at, r.seq, k.clone()))
            .collect();
        by_age.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let excess = self.records.len() - self.cfg.low_water.min(self.cfg.high_water);
        for (_, _, key) in by_age.into_iter().take(excess) {
            self.records.remove(&key);
        }
        tracing::info!(
            evicted = excess,
            remaining = self.records.len(),
            "dedup store over ceiling, evicted oldest records"
        );
        excess
    }
}

/// Record counts as found in storage, for status reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub total: usize,
    /// Well-formed records still inside the retention window.
    pub live: usize,
}

/// Count persisted records without modifying storage.
pub fn summarize(storage: &dyn RecordStorage, retention: StdDuration, now: DateTime<Utc>) -> Result<StoreSummary> {
    let Some(raw) = storage.read()? else {
        return Ok(StoreSummary::default());
    };
    let retention = Duration::from_std(retention).unwrap_or_else(|_| Duration::days(36_500));
    let live = raw
        .iter()
        .filter(|(k, _)| Fingerprint::from_hex(k).is_some())
        .filter_map(|(_, ts)| parse_timestamp(ts))
        .filter(|recorded_at| now.signed_duration_since(*recorded_at) < retention)
        .count();
    Ok(StoreSummary {
        total: raw.len(),
        live,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, fingerprint::fingerprint};
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
    }

    fn store_with(
        cfg: DedupConfig,
        storage: &MemoryStorage,
        clock: &ManualClock,
    ) -> DedupStore {
        DedupStore::new(cfg, Box::new(storage.clone()), Arc::new(clock.clone()))
    }

    #[test]
    fn recorded_key_is_a_duplicate() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(start());
        let mut store = store_with(DedupConfig::default(), &storage, &clock);

        let key = fingerprint("join open.kakao.com/o/abc");
        assert!(!store.contains(&key));
        store.record(key.clone());
        assert!(store.contains(&key));
        assert!(store.contains(&fingerprint("join  open.kakao.com/o/abc\n")));

        let persisted = storage.snapshot().unwrap();
        assert_eq!(persisted.len(), 1);
        assert!(persisted.contains_key(key.as_str()));
    }

    #[test]
    fn records_expire_at_the_retention_boundary() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(start());
        let mut store = store_with(DedupConfig::default(), &storage, &clock);
        let key = fingerprint("x open.kakao.com");
        store.record(key.clone());

        clock.set(start() + Duration::hours(24) - Duration::seconds(1));
        assert!(store.contains(&key));

        clock.set(start() + Duration::hours(24) + Duration::seconds(1));
        assert!(!store.contains(&key));
        assert_eq!(store.prune_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn load_prunes_expired_records_and_persists_back() {
        let now = start();
        let old = fingerprint("old");
        let fresh = fingerprint("fresh");
        let mut seeded = RecordMap::new();
        seeded.insert(
            old.as_str().to_string(),
            format_timestamp(now - Duration::hours(25)),
        );
        seeded.insert(
            fresh.as_str().to_string(),
            format_timestamp(now - Duration::hours(1)),
        );
        let storage = MemoryStorage::with_records(seeded);
        let clock = ManualClock::new(now);
        let mut store = store_with(DedupConfig::default(), &storage, &clock);

        let report = store.load();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.pruned, 1);
        assert!(store.contains(&fresh));
        assert!(!store.contains(&old));

        let persisted = storage.snapshot().unwrap();
        assert_eq!(persisted.len(), 1);
        assert!(persisted.contains_key(fresh.as_str()));
        assert_eq!(storage.write_count(), 1);
    }

    #[test]
    fn load_without_expired_records_does_not_rewrite() {
        let now = start();
        let mut seeded = RecordMap::new();
        seeded.insert(
            fingerprint("a").as_str().to_string(),
            format_timestamp(now - Duration::minutes(5)),
        );
        let storage = MemoryStorage::with_records(seeded);
        let clock = ManualClock::new(now);
        let mut store = store_with(DedupConfig::default(), &storage, &clock);

        assert_eq!(store.load().pruned, 0);
        assert_eq!(storage.write_count(), 0);
    }

    #[test]
    fn load_drops_malformed_entries() {
        let now = start();
        let good = fingerprint("good");
        let mut seeded = RecordMap::new();
        seeded.insert("short".to_string(), format_timestamp(now));
        seeded.insert(good.as_str().to_string(), "not a time".to_string());
        seeded.insert(
            fingerprint("kept").as_str().to_string(),
            "2026-05-01T08:00:00".to_string(),
        );
        let storage = MemoryStorage::with_records(seeded);
        let clock = ManualClock::new(now);
        let mut store = store_with(DedupConfig::default(), &storage, &clock);

        let report = store.load();
        assert_eq!(report.pruned, 2);
        assert!(!store.contains(&good));
    }

    #[test]
    fn md5_keyed_records_are_not_carried_over() {
        let now = start();
        let mut seeded = RecordMap::new();
        seeded.insert(
            "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            "2026-05-01T08:30:00.000000".to_string(),
        );
        let storage = MemoryStorage::with_records(seeded);
        let clock = ManualClock::new(now);
        let mut store = store_with(DedupConfig::default(), &storage, &clock);

        let report = store.load();
        assert_eq!(report.loaded, 0);
        assert_eq!(report.pruned, 1);
        assert!(storage.snapshot().unwrap().is_empty());
    }

    #[test]
    fn unreadable_storage_starts_empty() {
        let storage = MemoryStorage::new();
        storage.set_fail_reads(true);
        let clock = ManualClock::new(start());
        let mut store = store_with(DedupConfig::default(), &storage, &clock);

        let report = store.load();
        assert!(report.degraded);
        assert!(store.is_empty());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forwarded_hashes.json");
        std::fs::write(&path, "[1, 2").unwrap();
        let clock = ManualClock::new(start());
        let mut store = DedupStore::new(
            DedupConfig::default(),
            Box::new(JsonFileStorage::new(&path)),
            Arc::new(clock),
        );

        assert!(store.load().degraded);
        assert!(store.is_empty());
    }

    #[test]
    fn write_failure_keeps_record_in_memory() {
        let storage = MemoryStorage::new();
        storage.set_fail_writes(true);
        let clock = ManualClock::new(start());
        let mut store = store_with(DedupConfig::default(), &storage, &clock);

        let key = fingerprint("content");
        store.record(key.clone());
        assert!(store.contains(&key));
        assert!(storage.snapshot().is_none());
        assert!(store.persist().is_err());
    }

    #[test]
    fn eviction_trims_oldest_to_low_water() {
        let cfg = DedupConfig {
            high_water: 10,
            low_water: 5,
            ..DedupConfig::default()
        };
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(start());
        let mut store = store_with(cfg, &storage, &clock);

        let keys: Vec<Fingerprint> = (0..11).map(|i| fingerprint(&format!("msg {i}"))).collect();
        for key in &keys {
            clock.advance(Duration::seconds(1));
            store.record(key.clone());
        }

        assert!(store.len() <= cfg.low_water);
        assert_eq!(store.len(), 5);
        for key in &keys[..6] {
            assert!(!store.contains(key));
        }
        for key in &keys[6..] {
            assert!(store.contains(key));
        }
        assert_eq!(storage.snapshot().unwrap().len(), 5);
    }

    #[test]
    fn eviction_breaks_timestamp_ties_by_insertion_order() {
        let cfg = DedupConfig {
            high_water: 3,
            low_water: 2,
            ..DedupConfig::default()
        };
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(start());
        let mut store = store_with(cfg, &storage, &clock);

        let keys: Vec<Fingerprint> = (0..4).map(|i| fingerprint(&format!("same-time {i}"))).collect();
        for key in &keys {
            store.record(key.clone());
        }

        assert_eq!(store.len(), 2);
        assert!(!store.contains(&keys[0]));
        assert!(!store.contains(&keys[1]));
        assert!(store.contains(&keys[2]));
        assert!(store.contains(&keys[3]));
    }

    #[test]
    fn round_trips_through_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forwarded_hashes.json");
        let clock = ManualClock::new(start());
        let key = fingerprint("persist me");

        let mut first = DedupStore::new(
            DedupConfig::default(),
            Box::new(JsonFileStorage::new(&path)),
            Arc::new(clock.clone()),
        );
        first.load();
        first.record(key.clone());

        clock.advance(Duration::hours(1));
        let mut second = DedupStore::new(
            DedupConfig::default(),
            Box::new(JsonFileStorage::new(&path)),
            Arc::new(clock),
        );
        assert_eq!(second.load().loaded, 1);
        assert!(second.contains(&key));
    }

    #[test]
    fn summary_counts_live_records_without_writing() {
        let now = start();
        let mut raw = RecordMap::new();
        raw.insert(fingerprint("fresh").as_str().to_string(), format_timestamp(now - Duration::hours(1)));
        raw.insert(fingerprint("old").as_str().to_string(), format_timestamp(now - Duration::hours(25)));
        raw.insert("not-a-hash".to_string(), format_timestamp(now));
        let storage = MemoryStorage::with_records(raw);

        let summary = summarize(&storage, DedupConfig::default().retention, now).unwrap();
        assert_eq!(summary, StoreSummary { total: 3, live: 1 });
        assert_eq!(storage.write_count(), 0);
    }
}
