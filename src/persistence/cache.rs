use crate::entities::item::PlayerId;
use crate::persistence::engine::SharedRecord;
use crate::persistence::record::PlayerRecord;
use crate::persistence::store::SaveStore;
use crate::telemetry::logging;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub loads: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64) / (total as f64)
        }
    }
}

/// In-memory lookup of shared records with LRU eviction. Evicted records
/// are written back through the store before they are released.
pub struct RecordCache {
    cache: LruCache<PlayerId, SharedRecord>,
    store: SaveStore,
    stats: CacheStats,
}

impl RecordCache {
    pub fn new(capacity: usize, store: SaveStore) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
            store,
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Returns the cached record, loading it from the store on a miss.
    /// `Ok(None)` when the participant has never been saved.
    pub fn get_or_load(&mut self, id: PlayerId) -> Result<Option<SharedRecord>, String> {
        if let Some(record) = self.cache.get(&id) {
            self.stats.hits += 1;
            return Ok(Some(Arc::clone(record)));
        }
        self.stats.misses += 1;
        let Some(record) = self.store.load_player(id)? else {
            return Ok(None);
        };
        self.stats.loads += 1;
        Ok(Some(self.insert(record)))
    }

    /// Loads the record or creates a fresh one for a first-time participant.
    pub fn get_or_create(
        &mut self,
        id: PlayerId,
        name: &str,
        now: u64,
    ) -> Result<SharedRecord, String> {
        if let Some(record) = self.get_or_load(id)? {
            return Ok(record);
        }
        logging::log_persistence(&format!("new participant {} ({})", id.0, name));
        Ok(self.insert(PlayerRecord::new(id, name.to_string(), now)))
    }

    pub fn insert(&mut self, record: PlayerRecord) -> SharedRecord {
        let id = record.identity();
        let shared = Arc::new(Mutex::new(record));
        if let Some((evicted_id, evicted)) = self.cache.push(id, Arc::clone(&shared)) {
            if evicted_id != id {
                self.stats.evictions += 1;
                self.write_back(evicted_id, &evicted);
            }
        }
        shared
    }

    fn write_back(&self, id: PlayerId, record: &SharedRecord) {
        let result = match record.lock() {
            Ok(guard) => self.store.save_player(&guard),
            Err(_) => Err("player record lock poisoned".to_string()),
        };
        if let Err(err) = result {
            logging::log_error(&format!("evicted record {} not saved: {}", id.0, err));
        }
    }
}
