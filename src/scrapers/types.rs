use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::http::HttpClient;
use crate::models::{DealType, PropertyType};
use crate::storage::{Database, ListingStore, PlaceResolver};

/// Shared handles every scanner needs: HTTP client, place resolver, listing store.
#[derive(Clone)]
pub struct Pipeline {
    pub http: HttpClient,
    pub places: PlaceResolver,
    pub listings: ListingStore,
}

impl Pipeline {
    pub fn new(http: HttpClient, db: &Database) -> Self {
        Self {
            http,
            places: db.places(),
            listings: db.listings(),
        }
    }
}

/// Scan matrix key for the HTML sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanKey {
    pub city: &'static str,
    pub property_type: PropertyType,
    pub deal_type: DealType,
}

impl std::fmt::Display for ScanKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.city, self.property_type, self.deal_type)
    }
}

/// Highest numeric id seen per key.
#[derive(Debug)]
pub struct MaxIdCursor<K> {
    last: HashMap<K, u64>,
}

impl<K: Hash + Eq> Default for MaxIdCursor<K> {
    fn default() -> Self {
        Self {
            last: HashMap::new(),
        }
    }
}

impl<K: Hash + Eq> MaxIdCursor<K> {
    pub fn get(&self, key: &K) -> u64 {
        self.last.get(key).copied().unwrap_or(0)
    }

    /// Keep items whose id exceeds the key's current mark, then raise the mark.
    pub fn take_new<T>(&mut self, key: K, items: Vec<T>, id_of: impl Fn(&T) -> Option<u64>) -> Vec<T> {
        let floor = self.get(&key);
        let mut highest = floor;
        let fresh: Vec<T> = items
            .into_iter()
            .filter(|item| match id_of(item) {
                Some(id) if id > floor => {
                    highest = highest.max(id);
                    true
                }
                _ => false,
            })
            .collect();
        self.last.insert(key, highest);
        fresh
    }
}

/// URLs already observed per key.
#[derive(Debug)]
pub struct SeenUrls<K> {
    seen: HashMap<K, HashSet<String>>,
}

impl<K: Hash + Eq> Default for SeenUrls<K> {
    fn default() -> Self {
        Self {
            seen: HashMap::new(),
        }
    }
}

impl<K: Hash + Eq> SeenUrls<K> {
    /// Record `urls` under `key`, returning those not seen before, in order.
    pub fn take_new(&mut self, key: K, urls: Vec<String>) -> Vec<String> {
        let seen = self.seen.entry(key).or_default();
        urls.into_iter().filter(|url| seen.insert(url.clone())).collect()
    }

    pub fn len(&self, key: &K) -> usize {
        self.seen.get(key).map_or(0, HashSet::len)
    }
}

/// Randomized pause between successive requests to the same site.
#[derive(Debug, Clone, Copy)]
pub struct PoliteDelay {
    pub min: Duration,
    pub max: Duration,
}

impl PoliteDelay {
    pub const fn secs(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_secs(min),
            max: Duration::from_secs(max),
        }
    }

    pub const fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    fn pick(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }

    /// Sleep a random duration in `[min, max]`; `false` if cancelled first.
    pub async fn wait(&self, token: &CancellationToken) -> bool {
        sleep_or_cancel(self.pick(), token).await
    }
}

/// `true` if the full duration elapsed, `false` if the token fired.
pub async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !token.is_cancelled();
    }
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Per-round counters reported by a scanner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundStats {
    /// Items not seen by the cursor before this round.
    pub found: usize,
    /// Items the storage engine accepted as new.
    pub added: usize,
    /// Keys whose fetch failed.
    pub failed_keys: usize,
}
