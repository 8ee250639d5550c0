//! Short-lived cache of downloaded media, so a redelivered webhook does not
//! download the same attachment twice.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::sender::ResolvedMedia;

pub const DEFAULT_MEDIA_CACHE_ENTRIES: usize = 32;
pub const DEFAULT_MEDIA_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Default)]
struct Entries {
    by_id: HashMap<String, (Instant, ResolvedMedia)>,
    order: VecDeque<String>,
}

/// Capacity- and age-bounded map from media id to resolved media. The oldest
/// insertion is evicted first.
pub struct MediaCache {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<Entries>,
}

impl MediaCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: Mutex::new(Entries::default()),
        }
    }

    pub fn get(&self, media_id: &str) -> Option<ResolvedMedia> {
        let mut entries = self.entries.lock().ok()?;
        let expired = match entries.by_id.get(media_id) {
            Some((stored, media)) if stored.elapsed() < self.ttl => return Some(media.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.by_id.remove(media_id);
            entries.order.retain(|id| id != media_id);
        }
        None
    }

    pub fn insert(&self, media_id: &str, media: ResolvedMedia) {
        if self.capacity == 0 {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if entries
            .by_id
            .insert(media_id.to_string(), (Instant::now(), media))
            .is_some()
        {
            entries.order.retain(|id| id != media_id);
        }
        entries.order.push_back(media_id.to_string());
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.by_id.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.by_id.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MediaCache {
    fn default() -> Self {
        Self::new(DEFAULT_MEDIA_CACHE_ENTRIES, DEFAULT_MEDIA_CACHE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MediaAttachment;

    fn media(id: &str) -> ResolvedMedia {
        ResolvedMedia {
            url: format!("https://cdn.example/{id}"),
            attachment: MediaAttachment::from_bytes(id.as_bytes(), "image/png", format!("{id}.png")),
        }
    }

    #[test]
    fn oldest_entries_are_evicted_at_capacity() {
        let cache = MediaCache::new(2, DEFAULT_MEDIA_CACHE_TTL);
        cache.insert("m1", media("m1"));
        cache.insert("m2", media("m2"));
        cache.insert("m3", media("m3"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("m1").is_none());
        assert_eq!(cache.get("m3").unwrap().url, "https://cdn.example/m3");
    }

    #[test]
    fn reinsert_refreshes_position() {
        let cache = MediaCache::new(2, DEFAULT_MEDIA_CACHE_TTL);
        cache.insert("m1", media("m1"));
        cache.insert("m2", media("m2"));
        cache.insert("m1", media("m1"));
        cache.insert("m3", media("m3"));

        assert!(cache.get("m1").is_some());
        assert!(cache.get("m2").is_none());
    }

    #[test]
    fn stale_entries_are_dropped_on_read() {
        let cache = MediaCache::new(4, Duration::ZERO);
        cache.insert("m1", media("m1"));
        assert!(cache.get("m1").is_none());
        assert!(cache.is_empty());
    }
}
