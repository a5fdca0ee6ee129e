//! Time-decayed record of recently received announcements.

use std::collections::HashMap;

/// Presence cache keyed by the raw announcement string
///
/// Each entry carries a remaining-lifetime counter:
///
/// - receiving an announcement sets its counter to the TTL (creating the entry if needed)
/// - [`age`](Self::age) decrements every counter by one, whether or not anything was received
/// - an entry is *available* while its counter is strictly positive
///
/// Entries that are no longer available are kept for a grace period of
/// another TTL worth of cycles and then purged. When a new announcement
/// arrives while the cache is full, the entry with the lowest counter is
/// evicted first, so a stale entry always goes before an available one.
#[derive(Debug, Clone)]
pub struct PresenceCache
{
    entries: HashMap<String, i32>,
    ttl: i32,
    capacity: usize,
}

impl PresenceCache
{
    /// Create an empty cache.
    ///
    /// `ttl` is clamped to at least 1 and `capacity` to at least 1.
    #[must_use]
    pub fn new(ttl: u32, capacity: usize) -> Self
    {
        Self {
            entries: HashMap::new(),
            ttl: i32::try_from(ttl).unwrap_or(i32::MAX).max(1),
            capacity: capacity.max(1),
        }
    }

    /// Counter value given to a freshly received announcement.
    #[must_use]
    pub fn ttl(&self) -> i32
    {
        self.ttl
    }

    /// Decrement every counter by one and purge long-expired entries.
    ///
    /// Returns the number of purged entries.
    pub fn age(&mut self) -> usize
    {
        for counter in self.entries.values_mut() {
            *counter -= 1;
        }

        let floor = -self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, counter| *counter > floor);
        before - self.entries.len()
    }

    /// Record that `announcement` was just received.
    pub fn register(&mut self, announcement: String)
    {
        if let Some(counter) = self.entries.get_mut(&announcement) {
            *counter = self.ttl;
            return;
        }

        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(announcement, self.ttl);
    }

    /// Announcements that are currently available.
    ///
    /// The iterator borrows the cache and is computed afresh on each call.
    pub fn available(&self) -> impl Iterator<Item = &str> + '_
    {
        self.entries
            .iter()
            .filter(|(_, counter)| **counter > 0)
            .map(|(announcement, _)| announcement.as_str())
    }

    /// Whether at least one announcement is available.
    #[must_use]
    pub fn has_available(&self) -> bool
    {
        self.available().next().is_some()
    }

    /// Remaining counter for an announcement, if it is still tracked.
    #[must_use]
    pub fn remaining(&self, announcement: &str) -> Option<i32>
    {
        self.entries.get(announcement).copied()
    }

    /// Number of tracked announcements, available or not.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    /// Whether no announcement is tracked at all.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self)
    {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, counter)| **counter)
            .map(|(announcement, _)| announcement.clone());
        if let Some(announcement) = oldest {
            self.entries.remove(&announcement);
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_announcement_available_for_exactly_ttl_cycles()
    {
        let mut cache = PresenceCache::new(3, 16);

        let mut visible = Vec::new();
        for cycle in 1..=6 {
            // Same order as a poll: age first, then register what arrived
            cache.age();
            if cycle == 1 {
                cache.register("player".to_string());
            }
            visible.push(cache.available().any(|a| a == "player"));
        }
        assert_eq!(visible, vec![true, true, true, false, false, false]);
    }

    #[test]
    fn test_reregistration_resets_counter()
    {
        let mut cache = PresenceCache::new(3, 16);
        cache.register("player".to_string());
        cache.age();
        cache.age();
        assert_eq!(cache.remaining("player"), Some(1));

        cache.register("player".to_string());
        assert_eq!(cache.remaining("player"), Some(3));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_aging_twice_decrements_by_two()
    {
        let mut cache = PresenceCache::new(3, 16);
        cache.register("a".to_string());
        cache.register("b".to_string());
        cache.age();
        cache.register("b".to_string());

        cache.age();
        cache.age();

        assert_eq!(cache.remaining("a"), Some(0));
        assert_eq!(cache.remaining("b"), Some(1));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_expired_entries_are_purged_after_grace_period()
    {
        let mut cache = PresenceCache::new(2, 16);
        cache.register("gone".to_string());

        let mut purged = 0;
        for _ in 0..4 {
            purged += cache.age();
        }
        assert_eq!(purged, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_full_cache_evicts_lowest_counter()
    {
        let mut cache = PresenceCache::new(3, 2);
        cache.register("stale".to_string());
        cache.age();
        cache.age();
        cache.register("fresh".to_string());

        cache.register("newest".to_string());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.remaining("stale"), None);
        assert_eq!(cache.remaining("fresh"), Some(3));
        assert_eq!(cache.remaining("newest"), Some(3));
    }
}
