//! C2: Cache — a TTL + priority-eviction store fronting the downlink bus.
//!
//! The original this bridge is modeled on (`original_source/cache.c`) backs
//! this with a fixed-size hash table of prime bucket count and explicit
//! chaining. We keep that store's eviction policy and wildcard semantics but
//! back it with `std::collections::HashMap`, which already gives O(1)
//! average lookup without hand-rolled chaining — see DESIGN.md for the
//! rationale.

use bridge_protocol::Attributes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    data_type: u8,
    inserted_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    access_count: u64,
}

/// Component-discovery record (§B): which backend component owns a
/// parameter, cached indefinitely until an explicit `clear()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub component_name: String,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub timeouts: u64,
}

/// Snapshot-friendly stats plus derived fields, returned by [`Cache::stats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsReport {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub timeouts: u64,
    pub total_entries: usize,
    pub memory_used_bytes: usize,
}

pub struct Cache {
    entries: HashMap<String, Entry>,
    component_info: HashMap<String, ComponentInfo>,
    attributes: HashMap<String, Attributes>,
    max_entries: usize,
    default_ttl: Duration,
    stats: CacheStats,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    name: String,
    value: String,
    data_type: u8,
    inserted_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheSnapshot {
    entries: Vec<SnapshotEntry>,
}

impl Cache {
    #[must_use]
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Cache {
            entries: HashMap::new(),
            component_info: HashMap::new(),
            attributes: HashMap::new(),
            max_entries,
            default_ttl,
            stats: CacheStats::default(),
        }
    }

    /// Read a single cached value. Expired entries are treated as a miss and
    /// removed lazily.
    pub fn get(&mut self, name: &str) -> Option<(String, u8)> {
        let now = Utc::now();
        let expired = matches!(self.entries.get(name), Some(e) if e.expires_at <= now);
        if expired {
            self.entries.remove(name);
            self.stats.timeouts += 1;
            self.stats.misses += 1;
            return None;
        }
        match self.entries.get_mut(name) {
            Some(e) => {
                e.access_count += 1;
                self.stats.hits += 1;
                Some((e.value.clone(), e.data_type))
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Write a value with an explicit TTL (or the cache default).
    pub fn set(&mut self, name: &str, value: &str, data_type: u8, ttl: Option<Duration>) {
        let now = Utc::now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.entries.insert(
            name.to_owned(),
            Entry {
                value: value.to_owned(),
                data_type,
                inserted_at: now,
                expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
                access_count: 0,
            },
        );
        self.evict_if_needed();
    }

    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .map(|e| e.expires_at > Utc::now())
            .unwrap_or(false)
    }

    pub fn delete(&mut self, name: &str) -> bool {
        self.attributes.remove(name);
        self.entries.remove(name).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.component_info.clear();
        self.attributes.clear();
    }

    pub fn set_attributes(&mut self, name: &str, attributes: Attributes) {
        self.attributes.insert(name.to_owned(), attributes);
    }

    #[must_use]
    pub fn get_attributes(&self, name: &str) -> Option<Attributes> {
        self.attributes.get(name).cloned()
    }

    /// Prefix/wildcard read (§4.2): a trailing `.` or `*` means "everything
    /// under this prefix"; anything else is matched literally.
    #[must_use]
    pub fn get_wildcard(&self, prefix: &str) -> Vec<(String, String, u8)> {
        let now = Utc::now();
        let literal = prefix.strip_suffix('*').unwrap_or(prefix);
        self.entries
            .iter()
            .filter(|(k, e)| k.starts_with(literal) && e.expires_at > now)
            .map(|(k, e)| (k.clone(), e.value.clone(), e.data_type))
            .collect()
    }

    /// Remove every entry under a prefix/wildcard; returns the count removed.
    pub fn invalidate_wildcard(&mut self, prefix: &str) -> usize {
        let literal = prefix.strip_suffix('*').unwrap_or(prefix);
        let keys: Vec<String> = self
            .entries
            .keys()
            .filter(|k| k.starts_with(literal))
            .cloned()
            .collect();
        for k in &keys {
            self.entries.remove(k);
            self.attributes.remove(k);
        }
        keys.len()
    }

    /// Remove all expired entries regardless of access; called on the
    /// `cleanup_interval` timer.
    pub fn expire_all(&mut self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            self.entries.remove(k);
        }
        self.stats.timeouts += expired.len() as u64;
        expired.len()
    }

    /// Evict the lowest-priority entries (lowest `access_count +
    /// age_minutes`) once the cache exceeds `max_entries`. At least one
    /// entry is evicted, bounded above by 10% of `max_entries`.
    fn evict_if_needed(&mut self) {
        if self.entries.len() <= self.max_entries {
            return;
        }
        let now = Utc::now();
        let mut scored: Vec<(String, f64)> = self
            .entries
            .iter()
            .map(|(k, e)| {
                let age_minutes = (now - e.inserted_at).num_seconds() as f64 / 60.0;
                (k.clone(), e.access_count as f64 + age_minutes)
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let target = (self.max_entries / 10).max(1);
        for (name, _) in scored.into_iter().take(target) {
            self.entries.remove(&name);
            self.attributes.remove(&name);
            self.stats.evictions += 1;
        }
    }

    // -- Component discovery cache (§B) -------------------------------------

    #[must_use]
    pub fn component_info(&self, param_prefix: &str) -> Option<ComponentInfo> {
        self.component_info.get(param_prefix).cloned()
    }

    pub fn set_component_info(&mut self, param_prefix: &str, component_name: &str) {
        self.component_info.insert(
            param_prefix.to_owned(),
            ComponentInfo {
                component_name: component_name.to_owned(),
                discovered_at: Utc::now(),
            },
        );
    }

    // -- Bulk operations (§B) ------------------------------------------------

    pub fn get_bulk(&mut self, names: &[String]) -> HashMap<String, Option<(String, u8)>> {
        names
            .iter()
            .map(|n| (n.clone(), self.get(n)))
            .collect()
    }

    pub fn set_bulk(&mut self, entries: &[(String, String, u8)]) {
        for (name, value, data_type) in entries {
            self.set(name, value, *data_type, None);
        }
    }

    // -- Integrity / debug (§B) ----------------------------------------------

    /// Check that every entry's bookkeeping is self-consistent. With a
    /// `HashMap`-backed store there is no bucket/chain invariant to verify,
    /// but we still check that no expired entry has a negative TTL window
    /// recorded, matching the spirit of the original's corruption check.
    pub fn validate_integrity(&self) -> Result<(), CacheError> {
        for (name, e) in &self.entries {
            if e.expires_at < e.inserted_at {
                return Err(CacheError::Corrupt(format!(
                    "entry '{}' expires before it was inserted",
                    name
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn dump_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    // -- Stats ---------------------------------------------------------------

    #[must_use]
    pub fn stats(&self) -> CacheStatsReport {
        let memory_used_bytes: usize = self
            .entries
            .iter()
            .map(|(k, e)| k.len() + e.value.len())
            .sum();
        CacheStatsReport {
            hits: self.stats.hits,
            misses: self.stats.misses,
            evictions: self.stats.evictions,
            timeouts: self.stats.timeouts,
            total_entries: self.entries.len(),
            memory_used_bytes,
        }
    }

    // -- Persistence (§4.2, §6: JSON snapshot) --------------------------------

    pub fn snapshot_to_file(&self, path: &Path) -> Result<(), CacheError> {
        let snapshot = CacheSnapshot {
            entries: self
                .entries
                .iter()
                .map(|(name, e)| SnapshotEntry {
                    name: name.clone(),
                    value: e.value.clone(),
                    data_type: e.data_type,
                    inserted_at: e.inserted_at,
                    expires_at: e.expires_at,
                })
                .collect(),
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| CacheError::Io(e.to_string()))
    }

    pub fn restore_from_file(&mut self, path: &Path) -> Result<usize, CacheError> {
        let json = std::fs::read_to_string(path).map_err(|e| CacheError::Io(e.to_string()))?;
        let snapshot: CacheSnapshot =
            serde_json::from_str(&json).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let now = Utc::now();
        let mut restored = 0;
        for entry in snapshot.entries {
            if entry.expires_at <= now {
                continue;
            }
            self.entries.insert(
                entry.name,
                Entry {
                    value: entry.value,
                    data_type: entry.data_type,
                    inserted_at: entry.inserted_at,
                    expires_at: entry.expires_at,
                    access_count: 0,
                },
            );
            restored += 1;
        }
        Ok(restored)
    }
}

#[derive(Debug)]
pub enum CacheError {
    Io(String),
    Serialization(String),
    Corrupt(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Io(s) => write!(f, "cache I/O error: {}", s),
            CacheError::Serialization(s) => write!(f, "cache serialization error: {}", s),
            CacheError::Corrupt(s) => write!(f, "cache integrity error: {}", s),
        }
    }
}

impl std::error::Error for CacheError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_miss_then_set_then_hit() {
        let mut c = Cache::new(100, Duration::from_secs(60));
        assert!(c.get("Device.X").is_none());
        c.set("Device.X", "1", 1, None);
        assert_eq!(c.get("Device.X"), Some(("1".to_owned(), 1)));
        assert_eq!(c.stats().hits, 1);
        assert_eq!(c.stats().misses, 1);
    }

    #[test]
    fn expired_entry_reads_as_miss() {
        let mut c = Cache::new(100, Duration::from_secs(0));
        c.set("Device.X", "1", 1, Some(Duration::from_millis(0)));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(c.get("Device.X").is_none());
        assert!(c.stats().timeouts >= 1);
    }

    #[test]
    fn wildcard_get_matches_prefix() {
        let mut c = Cache::new(100, Duration::from_secs(60));
        c.set("Device.WiFi.Radio.1.Enable", "true", 3, None);
        c.set("Device.WiFi.Radio.2.Enable", "false", 3, None);
        c.set("Device.Other", "x", 0, None);
        let matches = c.get_wildcard("Device.WiFi.");
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn invalidate_wildcard_removes_matching_entries() {
        let mut c = Cache::new(100, Duration::from_secs(60));
        c.set("Device.WiFi.Radio.1.Enable", "true", 3, None);
        c.set("Device.WiFi.Radio.2.Enable", "false", 3, None);
        assert_eq!(c.invalidate_wildcard("Device.WiFi."), 2);
        assert!(c.get_wildcard("Device.WiFi.").is_empty());
    }

    #[test]
    fn eviction_keeps_cache_within_bound() {
        let mut c = Cache::new(10, Duration::from_secs(600));
        for i in 0..20 {
            c.set(&format!("Device.P{}", i), "v", 0, None);
        }
        assert!(c.dump_entries().len() <= 10);
        assert!(c.stats().evictions > 0);
    }

    #[test]
    fn component_info_has_no_ttl() {
        let mut c = Cache::new(100, Duration::from_secs(0));
        c.set_component_info("Device.WiFi.", "com.example.wifi");
        assert_eq!(
            c.component_info("Device.WiFi.").unwrap().component_name,
            "com.example.wifi"
        );
    }

    #[test]
    fn bulk_get_and_set_round_trip() {
        let mut c = Cache::new(100, Duration::from_secs(60));
        c.set_bulk(&[
            ("Device.A".to_owned(), "1".to_owned(), 1),
            ("Device.B".to_owned(), "2".to_owned(), 1),
        ]);
        let results = c.get_bulk(&["Device.A".to_owned(), "Device.C".to_owned()]);
        assert_eq!(results["Device.A"], Some(("1".to_owned(), 1)));
        assert_eq!(results["Device.C"], None);
    }

    #[test]
    fn validate_integrity_passes_on_fresh_cache() {
        let mut c = Cache::new(100, Duration::from_secs(60));
        c.set("Device.A", "1", 1, None);
        assert!(c.validate_integrity().is_ok());
    }

    #[test]
    fn snapshot_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let mut c = Cache::new(100, Duration::from_secs(60));
        c.set("Device.A", "1", 1, None);
        c.snapshot_to_file(&path).unwrap();

        let mut restored = Cache::new(100, Duration::from_secs(60));
        let count = restored.restore_from_file(&path).unwrap();
        assert_eq!(count, 1);
        assert_eq!(restored.get("Device.A"), Some(("1".to_owned(), 1)));
    }
}
