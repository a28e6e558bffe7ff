//! Disk-backed cache of brew command results.
//!
//! Every logical key maps to one JSON file under the cache directory holding
//! a [`CacheEntry`]: the payload plus the time it was captured. Entries are
//! never deleted for being old; a stale entry stays readable so it can stand
//! in when a fresh fetch fails.
//!
//! The cache is advisory. Nothing here returns an error: a missing or
//! corrupt file reads as absent, and a failed write is logged and dropped.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A payload and the time it was captured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub captured_at: DateTime<Utc>,
    pub payload: T,
}

impl<T> CacheEntry<T> {
    pub fn new(payload: T) -> Self {
        Self::captured_at(payload, Utc::now())
    }

    pub fn captured_at(payload: T, captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            payload,
        }
    }

    /// Age relative to `now`; an entry from the future has age zero
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.captured_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age_at(now) < max_age
    }

    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.is_fresh_at(Utc::now(), max_age)
    }
}

/// First 8 hex digits of the key's SHA-256
fn key_digest(key: &str) -> String {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(key.as_bytes());
    format!("{:x}", digest)[..8].to_string()
}

/// Values that can be "nothing to show yet"
pub trait IsEmpty {
    fn is_empty(&self) -> bool;
}

impl<T> IsEmpty for Vec<T> {
    fn is_empty(&self) -> bool {
        Vec::is_empty(self)
    }
}

impl IsEmpty for String {
    fn is_empty(&self) -> bool {
        String::is_empty(self)
    }
}

impl<T> IsEmpty for Option<T> {
    fn is_empty(&self) -> bool {
        self.is_none()
    }
}

impl<K, V, S> IsEmpty for HashMap<K, V, S> {
    fn is_empty(&self) -> bool {
        HashMap::is_empty(self)
    }
}

impl<K, V> IsEmpty for BTreeMap<K, V> {
    fn is_empty(&self) -> bool {
        BTreeMap::is_empty(self)
    }
}

impl<T, S> IsEmpty for HashSet<T, S> {
    fn is_empty(&self) -> bool {
        HashSet::is_empty(self)
    }
}

impl IsEmpty for serde_json::Value {
    fn is_empty(&self) -> bool {
        match self {
            serde_json::Value::Null => true,
            serde_json::Value::Array(items) => items.is_empty(),
            serde_json::Value::Object(map) => map.is_empty(),
            serde_json::Value::String(s) => s.is_empty(),
            _ => false,
        }
    }
}

/// What to show now, and whether brew needs to be asked
#[derive(Debug, Clone, PartialEq)]
pub struct Restored<T> {
    pub value: T,
    pub needs_fetch: bool,
    /// Capture time of the cache entry consulted, if there was one
    pub captured_at: Option<DateTime<Utc>>,
}

/// One-file-per-key JSON cache
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `key`.
    ///
    /// Filename-safe keys (`[A-Za-z0-9._-]`, not starting with a dot) map to
    /// `<key>.json`. Any other key has the offending characters replaced
    /// with `_` and a digest of the original key appended, so it can neither
    /// escape the cache directory nor share a file with a different key.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let safe = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
        if !key.is_empty() && !key.starts_with('.') && key.chars().all(safe) {
            return self.dir.join(format!("{key}.json"));
        }

        let name: String = key
            .chars()
            .map(|c| if safe(c) { c } else { '_' })
            .collect();
        let name = name.trim_start_matches('.');
        self.dir.join(format!("{name}-{}.json", key_digest(key)))
    }

    /// Read the entry for `key`; missing or unparsable files are absent
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let path = self.path_for(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::debug!(key, %err, "cache miss");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(key, path = %path.display(), %err, "ignoring unreadable cache entry");
                None
            }
        }
    }

    /// Store `value` captured now
    pub fn save<T: Serialize>(&self, key: &str, value: &T) {
        self.save_entry(key, &CacheEntry::new(value));
    }

    /// Store a prepared entry, replacing the file atomically
    pub fn save_entry<T: Serialize>(&self, key: &str, entry: &CacheEntry<T>) {
        if let Err(err) = self.write_atomic(key, entry) {
            tracing::warn!(key, %err, "failed to write cache entry");
        }
    }

    fn write_atomic<T: Serialize>(&self, key: &str, entry: &CacheEntry<T>) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);

        // Temp file lives in the same directory so the rename stays on one
        // filesystem and is atomic
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut tmp, entry)?;
        tmp.flush()?;
        tmp.persist(&path)?;

        tracing::debug!(key, path = %path.display(), "cache entry written");
        Ok(())
    }

    /// Keep the payload but make the entry stale.
    ///
    /// Used after mutating operations: the old data can still be shown while
    /// the next read goes to brew.
    pub fn mark_stale(&self, key: &str) {
        let Some(entry) = self.load::<serde_json::Value>(key) else {
            return;
        };
        let stale = CacheEntry::captured_at(entry.payload, DateTime::<Utc>::UNIX_EPOCH);
        self.save_entry(key, &stale);
    }

    /// Delete the entry for `key`
    pub fn remove(&self, key: &str) {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(key, "cache entry removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(key, %err, "failed to remove cache entry"),
        }
    }

    /// Delete every cache file, returning how many were removed
    pub fn clear(&self) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 0;
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(err) => {
                        tracing::warn!(path = %path.display(), %err, "failed to remove cache file")
                    }
                }
            }
        }
        removed
    }

    /// Decide what to show and whether to fetch.
    ///
    /// - no entry: `current` unchanged, fetch needed
    /// - entry and `current` empty: the cached payload
    /// - entry and `current` populated: `current` unchanged
    ///
    /// With an entry, a fetch is needed when it is stale or `force_refresh`.
    pub fn restore_if_needed<T>(
        &self,
        current: T,
        key: &str,
        max_age: Duration,
        force_refresh: bool,
    ) -> Restored<T>
    where
        T: DeserializeOwned + IsEmpty,
    {
        self.restore_if_needed_at(Utc::now(), current, key, max_age, force_refresh)
    }

    pub fn restore_if_needed_at<T>(
        &self,
        now: DateTime<Utc>,
        current: T,
        key: &str,
        max_age: Duration,
        force_refresh: bool,
    ) -> Restored<T>
    where
        T: DeserializeOwned + IsEmpty,
    {
        let Some(entry) = self.load::<T>(key) else {
            return Restored {
                value: current,
                needs_fetch: true,
                captured_at: None,
            };
        };

        let fresh = entry.is_fresh_at(now, max_age);
        tracing::debug!(key, fresh, force_refresh, "cache entry found");

        let value = if current.is_empty() {
            entry.payload
        } else {
            current
        };

        Restored {
            value,
            needs_fetch: force_refresh || !fresh,
            captured_at: Some(entry.captured_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use tempfile::TempDir;

    const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);

    fn cache() -> (TempDir, DiskCache) {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::new(dir.path().join("cache"));
        (dir, cache)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn save_aged(cache: &DiskCache, key: &str, value: &Vec<String>, minutes: i64) {
        let captured = Utc::now() - TimeDelta::minutes(minutes);
        cache.save_entry(key, &CacheEntry::captured_at(value, captured));
    }

    #[test]
    fn test_load_after_save_round_trip() {
        let (_dir, cache) = cache();
        let value = names(&["wget", "ripgrep"]);
        cache.save("installed", &value);

        let entry: CacheEntry<Vec<String>> = cache.load("installed").unwrap();
        assert_eq!(entry.payload, value);
        assert!(entry.is_fresh(FIVE_MINUTES));
    }

    #[test]
    fn test_save_twice_same_payload() {
        let (_dir, cache) = cache();
        let value = names(&["jq"]);
        cache.save("installed", &value);
        cache.save("installed", &value);

        let entry: CacheEntry<Vec<String>> = cache.load("installed").unwrap();
        assert_eq!(entry.payload, value);

        let files = std::fs::read_dir(cache.dir()).unwrap().count();
        assert_eq!(files, 1, "temp files must not be left behind");
    }

    #[test]
    fn test_missing_file_is_absent() {
        let (_dir, cache) = cache();
        assert!(cache.load::<Vec<String>>("nothing").is_none());
    }

    #[test]
    fn test_corrupt_file_is_absent() {
        let (_dir, cache) = cache();
        std::fs::create_dir_all(cache.dir()).unwrap();
        std::fs::write(cache.path_for("installed"), "{\"captured_at\": 12, \"pay").unwrap();
        assert!(cache.load::<Vec<String>>("installed").is_none());
    }

    #[test]
    fn test_foreign_payload_is_absent() {
        let (_dir, cache) = cache();
        cache.save("installed", &42u32);
        assert!(cache.load::<Vec<String>>("installed").is_none());
    }

    #[test]
    fn test_freshness_depends_on_age_only() {
        let now = Utc::now();
        let entry = CacheEntry::captured_at((), now - TimeDelta::minutes(10));
        assert!(!entry.is_fresh_at(now, FIVE_MINUTES));
        assert!(!entry.is_fresh_at(now, FIVE_MINUTES));
        assert!(entry.is_fresh_at(now, Duration::from_secs(11 * 60)));
        // Exactly max_age old is stale
        assert!(!entry.is_fresh_at(now, Duration::from_secs(10 * 60)));
    }

    #[test]
    fn test_future_timestamp_has_zero_age() {
        let now = Utc::now();
        let entry = CacheEntry::captured_at((), now + TimeDelta::minutes(1));
        assert_eq!(entry.age_at(now), Duration::ZERO);
    }

    #[test]
    fn test_restore_empty_with_stale_entry_uses_cache() {
        let (_dir, cache) = cache();
        let cached = names(&["wget"]);
        save_aged(&cache, "installed", &cached, 10);

        let restored = cache.restore_if_needed(Vec::<String>::new(), "installed", FIVE_MINUTES, false);
        assert_eq!(restored.value, cached);
        assert!(restored.needs_fetch);
        assert!(restored.captured_at.is_some());
    }

    #[test]
    fn test_restore_populated_with_stale_entry_keeps_memory() {
        let (_dir, cache) = cache();
        save_aged(&cache, "installed", &names(&["wget"]), 10);

        let in_memory = names(&["git", "node"]);
        let restored = cache.restore_if_needed(in_memory.clone(), "installed", FIVE_MINUTES, false);
        assert_eq!(restored.value, in_memory);
        assert!(restored.needs_fetch);
    }

    #[test]
    fn test_restore_fresh_entry_skips_fetch() {
        let (_dir, cache) = cache();
        let cached = names(&["wget"]);
        save_aged(&cache, "installed", &cached, 1);

        let restored = cache.restore_if_needed(Vec::<String>::new(), "installed", FIVE_MINUTES, false);
        assert_eq!(restored.value, cached);
        assert!(!restored.needs_fetch);

        let forced = cache.restore_if_needed(Vec::<String>::new(), "installed", FIVE_MINUTES, true);
        assert_eq!(forced.value, cached);
        assert!(forced.needs_fetch);
    }

    #[test]
    fn test_restore_without_entry() {
        let (_dir, cache) = cache();
        let in_memory = names(&["git"]);
        let restored = cache.restore_if_needed(in_memory.clone(), "installed", FIVE_MINUTES, false);
        assert_eq!(restored.value, in_memory);
        assert!(restored.needs_fetch);
        assert!(restored.captured_at.is_none());
    }

    #[test]
    fn test_mark_stale_keeps_payload() {
        let (_dir, cache) = cache();
        let cached = names(&["wget"]);
        cache.save("installed", &cached);

        cache.mark_stale("installed");

        let entry: CacheEntry<Vec<String>> = cache.load("installed").unwrap();
        assert_eq!(entry.payload, cached);
        assert!(!entry.is_fresh(Duration::from_secs(365 * 24 * 60 * 60)));
    }

    #[test]
    fn test_mark_stale_missing_key_is_noop() {
        let (_dir, cache) = cache();
        cache.mark_stale("nothing");
        assert!(!cache.path_for("nothing").exists());
    }

    #[test]
    fn test_remove_and_clear() {
        let (_dir, cache) = cache();
        cache.save("installed", &names(&["a"]));
        cache.save("outdated", &names(&["b"]));
        cache.save("services", &names(&["c"]));

        cache.remove("installed");
        cache.remove("installed");
        assert!(cache.load::<Vec<String>>("installed").is_none());

        assert_eq!(cache.clear(), 2);
        assert!(cache.load::<Vec<String>>("outdated").is_none());
    }

    #[test]
    fn test_clear_missing_dir() {
        let (_dir, cache) = cache();
        assert_eq!(cache.clear(), 0);
    }

    #[test]
    fn test_path_for_sanitizes_keys() {
        let cache = DiskCache::new("/tmp/taproom");
        assert_eq!(cache.path_for("installed"), PathBuf::from("/tmp/taproom/installed.json"));
        assert_eq!(
            cache.path_for("info_wget_1.2"),
            PathBuf::from("/tmp/taproom/info_wget_1.2.json")
        );

        for key in ["../../etc/passwd", "info wget@1.2", "", ".hidden", "a/b"] {
            let path = cache.path_for(key);
            assert_eq!(path.parent(), Some(Path::new("/tmp/taproom")), "{key:?}");
            let name = path.file_name().unwrap().to_str().unwrap();
            assert!(!name.starts_with('.'), "{key:?} -> {name}");
            assert!(name.ends_with(".json"));
        }
        assert!(
            cache
                .path_for("info wget@1.2")
                .to_str()
                .unwrap()
                .starts_with("/tmp/taproom/info_wget_1.2-")
        );
    }

    #[test]
    fn test_distinct_keys_never_share_a_file() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::new(dir.path());
        let keys = ["info wget@1.2", "info_wget_1.2", "info wget 1.2", "a/b", "a_b", "a?b"];

        let mut paths: Vec<_> = keys.iter().map(|k| cache.path_for(k)).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), keys.len());

        for (i, key) in keys.iter().enumerate() {
            cache.save(key, &vec![i.to_string()]);
        }
        for (i, key) in keys.iter().enumerate() {
            let entry: CacheEntry<Vec<String>> = cache.load(key).unwrap();
            assert_eq!(entry.payload, vec![i.to_string()], "{key:?}");
        }
    }

    #[test]
    fn test_key_digest_is_stable() {
        // sha256("") = e3b0c442...
        assert_eq!(key_digest(""), "e3b0c442");
        assert_eq!(key_digest("info wget@1.2"), key_digest("info wget@1.2"));
        assert_ne!(key_digest("a/b"), key_digest("a?b"));
    }

    #[test]
    fn test_json_value_emptiness() {
        assert!(IsEmpty::is_empty(&serde_json::Value::Null));
        assert!(IsEmpty::is_empty(&serde_json::json!([])));
        assert!(IsEmpty::is_empty(&serde_json::json!({})));
        assert!(!IsEmpty::is_empty(&serde_json::json!({"formulae": []})));
        assert!(!IsEmpty::is_empty(&serde_json::json!(0)));
    }
}
