use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::auth::storage::KeyValueStore;

/// Consider cached progress stale after 1 hour.
const CACHE_STALE_MINUTES: i64 = 60;

/// Key prefix shared by every cached entry belonging to `user_id`
pub fn progress_prefix(user_id: i64) -> String {
    format!("progress_{}_", user_id)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        let now = Utc::now();
        (now - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Clock skew lands here too
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }

    pub fn is_stale(&self) -> bool {
        self.age_minutes() > CACHE_STALE_MINUTES
    }
}

/// Per-user cache living in the same store as the credential.
#[derive(Clone)]
pub struct ProgressCache {
    storage: Arc<dyn KeyValueStore>,
}

impl ProgressCache {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    fn key(user_id: i64, name: &str) -> String {
        format!("{}{}", progress_prefix(user_id), name)
    }

    pub fn load<T: DeserializeOwned>(
        &self,
        user_id: i64,
        name: &str,
    ) -> Result<Option<CachedData<T>>> {
        let Some(contents) = self.storage.get(&Self::key(user_id, name))? else {
            return Ok(None);
        };
        let cached: CachedData<T> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cached entry: {}", name))?;
        Ok(Some(cached))
    }

    pub fn save<T: Serialize>(&self, user_id: i64, name: &str, data: &T) -> Result<()> {
        let cached = CachedData::new(data);
        let contents = serde_json::to_string(&cached)?;
        self.storage.set(&Self::key(user_id, name), contents)?;
        debug!(user_id, cache = name, "Progress cached");
        Ok(())
    }

    /// Age of an entry for status display, `None` if missing or unreadable
    pub fn age(&self, user_id: i64, name: &str) -> Option<String> {
        match self.load::<serde_json::Value>(user_id, name) {
            Ok(Some(cached)) => Some(cached.age_display()),
            Ok(None) => None,
            Err(e) => {
                debug!(cache = name, error = %e, "Failed to load cache for age display");
                None
            }
        }
    }

    pub fn clear_user(&self, user_id: i64) -> Result<()> {
        self.storage.remove_prefix(&progress_prefix(user_id))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemoryStore;
    use chrono::Duration;

    #[test]
    fn test_cached_data_age_display_just_now() {
        let cached = CachedData::new(vec![1, 2, 3]);
        assert_eq!(cached.age_display(), "just now");
    }

    #[test]
    fn test_cached_data_age_display_rounding() {
        let mut cached = CachedData::new(());
        cached.cached_at = Utc::now() - Duration::minutes(95);
        assert_eq!(cached.age_display(), "2h ago");
        cached.cached_at = Utc::now() - Duration::minutes(65);
        assert_eq!(cached.age_display(), "1h ago");
        cached.cached_at = Utc::now() - Duration::hours(40);
        assert_eq!(cached.age_display(), "2d ago");
        cached.cached_at = Utc::now() + Duration::minutes(5);
        assert_eq!(cached.age_display(), "just now");
    }

    #[test]
    fn test_cached_data_is_stale() {
        let fresh = CachedData::new(vec![1]);
        assert!(!fresh.is_stale());

        let mut old = CachedData::new(vec![1]);
        old.cached_at = Utc::now() - Duration::minutes(61);
        assert!(old.is_stale());
    }

    #[test]
    fn test_progress_round_trip_and_clear() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let cache = ProgressCache::new(Arc::clone(&storage));
        cache.save(3, "solved", &vec![101, 102]).unwrap();
        cache.save(4, "solved", &vec![7]).unwrap();

        let loaded: CachedData<Vec<i32>> = cache.load(3, "solved").unwrap().unwrap();
        assert_eq!(loaded.data, vec![101, 102]);
        assert_eq!(cache.age(3, "solved").as_deref(), Some("just now"));

        cache.clear_user(3).unwrap();
        assert!(cache.load::<Vec<i32>>(3, "solved").unwrap().is_none());
        assert!(cache.load::<Vec<i32>>(4, "solved").unwrap().is_some());
    }
}
