use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::storage;

const FAVORITES_FILE: &str = "favorites.json";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FavoriteEntry {
    pub path: String,
    pub added_date: String,
    /// Query text that surfaced this item, when there was one.
    #[serde(default)]
    pub query: String,
}

/// user -> favorites in insertion order
type FavoritesState = BTreeMap<String, Vec<FavoriteEntry>>;

#[derive(Debug, thiserror::Error)]
pub enum FavoriteError {
    #[error("storage error: {0}")]
    Storage(String),
}

pub struct FavoritesStore {
    favorites: FavoritesState,
    base_path: String,
}

impl FavoritesStore {
    pub fn load(base_path: &str) -> Result<Self, FavoriteError> {
        let store = storage::BackendLocal::new(base_path)
            .map_err(|e| FavoriteError::Storage(e.to_string()))?;

        if !store.exists(FAVORITES_FILE) {
            store
                .write(FAVORITES_FILE, b"{}")
                .map_err(|e| FavoriteError::Storage(e.to_string()))?;
        }

        let data = store
            .read(FAVORITES_FILE)
            .map_err(|e| FavoriteError::Storage(e.to_string()))?;
        let favorites = match serde_json::from_slice::<FavoritesState>(&data) {
            Ok(state) => state,
            Err(e) => {
                log::warn!("unreadable {FAVORITES_FILE}, starting empty: {e}");
                FavoritesState::new()
            }
        };

        Ok(Self {
            favorites,
            base_path: base_path.to_string(),
        })
    }

    fn save(&self) -> Result<(), FavoriteError> {
        let store = storage::BackendLocal::new(&self.base_path)
            .map_err(|e| FavoriteError::Storage(e.to_string()))?;
        let json = serde_json::to_string_pretty(&self.favorites)
            .map_err(|e| FavoriteError::Storage(e.to_string()))?;
        store
            .write(FAVORITES_FILE, json.as_bytes())
            .map_err(|e| FavoriteError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn list(&self, user: &str) -> Vec<FavoriteEntry> {
        self.favorites.get(user).cloned().unwrap_or_default()
    }

    /// Record a favorite. Returns `false` without touching disk when the
    /// path is already on the user's list.
    pub fn add(&mut self, user: &str, path: &str, query: &str) -> Result<bool, FavoriteError> {
        let entries = self.favorites.entry(user.to_string()).or_default();
        if entries.iter().any(|entry| entry.path == path) {
            return Ok(false);
        }

        entries.push(FavoriteEntry {
            path: path.to_string(),
            added_date: Utc::now().to_rfc3339(),
            query: query.to_string(),
        });
        self.save()?;
        Ok(true)
    }

    /// Drop a favorite by path. Returns whether anything was removed.
    pub fn remove(&mut self, user: &str, path: &str) -> Result<bool, FavoriteError> {
        let Some(entries) = self.favorites.get_mut(user) else {
            return Ok(false);
        };

        let before = entries.len();
        entries.retain(|entry| entry.path != path);
        if entries.len() == before {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn tmp_dir() -> String {
        let c = COUNTER.fetch_add(1, Ordering::SeqCst);
        let p = std::env::temp_dir().join(format!("fovea-fav-test-{}-{}", std::process::id(), c));
        std::fs::create_dir_all(&p).unwrap();
        p.to_str().unwrap().to_string()
    }

    #[test]
    fn load_creates_empty_file_if_absent() {
        let dir = tmp_dir();
        let store = FavoritesStore::load(&dir).unwrap();
        assert!(store.list("default").is_empty());
        assert!(std::path::Path::new(&dir).join("favorites.json").exists());
    }

    #[test]
    fn add_reports_duplicates() {
        let dir = tmp_dir();
        let mut store = FavoritesStore::load(&dir).unwrap();

        assert!(store.add("default", "cat.png", "cats").unwrap());
        assert!(!store.add("default", "cat.png", "more cats").unwrap());

        let listed = store.list("default");
        assert_eq!(listed.len(), 1);
        // The original entry survives a duplicate add untouched.
        assert_eq!(listed[0].query, "cats");
    }

    #[test]
    fn add_and_reload_roundtrip() {
        let dir = tmp_dir();
        let mut store = FavoritesStore::load(&dir).unwrap();
        store.add("default", "a.png", "sunset").unwrap();
        store.add("default", "b.png", "").unwrap();

        let store2 = FavoritesStore::load(&dir).unwrap();
        let listed = store2.list("default");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].path, "a.png");
        assert_eq!(listed[0].query, "sunset");
        assert_eq!(listed[1].path, "b.png");
        assert!(chrono::DateTime::parse_from_rfc3339(&listed[0].added_date).is_ok());
    }

    #[test]
    fn remove_reports_whether_removed() {
        let dir = tmp_dir();
        let mut store = FavoritesStore::load(&dir).unwrap();
        store.add("default", "a.png", "").unwrap();

        assert!(store.remove("default", "a.png").unwrap());
        assert!(!store.remove("default", "a.png").unwrap());
        assert!(!store.remove("ghost-user", "a.png").unwrap());
        assert!(store.list("default").is_empty());
    }

    #[test]
    fn users_are_isolated() {
        let dir = tmp_dir();
        let mut store = FavoritesStore::load(&dir).unwrap();
        store.add("alice", "a.png", "").unwrap();
        store.add("bob", "b.png", "").unwrap();

        assert_eq!(store.list("alice").len(), 1);
        assert_eq!(store.list("alice")[0].path, "a.png");
        assert_eq!(store.list("bob")[0].path, "b.png");
        assert!(store.list("carol").is_empty());
    }

    #[test]
    fn missing_query_field_defaults_empty() {
        let dir = tmp_dir();
        let json = r#"{
  "default": [
    { "path": "old.png", "added_date": "2024-01-01T00:00:00+00:00" }
  ]
}"#;
        std::fs::write(std::path::Path::new(&dir).join("favorites.json"), json).unwrap();

        let store = FavoritesStore::load(&dir).unwrap();
        let listed = store.list("default");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].query, "");
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tmp_dir();
        std::fs::write(std::path::Path::new(&dir).join("favorites.json"), "[oops").unwrap();
        let store = FavoritesStore::load(&dir).unwrap();
        assert!(store.list("default").is_empty());
    }

    #[test]
    fn persisted_shape_is_user_keyed_array() {
        let dir = tmp_dir();
        let mut store = FavoritesStore::load(&dir).unwrap();
        store.add("default", "x.png", "query text").unwrap();

        let raw =
            std::fs::read_to_string(std::path::Path::new(&dir).join("favorites.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &value["default"][0];
        assert_eq!(entry["path"], "x.png");
        assert_eq!(entry["query"], "query text");
        assert!(entry["added_date"].is_string());
    }
}
