use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::storage;

const COLLECTIONS_FILE: &str = "collections.json";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Collection {
    /// Map key in the persisted file, filled in after deserialization.
    #[serde(skip)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: String,
    #[serde(default)]
    pub images: Vec<String>,
}

/// user -> collection id -> collection
type CollectionsState = BTreeMap<String, BTreeMap<String, Collection>>;

#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("collection name must be non-empty and at most 100 characters")]
    InvalidName,
    #[error("collection not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

pub struct CollectionStore {
    collections: CollectionsState,
    base_path: String,
}

impl CollectionStore {
    pub fn load(base_path: &str) -> Result<Self, CollectionError> {
        let store = storage::BackendLocal::new(base_path)
            .map_err(|e| CollectionError::Storage(e.to_string()))?;

        if !store.exists(COLLECTIONS_FILE) {
            store
                .write(COLLECTIONS_FILE, b"{}")
                .map_err(|e| CollectionError::Storage(e.to_string()))?;
        }

        let data = store
            .read(COLLECTIONS_FILE)
            .map_err(|e| CollectionError::Storage(e.to_string()))?;
        let collections = match serde_json::from_slice::<CollectionsState>(&data) {
            Ok(mut state) => {
                for user_map in state.values_mut() {
                    for (id, collection) in user_map.iter_mut() {
                        collection.id = id.clone();
                    }
                }
                state
            }
            Err(e) => {
                log::warn!("unreadable {COLLECTIONS_FILE}, starting empty: {e}");
                CollectionsState::new()
            }
        };

        Ok(Self {
            collections,
            base_path: base_path.to_string(),
        })
    }

    fn save(&self) -> Result<(), CollectionError> {
        let store = storage::BackendLocal::new(&self.base_path)
            .map_err(|e| CollectionError::Storage(e.to_string()))?;
        let json = serde_json::to_string_pretty(&self.collections)
            .map_err(|e| CollectionError::Storage(e.to_string()))?;
        store
            .write(COLLECTIONS_FILE, json.as_bytes())
            .map_err(|e| CollectionError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn list(&self, user: &str) -> Vec<Collection> {
        self.collections
            .get(user)
            .map(|user_map| user_map.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, user: &str, id: &str) -> Option<Collection> {
        self.collections.get(user)?.get(id).cloned()
    }

    /// Member identifiers of a collection, empty when the collection does
    /// not exist.
    pub fn images(&self, user: &str, id: &str) -> Vec<String> {
        self.get(user, id)
            .map(|collection| collection.images)
            .unwrap_or_default()
    }

    pub fn create(
        &mut self,
        user: &str,
        name: &str,
        description: &str,
    ) -> Result<Collection, CollectionError> {
        let name = validate_name(name)?;
        let user_map = self.collections.entry(user.to_string()).or_default();

        let slug = name.to_lowercase().replace(' ', "_");
        let mut counter = user_map.len();
        let mut id = format!("{slug}_{counter}");
        while user_map.contains_key(&id) {
            counter += 1;
            id = format!("{slug}_{counter}");
        }

        let collection = Collection {
            id: id.clone(),
            name,
            description: description.to_string(),
            created_at: Utc::now().to_rfc3339(),
            images: Vec::new(),
        };

        user_map.insert(id, collection.clone());
        self.save()?;
        Ok(collection)
    }

    /// Add an identifier to a collection. Returns `false` without touching
    /// disk when the identifier is already a member.
    pub fn add_image(
        &mut self,
        user: &str,
        id: &str,
        image: &str,
    ) -> Result<bool, CollectionError> {
        let collection = self
            .collections
            .get_mut(user)
            .and_then(|user_map| user_map.get_mut(id))
            .ok_or_else(|| CollectionError::NotFound(id.to_string()))?;

        if collection.images.iter().any(|member| member == image) {
            return Ok(false);
        }
        collection.images.push(image.to_string());
        self.save()?;
        Ok(true)
    }

    pub fn remove(&mut self, user: &str, id: &str) -> Result<(), CollectionError> {
        let user_map = self
            .collections
            .get_mut(user)
            .ok_or_else(|| CollectionError::NotFound(id.to_string()))?;
        user_map
            .remove(id)
            .ok_or_else(|| CollectionError::NotFound(id.to_string()))?;
        self.save()?;
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<String, CollectionError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().count() > 100 {
        return Err(CollectionError::InvalidName);
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn tmp_dir() -> String {
        let c = COUNTER.fetch_add(1, Ordering::SeqCst);
        let p = std::env::temp_dir().join(format!("fovea-coll-test-{}-{}", std::process::id(), c));
        std::fs::create_dir_all(&p).unwrap();
        p.to_str().unwrap().to_string()
    }

    #[test]
    fn load_creates_empty_file_if_absent() {
        let dir = tmp_dir();
        let store = CollectionStore::load(&dir).unwrap();
        assert!(store.list("default").is_empty());
        assert!(std::path::Path::new(&dir).join("collections.json").exists());
    }

    #[test]
    fn load_existing_file() {
        let dir = tmp_dir();
        let json = r#"{
  "default": {
    "trip_0": {
      "name": "Trip",
      "description": "summer",
      "created_at": "2024-06-01T12:00:00+00:00",
      "images": ["a.png"]
    }
  }
}"#;
        std::fs::write(std::path::Path::new(&dir).join("collections.json"), json).unwrap();

        let store = CollectionStore::load(&dir).unwrap();
        let listed = store.list("default");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "trip_0");
        assert_eq!(listed[0].name, "Trip");
        assert_eq!(listed[0].images, vec!["a.png"]);
    }

    #[test]
    fn create_assigns_slug_ids() {
        let dir = tmp_dir();
        let mut store = CollectionStore::load(&dir).unwrap();

        let first = store.create("default", "My Trip", "").unwrap();
        assert_eq!(first.id, "my_trip_0");

        let second = store.create("default", "My Trip", "").unwrap();
        assert_eq!(second.id, "my_trip_1");
    }

    #[test]
    fn create_and_reload_roundtrip() {
        let dir = tmp_dir();
        let mut store = CollectionStore::load(&dir).unwrap();
        let created = store.create("default", "Sunsets", "evening shots").unwrap();
        store
            .add_image("default", &created.id, "beach.png")
            .unwrap();

        let store2 = CollectionStore::load(&dir).unwrap();
        let found = store2.get("default", &created.id).unwrap();
        assert_eq!(found.name, "Sunsets");
        assert_eq!(found.description, "evening shots");
        assert_eq!(found.images, vec!["beach.png"]);
        assert_eq!(found.id, created.id);
    }

    #[test]
    fn created_at_is_rfc3339() {
        let dir = tmp_dir();
        let mut store = CollectionStore::load(&dir).unwrap();
        let created = store.create("default", "Stamps", "").unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&created.created_at).is_ok());
    }

    #[test]
    fn add_image_is_idempotent() {
        let dir = tmp_dir();
        let mut store = CollectionStore::load(&dir).unwrap();
        let created = store.create("default", "Pets", "").unwrap();

        assert!(store.add_image("default", &created.id, "cat.png").unwrap());
        assert!(!store.add_image("default", &created.id, "cat.png").unwrap());
        assert_eq!(store.images("default", &created.id), vec!["cat.png"]);
    }

    #[test]
    fn add_image_to_missing_collection() {
        let dir = tmp_dir();
        let mut store = CollectionStore::load(&dir).unwrap();
        let err = store.add_image("default", "nope_0", "cat.png").unwrap_err();
        assert!(matches!(err, CollectionError::NotFound(_)));
    }

    #[test]
    fn images_of_missing_collection_is_empty() {
        let dir = tmp_dir();
        let store = CollectionStore::load(&dir).unwrap();
        assert!(store.images("default", "nope_0").is_empty());
    }

    #[test]
    fn remove_existing() {
        let dir = tmp_dir();
        let mut store = CollectionStore::load(&dir).unwrap();
        let created = store.create("default", "Temp", "").unwrap();
        store.remove("default", &created.id).unwrap();
        assert!(store.get("default", &created.id).is_none());

        let store2 = CollectionStore::load(&dir).unwrap();
        assert!(store2.get("default", &created.id).is_none());
    }

    #[test]
    fn remove_nonexistent_returns_not_found() {
        let dir = tmp_dir();
        let mut store = CollectionStore::load(&dir).unwrap();
        let err = store.remove("default", "nope_0").unwrap_err();
        assert!(matches!(err, CollectionError::NotFound(_)));
    }

    #[test]
    fn users_are_isolated() {
        let dir = tmp_dir();
        let mut store = CollectionStore::load(&dir).unwrap();
        let alices = store.create("alice", "Trip", "").unwrap();
        store.add_image("alice", &alices.id, "alice.png").unwrap();
        let bobs = store.create("bob", "Trip", "").unwrap();

        // Same name yields the same id per user, but contents stay apart.
        assert_eq!(alices.id, bobs.id);
        assert_eq!(store.images("alice", &alices.id), vec!["alice.png"]);
        assert!(store.images("bob", &bobs.id).is_empty());
        assert!(store.get("carol", &alices.id).is_none());
    }

    #[test]
    fn empty_name_rejected() {
        let dir = tmp_dir();
        let mut store = CollectionStore::load(&dir).unwrap();
        let err = store.create("default", "   ", "").unwrap_err();
        assert!(matches!(err, CollectionError::InvalidName));
    }

    #[test]
    fn long_name_rejected() {
        let dir = tmp_dir();
        let mut store = CollectionStore::load(&dir).unwrap();
        let name = "a".repeat(101);
        let err = store.create("default", &name, "").unwrap_err();
        assert!(matches!(err, CollectionError::InvalidName));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tmp_dir();
        std::fs::write(
            std::path::Path::new(&dir).join("collections.json"),
            "not json at all {",
        )
        .unwrap();

        let store = CollectionStore::load(&dir).unwrap();
        assert!(store.list("default").is_empty());
    }

    #[test]
    fn persisted_shape_is_user_keyed() {
        let dir = tmp_dir();
        let mut store = CollectionStore::load(&dir).unwrap();
        let created = store.create("default", "Shape Check", "desc").unwrap();
        store.add_image("default", &created.id, "x.png").unwrap();

        let raw = std::fs::read_to_string(std::path::Path::new(&dir).join("collections.json"))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &value["default"][&created.id];
        assert_eq!(entry["name"], "Shape Check");
        assert_eq!(entry["description"], "desc");
        assert!(entry["created_at"].is_string());
        assert_eq!(entry["images"][0], "x.png");
        // The id lives in the map key only
        assert!(entry.get("id").is_none());
    }

    #[test]
    fn concurrent_access_no_panic() {
        let dir = tmp_dir();
        let store = std::sync::Arc::new(std::sync::RwLock::new(
            CollectionStore::load(&dir).unwrap(),
        ));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let s = store.clone();
                std::thread::spawn(move || {
                    let mut guard = s.write().unwrap();
                    guard.create("default", &format!("coll-{i}"), "").unwrap();
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let guard = store.read().unwrap();
        assert_eq!(guard.list("default").len(), 4);
    }
}
