//! In-memory store for exercising reconcilers in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::Resource;

use crate::store::{ObjectKey, ObjectStore, StoreError};

/// Object store over a plain map.
///
/// Stores exactly what it is given, counts every attempted operation, and
/// can be armed to fail the next operation of each kind. Create on an
/// existing key fails `AlreadyExists` and update on a missing key fails
/// `NotFound`, so races the real store would reject are representable.
pub struct FakeStore<K> {
    objects: Mutex<HashMap<ObjectKey, K>>,
    fetches: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    fetch_error: Mutex<Option<StoreError>>,
    create_error: Mutex<Option<StoreError>>,
    update_error: Mutex<Option<StoreError>>,
}

impl<K> Default for FakeStore<K> {
    fn default() -> Self {
        FakeStore {
            objects: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            fetch_error: Mutex::new(None),
            create_error: Mutex::new(None),
            update_error: Mutex::new(None),
        }
    }
}

impl<K> FakeStore<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fetch attempts so far, armed failures included.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of create attempts so far.
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of update attempts so far.
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Arms the store to fail the next fetch with `err`. One-shot.
    pub fn fail_next_fetch(&self, err: StoreError) {
        *self.fetch_error.lock().unwrap() = Some(err);
    }

    /// Arms the store to fail the next create with `err`. One-shot.
    pub fn fail_next_create(&self, err: StoreError) {
        *self.create_error.lock().unwrap() = Some(err);
    }

    /// Arms the store to fail the next update with `err`. One-shot.
    pub fn fail_next_update(&self, err: StoreError) {
        *self.update_error.lock().unwrap() = Some(err);
    }
}

impl<K: Resource + Clone> FakeStore<K> {
    /// Seeds an existing object, keyed by its metadata.
    pub fn insert(&self, object: K) {
        let key = ObjectKey::from_meta(object.meta()).expect("seed object needs a name");
        self.objects.lock().unwrap().insert(key, object);
    }

    /// Snapshot of the stored object under `key`, if any.
    pub fn get(&self, key: &ObjectKey) -> Option<K> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<K> ObjectStore<K> for FakeStore<K>
where
    K: Resource + Clone + Send + Sync,
{
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fetch_error.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn create(&self, object: &K) -> Result<(), StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.create_error.lock().unwrap().take() {
            return Err(err);
        }
        let key = ObjectKey::from_meta(object.meta())
            .ok_or_else(|| StoreError::Invalid("missing .metadata.name".to_owned()))?;
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        objects.insert(key, object.clone());
        Ok(())
    }

    async fn update(&self, object: &K) -> Result<(), StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.update_error.lock().unwrap().take() {
            return Err(err);
        }
        let key = ObjectKey::from_meta(object.meta())
            .ok_or_else(|| StoreError::Invalid("missing .metadata.name".to_owned()))?;
        let mut objects = self.objects.lock().unwrap();
        if !objects.contains_key(&key) {
            return Err(StoreError::NotFound);
        }
        objects.insert(key, object.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn cm(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some("default".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_enforces_uniqueness() {
        let store = FakeStore::new();
        store.create(&cm("a")).await.unwrap();
        let err = store.create(&cm("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn update_requires_existing_object() {
        let store = FakeStore::new();
        let err = store.update(&cm("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn armed_failure_fires_once() {
        let store = FakeStore::new();
        store.insert(cm("a"));
        store.fail_next_fetch(StoreError::Timeout);

        let key = ObjectKey {
            name: "a".to_owned(),
            namespace: Some("default".to_owned()),
        };
        let armed = store.fetch(&key).await;
        assert!(matches!(armed, Err(StoreError::Timeout)));
        assert!(store.fetch(&key).await.unwrap().is_some());
        assert_eq!(store.fetches(), 2);
    }
}
