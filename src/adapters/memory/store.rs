use crate::domain::jobs::AudioObject;
use crate::error::{Error, Result};
use crate::ports::storage::{ObjectPage, OutputStore, SourceStore};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    content_type: String,
}

/// Key-ordered object store. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, key: impl Into<String>, body: impl Into<Bytes>) {
        self.lock().insert(
            key.into(),
            StoredObject {
                body: body.into(),
                content_type: "application/octet-stream".to_string(),
            },
        );
    }

    pub fn get_bytes(&self, key: &str) -> Option<Bytes> {
        self.lock().get(key).map(|o| o.body.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.lock().get(key).map(|o| o.content_type.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
        page_size: usize,
    ) -> Result<ObjectPage> {
        let objects = self.lock();
        let mut page: Vec<AudioObject> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation.as_deref().map_or(true, |after| key.as_str() > after))
            .take(page_size.max(1) + 1)
            .map(|(key, object)| AudioObject::from_key(key.clone(), object.body.len() as u64, None))
            .collect();

        let next_token = if page.len() > page_size.max(1) {
            page.pop();
            page.last().map(|o| o.key.clone())
        } else {
            None
        };
        Ok(ObjectPage {
            objects: page,
            next_token,
        })
    }

    async fn get(&self, object: &AudioObject) -> Result<Bytes> {
        self.get_bytes(&object.key)
            .ok_or_else(|| Error::source_fetch(&object.key, "no such key"))
    }
}

#[async_trait]
impl OutputStore for MemoryStore {
    async fn put_bytes(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        self.lock().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn put_json(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec_pretty(value)?;
        self.put_bytes(key, Bytes::from(body), "application/json").await
    }

    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>> {
        match self.get_bytes(key) {
            Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
            None => Ok(None),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.keys_with_prefix(prefix))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}
