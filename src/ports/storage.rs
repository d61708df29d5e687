use crate::domain::jobs::AudioObject;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// One page of a source listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectPage {
    pub objects: Vec<AudioObject>,
    /// Opaque continuation token; `None` on the last page.
    pub next_token: Option<String>,
}

/// Read-only access to the raw audio store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// List objects under `prefix`, one page at a time.
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
        page_size: usize,
    ) -> Result<ObjectPage>;

    /// Fetch the full contents of an object.
    async fn get(&self, object: &AudioObject) -> Result<Bytes>;
}

/// Write access to the segment store. Every put overwrites.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutputStore: Send + Sync {
    async fn put_bytes(&self, key: &str, body: Bytes, content_type: &str) -> Result<()>;

    async fn put_json(&self, key: &str, value: &serde_json::Value) -> Result<()>;

    /// Read back a JSON object, `None` when the key does not exist.
    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Every key under `prefix`, in lexicographic order.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove an object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}
