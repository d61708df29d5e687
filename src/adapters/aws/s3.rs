use super::classify;
use crate::domain::jobs::AudioObject;
use crate::error::{Error, Result};
use crate::ports::storage::{ObjectPage, OutputStore, SourceStore};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;

/// S3Store implements the source and output store ports for one bucket.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl SourceStore for S3Store {
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
        page_size: usize,
    ) -> Result<ObjectPage> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(page_size.clamp(1, 1000) as i32)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| classify(e, Error::Catalog))?;

        let objects = resp
            .contents()
            .iter()
            .filter_map(|object| {
                let key = object.key()?;
                let size = object.size().unwrap_or(0).max(0) as u64;
                let etag = object.e_tag().map(|t| t.trim_matches('"').to_string());
                Some(AudioObject::from_key(key, size, etag))
            })
            .collect();

        let next_token = if resp.is_truncated().unwrap_or(false) {
            resp.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        Ok(ObjectPage {
            objects,
            next_token,
        })
    }

    async fn get(&self, object: &AudioObject) -> Result<Bytes> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object.key)
            .send()
            .await
            .map_err(|e| classify(e, |m| Error::source_fetch(&object.key, m)))?;

        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| Error::source_fetch(&object.key, e))?;
        Ok(body.into_bytes())
    }
}

#[async_trait]
impl OutputStore for S3Store {
    async fn put_bytes(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| classify(e, |m| Error::sink_write(key, m)))?;
        Ok(())
    }

    async fn put_json(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec_pretty(value)?;
        self.put_bytes(key, Bytes::from(body), "application/json").await
    }

    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.as_service_error().is_some_and(|s| s.is_no_such_key()) => return Ok(None),
            Err(e) => return Err(classify(e, |m| Error::source_fetch(key, m))),
        };
        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| Error::source_fetch(key, e))?;
        Ok(Some(serde_json::from_slice(&body.into_bytes())?))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation = None;
        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation)
                .send()
                .await
                .map_err(|e| classify(e, Error::Catalog))?;
            keys.extend(resp.contents().iter().filter_map(|o| o.key().map(str::to_string)));
            continuation = match resp.next_continuation_token() {
                Some(token) if resp.is_truncated().unwrap_or(false) => Some(token.to_string()),
                _ => break,
            };
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, |m| Error::sink_write(key, m)))?;
        Ok(())
    }
}
