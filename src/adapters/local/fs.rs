use crate::domain::jobs::AudioObject;
use crate::error::{Error, Result};
use crate::ports::storage::{ObjectPage, OutputStore, SourceStore};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Directory-backed store. Object keys are `/`-separated paths under `root`.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if relative.is_absolute() || relative.components().any(|c| c.as_os_str() == "..") {
            return Err(Error::config("key", format!("{key} escapes the store root")));
        }
        Ok(self.root.join(relative))
    }

    async fn walk(&self) -> Result<Vec<(String, u64)>> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    let Ok(relative) = entry.path().strip_prefix(&self.root).map(Path::to_path_buf)
                    else {
                        continue;
                    };
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    found.push((key, entry.metadata().await?.len()));
                }
            }
        }
        found.sort();
        Ok(found)
    }
}

#[async_trait]
impl SourceStore for FsStore {
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
        page_size: usize,
    ) -> Result<ObjectPage> {
        let page_size = page_size.max(1);
        let mut objects: Vec<AudioObject> = self
            .walk()
            .await?
            .into_iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation.as_deref().map_or(true, |after| key.as_str() > after))
            .take(page_size + 1)
            .map(|(key, size)| AudioObject::from_key(key, size, None))
            .collect();

        let next_token = if objects.len() > page_size {
            objects.pop();
            objects.last().map(|o| o.key.clone())
        } else {
            None
        };
        Ok(ObjectPage {
            objects,
            next_token,
        })
    }

    async fn get(&self, object: &AudioObject) -> Result<Bytes> {
        let path = self.path_for(&object.key)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| Error::source_fetch(&object.key, e))
    }
}

#[async_trait]
impl OutputStore for FsStore {
    async fn put_bytes(&self, key: &str, body: Bytes, _content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        tokio::fs::create_dir_all(&parent).await?;

        // Write beside the target and rename so readers never see a partial file.
        let staged = tempfile::NamedTempFile::new_in(&parent)?;
        tokio::fs::write(staged.path(), &body).await?;
        staged
            .persist(&path)
            .map_err(|e| Error::sink_write(key, e.error))?;
        Ok(())
    }

    async fn put_json(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec_pretty(value)?;
        self.put_bytes(key, Bytes::from(body), "application/json").await
    }

    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(Some(serde_json::from_slice(&body)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .walk()
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::sink_write(key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_lists_nested_files_as_slash_keys() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("amdo/sub")).unwrap();
        std::fs::write(dir.path().join("amdo/file001.wav"), b"abc").unwrap();
        std::fs::write(dir.path().join("amdo/sub/file002.mp3"), b"abcd").unwrap();
        std::fs::write(dir.path().join("loose.wav"), b"a").unwrap();

        let store = FsStore::new(dir.path());
        let page = store.list_page("amdo/", None, 10).await.unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["amdo/file001.wav", "amdo/sub/file002.mp3"]);
        assert_eq!(page.objects[0].size, 3);
        assert_eq!(page.objects[0].collection, "amdo");
        assert_eq!(page.next_token, None);
    }

    #[tokio::test]
    async fn test_pages_with_continuation() {
        let dir = tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("f{i}.wav")), b"x").unwrap();
        }
        let store = FsStore::new(dir.path());
        let first = store.list_page("", None, 2).await.unwrap();
        assert_eq!(first.objects.len(), 2);
        let second = store.list_page("", first.next_token, 2).await.unwrap();
        assert_eq!(second.objects[0].key, "f2.wav");
    }

    #[tokio::test]
    async fn test_put_creates_directories_and_overwrites() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store
            .put_bytes("out/job/segment_00000.wav", Bytes::from_static(b"one"), "audio/wav")
            .await
            .unwrap();
        store
            .put_bytes("out/job/segment_00000.wav", Bytes::from_static(b"two"), "audio/wav")
            .await
            .unwrap();
        let written = std::fs::read(dir.path().join("out/job/segment_00000.wav")).unwrap();
        assert_eq!(written, b"two");
    }

    #[tokio::test]
    async fn test_delete_removes_only_the_named_key() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());
        for i in 0..3 {
            store
                .put_bytes(&format!("job/segment_{i:05}.wav"), Bytes::from_static(b"x"), "audio/wav")
                .await
                .unwrap();
        }
        store.delete("job/segment_00002.wav").await.unwrap();
        store.delete("job/segment_00009.wav").await.unwrap();

        let keys = store.list_keys("job/").await.unwrap();
        assert_eq!(keys, vec!["job/segment_00000.wav", "job/segment_00001.wav"]);
    }

    #[tokio::test]
    async fn test_missing_json_is_none() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert_eq!(store.get_json("job/metadata.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_keys_outside_root() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let object = AudioObject::from_key("../etc/passwd", 0, None);
        assert!(store.get(&object).await.is_err());
    }
}
