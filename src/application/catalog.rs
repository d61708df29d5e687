//! Source catalog listing.
//!
//! [`CatalogLister::list`] returns a lazy stream over the source store. Pages
//! are fetched only as the stream is polled; an error is yielded once and ends
//! the stream, so a consumer never mistakes a truncated listing for a complete one.

use crate::domain::jobs::{AudioObject, ROOT_COLLECTION};
use crate::error::Result;
use crate::ports::storage::SourceStore;
use futures::stream::{self, Stream};
use regex::Regex;
use std::collections::VecDeque;
use std::sync::Arc;

pub const DEFAULT_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "ogg", "flac"];
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct CatalogQuery {
    /// Collections to list; empty means all.
    pub collections: Vec<String>,
    /// Lowercase extensions without the dot; empty accepts any.
    pub extensions: Vec<String>,
    pub key_pattern: Option<Regex>,
    /// Matching objects to skip before the first one yielded.
    pub offset: usize,
    pub limit: Option<usize>,
    pub page_size: usize,
}

impl Default for CatalogQuery {
    fn default() -> Self {
        Self {
            collections: Vec::new(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            key_pattern: None,
            offset: 0,
            limit: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl CatalogQuery {
    pub fn collections<I, T>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.collections = collections.into_iter().map(Into::into).collect();
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn key_pattern(mut self, pattern: Option<Regex>) -> Self {
        self.key_pattern = pattern;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn any_extension(mut self) -> Self {
        self.extensions.clear();
        self
    }

    pub fn matches(&self, object: &AudioObject) -> bool {
        if object.key.ends_with('/') {
            return false;
        }
        if !self.collections.is_empty() && !self.collections.contains(&object.collection) {
            return false;
        }
        if !self.extensions.is_empty() {
            match object.extension() {
                Some(ext) if self.extensions.contains(&ext) => {}
                _ => return false,
            }
        }
        self.key_pattern
            .as_ref()
            .map_or(true, |pattern| pattern.is_match(&object.key))
    }

    /// Store prefixes that cover the requested collections.
    fn prefixes(&self) -> VecDeque<String> {
        if self.collections.is_empty() || self.collections.iter().any(|c| c == ROOT_COLLECTION) {
            return VecDeque::from([String::new()]);
        }
        let mut prefixes: Vec<String> = self
            .collections
            .iter()
            .map(|c| format!("{}/", c.trim_matches('/')))
            .collect();
        prefixes.sort();
        prefixes.dedup();
        prefixes.into()
    }
}

struct Cursor {
    prefixes: VecDeque<String>,
    prefix: Option<String>,
    token: Option<String>,
    buffer: VecDeque<AudioObject>,
    to_skip: usize,
    remaining: Option<usize>,
}

pub struct CatalogLister<S> {
    store: S,
}

impl<S: SourceStore> CatalogLister<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Each call starts a fresh listing; use `offset` to resume a previous one.
    pub fn list(&self, query: CatalogQuery) -> impl Stream<Item = Result<AudioObject>> + Send + '_ {
        let cursor = Cursor {
            prefixes: query.prefixes(),
            prefix: None,
            token: None,
            buffer: VecDeque::new(),
            to_skip: query.offset,
            remaining: query.limit,
        };
        let query = Arc::new(query);
        let store = &self.store;

        stream::try_unfold(cursor, move |mut cursor| {
            let query = Arc::clone(&query);
            async move {
                loop {
                    if cursor.remaining == Some(0) {
                        return Ok(None);
                    }
                    if let Some(object) = cursor.buffer.pop_front() {
                        if cursor.to_skip > 0 {
                            cursor.to_skip -= 1;
                            continue;
                        }
                        if let Some(remaining) = cursor.remaining.as_mut() {
                            *remaining -= 1;
                        }
                        return Ok(Some((object, cursor)));
                    }

                    let prefix = match &cursor.prefix {
                        Some(prefix) => prefix.clone(),
                        None => match cursor.prefixes.pop_front() {
                            Some(next) => {
                                cursor.prefix = Some(next.clone());
                                cursor.token = None;
                                next
                            }
                            None => return Ok(None),
                        },
                    };

                    let page = store
                        .list_page(&prefix, cursor.token.take(), query.page_size)
                        .await?;
                    tracing::debug!(
                        prefix = %prefix,
                        objects = page.objects.len(),
                        more = page.next_token.is_some(),
                        "listed catalog page"
                    );
                    cursor
                        .buffer
                        .extend(page.objects.into_iter().filter(|o| query.matches(o)));
                    match page.next_token {
                        Some(token) => cursor.token = Some(token),
                        None => cursor.prefix = None,
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::error::Error;
    use crate::ports::storage::{MockSourceStore, ObjectPage};
    use futures::TryStreamExt;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        for i in 0..25 {
            store.insert(format!("amdo/file{i:03}.wav"), vec![1u8; 4]);
        }
        store.insert("amdo/notes.txt", vec![1u8]);
        store.insert("kham/a.mp3", vec![1u8]);
        store.insert("kham/b.FLAC", vec![1u8]);
        store.insert("loose.wav", vec![1u8]);
        store
    }

    async fn keys(lister: &CatalogLister<MemoryStore>, query: CatalogQuery) -> Vec<String> {
        lister
            .list(query)
            .map_ok(|o| o.key)
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_pages_transparently() {
        let lister = CatalogLister::new(store());
        let query = CatalogQuery::default().collections(["amdo"]).page_size(4);
        let found = keys(&lister, query).await;
        assert_eq!(found.len(), 25);
        assert_eq!(found[0], "amdo/file000.wav");
        assert_eq!(found[24], "amdo/file024.wav");
    }

    #[tokio::test]
    async fn test_offset_and_limit() {
        let lister = CatalogLister::new(store());
        let query = CatalogQuery::default()
            .collections(["amdo"])
            .page_size(3)
            .offset(5)
            .limit(Some(4));
        let found = keys(&lister, query).await;
        assert_eq!(
            found,
            vec!["amdo/file005.wav", "amdo/file006.wav", "amdo/file007.wav", "amdo/file008.wav"]
        );
    }

    #[tokio::test]
    async fn test_filters_extensions_case_insensitively() {
        let lister = CatalogLister::new(store());
        let found = keys(&lister, CatalogQuery::default().collections(["kham"])).await;
        assert_eq!(found, vec!["kham/a.mp3", "kham/b.FLAC"]);
    }

    #[tokio::test]
    async fn test_root_collection_holds_top_level_keys() {
        let lister = CatalogLister::new(store());
        let found = keys(&lister, CatalogQuery::default().collections([ROOT_COLLECTION])).await;
        assert_eq!(found, vec!["loose.wav"]);
    }

    #[tokio::test]
    async fn test_key_pattern() {
        let lister = CatalogLister::new(store());
        let query = CatalogQuery::default().key_pattern(Some(Regex::new(r"file00[12]").unwrap()));
        let found = keys(&lister, query).await;
        assert_eq!(found, vec!["amdo/file001.wav", "amdo/file002.wav"]);
    }

    #[tokio::test]
    async fn test_store_error_ends_the_stream() {
        let mut source = MockSourceStore::new();
        source
            .expect_list_page()
            .withf(|_, token, _| token.is_none())
            .returning(|_, _, _| {
                Ok(ObjectPage {
                    objects: vec![AudioObject::from_key("amdo/a.wav", 1, None)],
                    next_token: Some("amdo/a.wav".to_string()),
                })
            });
        source
            .expect_list_page()
            .withf(|_, token, _| token.is_some())
            .returning(|_, _, _| Err(Error::Catalog("AccessDenied".to_string())));

        let lister = CatalogLister::new(source);
        let items: Vec<Result<AudioObject>> = futures::StreamExt::collect(lister.list(CatalogQuery::default())).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(Error::Catalog(_))));
    }
}
