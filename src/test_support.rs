use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::application::pagination::Page;
use crate::application::repos::{
    ContentRepository, QueryOptions, RawRecord, RepoError, TypeFilter,
};

#[derive(Clone, Default)]
pub(crate) struct QueryCounter(Arc<AtomicUsize>);

impl QueryCounter {
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Repository backed by a vector; cursors are offsets into it.
#[derive(Default)]
pub(crate) struct InMemoryRepository {
    records: Mutex<Vec<Value>>,
    query_failure: Mutex<Option<String>>,
    lookup_failure: Mutex<Option<String>>,
    queries: QueryCounter,
}

impl InMemoryRepository {
    pub(crate) fn with_posts<'a>(uids: impl IntoIterator<Item = &'a str>) -> Self {
        let repo = Self::default();
        for uid in uids {
            repo.push_raw(post_json(uid));
        }
        repo
    }

    pub(crate) fn push_raw(&self, value: Value) {
        self.records.lock().expect("records lock").push(value);
    }

    pub(crate) fn fail_queries(&self, message: &str) {
        *self.query_failure.lock().expect("failure lock") = Some(message.to_string());
    }

    pub(crate) fn fail_lookups(&self, message: &str) {
        *self.lookup_failure.lock().expect("failure lock") = Some(message.to_string());
    }

    pub(crate) fn query_counter(&self) -> QueryCounter {
        self.queries.clone()
    }
}

pub(crate) fn post_json(uid: &str) -> Value {
    json!({
        "id": format!("id-{uid}"),
        "uid": uid,
        "type": "posts",
        "first_publication_date": "2021-03-25T19:25:28+0000",
        "data": {
            "title": [{"type": "heading1", "text": format!("Post {uid}"), "spans": []}],
            "subtitle": format!("About {uid}"),
            "author": "Danilo Vieira",
            "banner": {"url": format!("https://images.example/{uid}.png")},
            "content": [
                {
                    "heading": "Introduction",
                    "body": [
                        {"type": "paragraph", "text": "Lorem ipsum dolor sit amet.", "spans": []}
                    ]
                }
            ]
        }
    })
}

#[async_trait]
impl ContentRepository for InMemoryRepository {
    async fn query(
        &self,
        _filter: &TypeFilter,
        options: &QueryOptions,
    ) -> Result<Page<RawRecord>, RepoError> {
        self.queries.0.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.query_failure.lock().expect("failure lock").clone() {
            return Err(RepoError::Unavailable(message));
        }

        let offset = match options.cursor.as_deref() {
            None => 0,
            Some(cursor) => cursor.parse::<usize>().map_err(|_| RepoError::InvalidCursor {
                cursor: cursor.to_string(),
            })?,
        };
        let size = options.page_size.clamp(1, self.max_page_size()) as usize;

        let records = self.records.lock().expect("records lock");
        let end = (offset + size).min(records.len());
        let results = records
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .cloned()
            .map(RawRecord::new)
            .collect();
        let next_cursor = (end < records.len()).then(|| end.to_string());
        Ok(Page::new(results, next_cursor, records.len() as u64))
    }

    async fn get_by_uid(&self, _document_type: &str, uid: &str) -> Result<RawRecord, RepoError> {
        if let Some(message) = self.lookup_failure.lock().expect("failure lock").clone() {
            return Err(RepoError::Unavailable(message));
        }
        self.records
            .lock()
            .expect("records lock")
            .iter()
            .find(|record| record.get("uid").and_then(Value::as_str) == Some(uid))
            .cloned()
            .map(RawRecord::new)
            .ok_or(RepoError::NotFound)
    }
}
