#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use spacetraveling::application::pagination::Page;
use spacetraveling::application::repos::{
    ContentRepository, QueryOptions, RawRecord, RepoError, TypeFilter,
};

/// Repository over a fixed list of records; cursors are `page-N` labels.
#[derive(Default)]
pub struct FakeRepository {
    records: Mutex<Vec<Value>>,
    offline: Mutex<bool>,
    queries: AtomicUsize,
    lookups: AtomicUsize,
}

impl FakeRepository {
    pub fn with_posts(uids: &[&str]) -> Self {
        let repo = Self::default();
        for uid in uids {
            repo.push(post(uid));
        }
        repo
    }

    pub fn push(&self, record: Value) {
        self.records.lock().expect("records lock").push(record);
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().expect("offline lock") = offline;
    }

    pub fn rename(&self, uid: &str, title: &str) {
        let mut records = self.records.lock().expect("records lock");
        if let Some(record) = records
            .iter_mut()
            .find(|record| record["uid"].as_str() == Some(uid))
        {
            record["data"]["title"] = json!(title);
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> Result<(), RepoError> {
        if *self.offline.lock().expect("offline lock") {
            return Err(RepoError::unavailable("repository offline"));
        }
        Ok(())
    }
}

pub fn post(uid: &str) -> Value {
    json!({
        "uid": uid,
        "first_publication_date": "2021-03-15T19:25:28+0000",
        "data": {
            "title": format!("Post {uid}"),
            "subtitle": format!("Notes on {uid}"),
            "author": "Joseph Oliveira",
            "banner": {"url": format!("https://images.example/{uid}.png")},
            "content": [
                {
                    "heading": "Proin et varius",
                    "body": [
                        {"type": "paragraph", "text": "Lorem ipsum dolor sit amet consectetur.", "spans": []}
                    ]
                }
            ]
        }
    })
}

#[async_trait]
impl ContentRepository for FakeRepository {
    async fn query(
        &self,
        _filter: &TypeFilter,
        options: &QueryOptions,
    ) -> Result<Page<RawRecord>, RepoError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;

        let page_number = match options.cursor.as_deref() {
            None => 0,
            Some(cursor) => cursor
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| RepoError::InvalidCursor {
                    cursor: cursor.to_string(),
                })?,
        };
        let size = options.page_size.clamp(1, self.max_page_size()) as usize;

        let records = self.records.lock().expect("records lock");
        let start = (page_number * size).min(records.len());
        let end = (start + size).min(records.len());
        let results = records[start..end]
            .iter()
            .cloned()
            .map(RawRecord::new)
            .collect();
        let next_cursor = (end < records.len()).then(|| format!("page-{}", page_number + 1));
        Ok(Page::new(results, next_cursor, records.len() as u64))
    }

    async fn get_by_uid(&self, _document_type: &str, uid: &str) -> Result<RawRecord, RepoError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        self.records
            .lock()
            .expect("records lock")
            .iter()
            .find(|record| record["uid"].as_str() == Some(uid))
            .cloned()
            .map(RawRecord::new)
            .ok_or(RepoError::NotFound)
    }
}
