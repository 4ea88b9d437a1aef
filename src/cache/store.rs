//! In-memory store of generated detail pages.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use time::OffsetDateTime;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// Rendered detail page and the instant it was generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPage {
    pub uid: String,
    pub html: Arc<str>,
    pub generated_at: OffsetDateTime,
}

impl GeneratedPage {
    pub fn new(
        uid: impl Into<String>,
        html: impl Into<Arc<str>>,
        generated_at: OffsetDateTime,
    ) -> Self {
        Self {
            uid: uid.into(),
            html: html.into(),
            generated_at,
        }
    }
}

/// Pages keyed by post id. Replacing an entry is a single atomic swap, so
/// readers see either the old page or the new one.
#[derive(Default)]
pub struct PageStore {
    pages: RwLock<HashMap<String, GeneratedPage>>,
}

impl PageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uid: &str) -> Option<GeneratedPage> {
        rw_read(&self.pages, SOURCE, "get").get(uid).cloned()
    }

    pub fn put(&self, page: GeneratedPage) {
        rw_write(&self.pages, SOURCE, "put").insert(page.uid.clone(), page);
    }

    /// Insert `page` unless a newer page for the same id is already stored.
    pub fn put_if_newer(&self, page: GeneratedPage) -> bool {
        let mut pages = rw_write(&self.pages, SOURCE, "put_if_newer");
        match pages.get(&page.uid) {
            Some(existing) if existing.generated_at > page.generated_at => false,
            _ => {
                pages.insert(page.uid.clone(), page);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.pages, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
