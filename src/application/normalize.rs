//! Projection of raw repository records into post models.

use metrics::counter;
use serde::Deserialize;
use tracing::warn;

use crate::{
    application::repos::RawRecord,
    domain::{
        error::DomainError,
        posts::{ContentBlock, PostDetail, PostSummary, PublishedDate},
        rich_text::{self, RichTextNode},
    },
};

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    first_publication_date: Option<String>,
    #[serde(default)]
    data: Option<RawPostData>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPostData {
    #[serde(default)]
    title: Option<TextField>,
    #[serde(default)]
    subtitle: Option<TextField>,
    #[serde(default)]
    author: Option<TextField>,
    #[serde(default)]
    banner: Option<RawImage>,
    /// Decoded only for detail pages; summaries never look at the body.
    #[serde(default)]
    content: Option<serde_json::Value>,
}

/// Text fields arrive either as plain strings or as rich-text arrays.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TextField {
    Plain(String),
    Rich(Vec<RichTextNode>),
}

impl TextField {
    fn into_text(self) -> String {
        match self {
            TextField::Plain(text) => text,
            TextField::Rich(nodes) => rich_text::as_text(&nodes),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawImage {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawContentGroup {
    #[serde(default)]
    heading: Option<TextField>,
    #[serde(default)]
    body: Vec<RichTextNode>,
}

struct Decoded {
    id: String,
    published_at: Option<PublishedDate>,
    data: RawPostData,
}

fn decode(record: &RawRecord) -> Result<Decoded, DomainError> {
    let document = RawDocument::deserialize(record.value())
        .map_err(|err| DomainError::malformed(err.to_string()))?;
    let id = document
        .uid
        .filter(|uid| !uid.trim().is_empty())
        .ok_or(DomainError::missing("uid"))?;
    let published_at = document
        .first_publication_date
        .as_deref()
        .and_then(PublishedDate::parse_iso8601);
    Ok(Decoded {
        id,
        published_at,
        data: document.data.unwrap_or_default(),
    })
}

fn required(field: Option<TextField>, name: &'static str) -> Result<String, DomainError> {
    let text = field.map(TextField::into_text).unwrap_or_default();
    if text.trim().is_empty() {
        return Err(DomainError::missing(name));
    }
    Ok(text)
}

fn optional(field: Option<TextField>) -> String {
    field.map(TextField::into_text).unwrap_or_default()
}

/// Project a record into its list-view summary.
///
/// A missing or unparseable publication date is not an error.
pub fn to_summary(record: &RawRecord) -> Result<PostSummary, DomainError> {
    let Decoded {
        id,
        published_at,
        data,
    } = decode(record)?;
    Ok(PostSummary {
        id,
        title: required(data.title, "title")?,
        subtitle: optional(data.subtitle),
        author: required(data.author, "author")?,
        published_at,
    })
}

/// Project a record into the full article shown on its detail page.
pub fn to_detail(record: &RawRecord) -> Result<PostDetail, DomainError> {
    let Decoded {
        id,
        published_at,
        data,
    } = decode(record)?;
    let groups = match data.content {
        Some(value) if !value.is_null() => Vec::<RawContentGroup>::deserialize(&value)
            .map_err(|err| DomainError::malformed(format!("content: {err}")))?,
        _ => Vec::new(),
    };
    let content = groups
        .into_iter()
        .map(|group| ContentBlock {
            heading: optional(group.heading),
            body: group.body,
        })
        .collect();
    Ok(PostDetail {
        id,
        title: required(data.title, "title")?,
        author: required(data.author, "author")?,
        published_at,
        banner_url: data.banner.and_then(|banner| banner.url).unwrap_or_default(),
        content,
    })
}

/// Summaries that survived normalization and how many records were dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedBatch<T> {
    pub items: Vec<T>,
    pub malformed: usize,
}

/// Normalize a page of records, dropping and logging the malformed ones.
pub fn normalize_summaries(records: &[RawRecord]) -> NormalizedBatch<PostSummary> {
    let mut batch = NormalizedBatch {
        items: Vec::with_capacity(records.len()),
        malformed: 0,
    };

    for record in records {
        match to_summary(record) {
            Ok(summary) => batch.items.push(summary),
            Err(err) => {
                batch.malformed += 1;
                counter!("spacetraveling_malformed_records_total").increment(1);
                warn!(
                    target = "spacetraveling::normalize",
                    uid = record.uid().unwrap_or("<none>"),
                    error = %err,
                    "Dropping malformed record"
                );
            }
        }
    }

    batch
}
