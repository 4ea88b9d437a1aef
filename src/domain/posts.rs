//! Post models shared by the listing and detail pipelines.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use time::{
    Date, Month, OffsetDateTime, PrimitiveDateTime,
    format_description::{FormatItem, well_known::Rfc3339},
    macros::format_description,
};

use crate::domain::rich_text::RichTextNode;

/// Repository timestamps sometimes carry a colon-less offset (`+0000`).
const COMPACT_OFFSET_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]"
);
const NAIVE_DATETIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
const DATE_ONLY_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

const MONTH_ABBREVIATIONS: [&str; 12] = [
    "jan", "fev", "mar", "abr", "mai", "jun", "jul", "ago", "set", "out", "nov", "dez",
];

/// Calendar date of first publication, displayed as `dd MMM yyyy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublishedDate(Date);

impl PublishedDate {
    pub fn new(date: Date) -> Self {
        Self(date)
    }

    /// Parse an ISO-8601 timestamp. Returns `None` for anything unparseable.
    pub fn parse_iso8601(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(value) = OffsetDateTime::parse(raw, &Rfc3339) {
            return Some(Self(value.date()));
        }
        if let Ok(value) = OffsetDateTime::parse(raw, COMPACT_OFFSET_FORMAT) {
            return Some(Self(value.date()));
        }
        if let Ok(value) = PrimitiveDateTime::parse(raw, NAIVE_DATETIME_FORMAT) {
            return Some(Self(value.date()));
        }
        Date::parse(raw, DATE_ONLY_FORMAT).ok().map(Self)
    }

    pub fn date(&self) -> Date {
        self.0
    }
}

impl fmt::Display for PublishedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let month = MONTH_ABBREVIATIONS[usize::from(u8::from(self.0.month())) - 1];
        write!(f, "{:02} {} {:04}", self.0.day(), month, self.0.year())
    }
}

impl Serialize for PublishedDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublishedDate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_display(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid published date `{raw}`")))
    }
}

fn parse_display(raw: &str) -> Option<PublishedDate> {
    let mut parts = raw.split_whitespace();
    let day: u8 = parts.next()?.parse().ok()?;
    let abbreviation = parts.next()?;
    let year: i32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let index = MONTH_ABBREVIATIONS
        .iter()
        .position(|candidate| *candidate == abbreviation)?;
    let month = Month::try_from(u8::try_from(index + 1).ok()?).ok()?;
    Date::from_calendar_date(year, month, day)
        .ok()
        .map(PublishedDate)
}

/// List-view projection of a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSummary {
    pub id: String,
    pub title: String,
    pub subtitle: String,
    pub author: String,
    pub published_at: Option<PublishedDate>,
}

/// Full article as rendered on the detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDetail {
    pub id: String,
    pub title: String,
    pub author: String,
    pub published_at: Option<PublishedDate>,
    pub banner_url: String,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub heading: String,
    pub body: Vec<RichTextNode>,
}
