//! Structured rich text as delivered by the content repository.
//!
//! A rich-text field is an ordered sequence of typed nodes. The pipeline never
//! inspects markup directly; it goes through the two pure projections defined
//! here: [`as_text`] for word counting and titles, [`as_html`] for page bodies.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use url::{ParseError, Url};

/// Separator placed between blocks when projecting to plain text.
pub const TEXT_BLOCK_SEPARATOR: &str = " ";

const LINK_SCHEMES: [&str; 3] = ["http", "https", "mailto"];

static EMBED_SANITIZER: LazyLock<ammonia::Builder<'static>> = LazyLock::new(|| {
    let mut builder = ammonia::Builder::default();
    builder.add_tags(&["iframe"]);
    builder.add_tag_attributes(
        "iframe",
        &["src", "width", "height", "allow", "allowfullscreen", "title"],
    );
    builder
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RichTextNode {
    Heading1(TextBlock),
    Heading2(TextBlock),
    Heading3(TextBlock),
    Heading4(TextBlock),
    Heading5(TextBlock),
    Heading6(TextBlock),
    Paragraph(TextBlock),
    Preformatted(TextBlock),
    ListItem(TextBlock),
    OListItem(TextBlock),
    Image(ImageBlock),
    Embed(EmbedBlock),
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub spans: Vec<Span>,
}

impl TextBlock {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            spans: Vec::new(),
        }
    }
}

/// Inline formatting over a text run. Offsets count UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    #[serde(rename = "type")]
    pub kind: SpanKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SpanData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpanKind {
    Strong,
    Em,
    Hyperlink,
    Label,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpanData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlock {
    pub url: String,
    #[serde(default)]
    pub alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedBlock {
    pub oembed: OEmbed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OEmbed {
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub embed_url: Option<String>,
}

impl RichTextNode {
    /// Text carried by the node, if it is a text-bearing block.
    pub fn text(&self) -> Option<&str> {
        self.text_block().map(|block| block.text.as_str())
    }

    fn text_block(&self) -> Option<&TextBlock> {
        match self {
            RichTextNode::Heading1(block)
            | RichTextNode::Heading2(block)
            | RichTextNode::Heading3(block)
            | RichTextNode::Heading4(block)
            | RichTextNode::Heading5(block)
            | RichTextNode::Heading6(block)
            | RichTextNode::Paragraph(block)
            | RichTextNode::Preformatted(block)
            | RichTextNode::ListItem(block)
            | RichTextNode::OListItem(block) => Some(block),
            RichTextNode::Image(_) | RichTextNode::Embed(_) | RichTextNode::Unsupported => None,
        }
    }
}

/// Project rich text to plain text, one separator between text-bearing blocks.
pub fn as_text(nodes: &[RichTextNode]) -> String {
    nodes
        .iter()
        .filter_map(RichTextNode::text)
        .collect::<Vec<_>>()
        .join(TEXT_BLOCK_SEPARATOR)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Unordered,
    Ordered,
}

impl ListKind {
    fn tag(self) -> &'static str {
        match self {
            ListKind::Unordered => "ul",
            ListKind::Ordered => "ol",
        }
    }
}

/// Project rich text to HTML. Consecutive list items are grouped into one list.
pub fn as_html(nodes: &[RichTextNode]) -> String {
    let mut html = String::new();
    let mut open_list: Option<ListKind> = None;

    for node in nodes {
        let list = match node {
            RichTextNode::ListItem(_) => Some(ListKind::Unordered),
            RichTextNode::OListItem(_) => Some(ListKind::Ordered),
            _ => None,
        };

        if open_list != list {
            if let Some(kind) = open_list.take() {
                html.push_str(&format!("</{}>", kind.tag()));
            }
            if let Some(kind) = list {
                html.push_str(&format!("<{}>", kind.tag()));
                open_list = Some(kind);
            }
        }

        html.push_str(&node_html(node));
    }

    if let Some(kind) = open_list {
        html.push_str(&format!("</{}>", kind.tag()));
    }

    html
}

fn node_html(node: &RichTextNode) -> String {
    match node {
        RichTextNode::Heading1(block) => wrap("h1", block),
        RichTextNode::Heading2(block) => wrap("h2", block),
        RichTextNode::Heading3(block) => wrap("h3", block),
        RichTextNode::Heading4(block) => wrap("h4", block),
        RichTextNode::Heading5(block) => wrap("h5", block),
        RichTextNode::Heading6(block) => wrap("h6", block),
        RichTextNode::Paragraph(block) => wrap("p", block),
        RichTextNode::Preformatted(block) => wrap("pre", block),
        RichTextNode::ListItem(block) | RichTextNode::OListItem(block) => wrap("li", block),
        RichTextNode::Image(image) => format!(
            "<p class=\"block-img\"><img src=\"{}\" alt=\"{}\" /></p>",
            escape_html(&image.url),
            escape_html(image.alt.as_deref().unwrap_or_default()),
        ),
        RichTextNode::Embed(embed) => {
            let markup = embed.oembed.html.as_deref().unwrap_or_default();
            format!(
                "<div data-oembed=\"{}\">{}</div>",
                escape_html(embed.oembed.embed_url.as_deref().unwrap_or_default()),
                EMBED_SANITIZER.clean(markup),
            )
        }
        RichTextNode::Unsupported => String::new(),
    }
}

fn wrap(tag: &str, block: &TextBlock) -> String {
    format!("<{tag}>{}</{tag}>", render_spans(&block.text, &block.spans))
}

fn render_spans(text: &str, spans: &[Span]) -> String {
    let mut ranges: Vec<(usize, usize, &Span)> = spans
        .iter()
        .filter_map(|span| {
            let start = utf16_to_byte(text, span.start)?;
            let end = utf16_to_byte(text, span.end)?;
            (start < end).then_some((start, end, span))
        })
        .collect();
    ranges.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut boundaries: Vec<usize> = ranges
        .iter()
        .flat_map(|(start, end, _)| [*start, *end])
        .chain([0, text.len()])
        .collect();
    boundaries.sort_unstable();
    boundaries.dedup();

    let mut html = String::with_capacity(text.len());
    let mut open: Vec<(usize, &Span)> = Vec::new();
    let mut next = 0;
    let mut last = 0;

    for pos in boundaries {
        if pos > last {
            html.push_str(&escape_text(&text[last..pos]));
            last = pos;
        }

        // Spans may overlap without nesting: close everything above the
        // ending span and reopen what was still running.
        if open.iter().any(|(end, _)| *end == pos) {
            let mut reopen = Vec::new();
            while let Some((end, span)) = open.pop() {
                html.push_str(closing_tag(span));
                if end != pos {
                    reopen.push((end, span));
                }
                if !open.iter().any(|(end, _)| *end == pos) {
                    break;
                }
            }
            for (end, span) in reopen.into_iter().rev() {
                html.push_str(&opening_tag(span));
                open.push((end, span));
            }
        }

        while let Some((start, end, span)) = ranges.get(next).copied() {
            if start != pos {
                break;
            }
            html.push_str(&opening_tag(span));
            open.push((end, span));
            next += 1;
        }
    }

    html
}

fn opening_tag(span: &Span) -> String {
    let data = span.data.clone().unwrap_or_default();
    match span.kind {
        SpanKind::Strong => "<strong>".to_string(),
        SpanKind::Em => "<em>".to_string(),
        SpanKind::Hyperlink => match data.url.as_deref().and_then(safe_link) {
            Some(url) => format!("<a href=\"{}\">", escape_html(url)),
            None => "<a>".to_string(),
        },
        SpanKind::Label => format!(
            "<span class=\"{}\">",
            escape_html(data.label.as_deref().unwrap_or_default())
        ),
        SpanKind::Other => "<span>".to_string(),
    }
}

fn closing_tag(span: &Span) -> &'static str {
    match span.kind {
        SpanKind::Strong => "</strong>",
        SpanKind::Em => "</em>",
        SpanKind::Hyperlink => "</a>",
        SpanKind::Label | SpanKind::Other => "</span>",
    }
}

/// Absolute links must use one of [`LINK_SCHEMES`]; relative links pass.
fn safe_link(url: &str) -> Option<&str> {
    match Url::parse(url) {
        Ok(parsed) if LINK_SCHEMES.contains(&parsed.scheme()) => Some(url),
        Ok(_) => None,
        Err(ParseError::RelativeUrlWithoutBase) => Some(url),
        Err(_) => None,
    }
}

/// Map a UTF-16 offset to a byte offset, `None` when it falls outside `text`
/// or inside a surrogate pair.
fn utf16_to_byte(text: &str, offset: usize) -> Option<usize> {
    let mut units = 0;
    for (byte, ch) in text.char_indices() {
        if units == offset {
            return Some(byte);
        }
        if units > offset {
            return None;
        }
        units += ch.len_utf16();
    }
    (units == offset).then_some(text.len())
}

fn escape_text(text: &str) -> String {
    escape_html(text).replace('\n', "<br />")
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
