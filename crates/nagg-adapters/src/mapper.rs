//! Provider record -> [`ArticleDraft`] mapping. `None` means the record is rejected.

use chrono::{DateTime, Utc};
use nagg_core::{category_or_default, ArticleDraft, UNKNOWN_AUTHOR, UNKNOWN_SOURCE};

use crate::payload::{GuardianResult, NewsApiArticle, NytStory, RawRecord};

pub fn map_record(raw: &RawRecord, category: &str) -> Option<ArticleDraft> {
    match raw {
        RawRecord::Guardian(record) => map_guardian(record, category),
        RawRecord::Nyt(record) => map_nyt(record, category),
        RawRecord::NewsApi(record) => map_newsapi(record, category),
    }
}

pub fn map_guardian(record: &GuardianResult, category: &str) -> Option<ArticleDraft> {
    let title = present(record.fields.headline.as_deref())?;
    let body = present(record.fields.body.as_deref())?;
    let section = present(record.section_name.as_deref()).unwrap_or(category);

    Some(ArticleDraft {
        title: escape_html(title),
        content: escape_html(body),
        author: author_or_unknown(record.fields.byline.as_deref()),
        source: source_or_unknown(record.web_url.as_deref()),
        category: category_or_default(section),
        image: present(record.fields.thumbnail.as_deref()).map(str::to_string),
        published_at: parse_timestamp(record.web_publication_date.as_deref()),
    })
}

pub fn map_nyt(record: &NytStory, section: &str) -> Option<ArticleDraft> {
    let title = present(record.title.as_deref())?;
    let summary = present(record.summary.as_deref())?;
    let image = record
        .multimedia
        .first()
        .and_then(|media| present(media.url.as_deref()))
        .map(str::to_string);

    Some(ArticleDraft {
        title: escape_html(title),
        content: escape_html(summary),
        author: author_or_unknown(record.byline.as_deref()),
        source: source_or_unknown(record.url.as_deref()),
        category: category_or_default(section),
        image,
        published_at: parse_timestamp(record.published_date.as_deref()),
    })
}

pub fn map_newsapi(record: &NewsApiArticle, category: &str) -> Option<ArticleDraft> {
    let title = present(record.title.as_deref())?;
    let content = present(record.content.as_deref())?;

    Some(ArticleDraft {
        title: escape_html(title),
        content: escape_html(content),
        author: author_or_unknown(record.author.as_deref()),
        source: source_or_unknown(record.url.as_deref()),
        category: category_or_default(category),
        image: present(record.url_to_image.as_deref()).map(str::to_string),
        published_at: parse_timestamp(record.published_at.as_deref()),
    })
}

/// Escapes `& " ' < >` the way the stored corpus has always been escaped.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn author_or_unknown(value: Option<&str>) -> String {
    present(value)
        .map(escape_html)
        .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string())
}

fn source_or_unknown(value: Option<&str>) -> String {
    present(value)
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_SOURCE.to_string())
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = present(value)?;
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
