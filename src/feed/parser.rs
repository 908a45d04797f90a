use std::borrow::Cow;

use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::util::{clean_title, is_postable_url};

/// Default namespace declaration removed before parsing so element names
/// match without namespace resolution.
pub const ATOM_NAMESPACE_DECL: &str = r#"xmlns="http://www.w3.org/2005/Atom""#;

/// Marker before the destination URL in an alert's tracking link.
pub const REDIRECT_MARKER: &str = "&url=";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Malformed attribute: {0}")]
    Attribute(#[from] AttrError),
    #[error("Document has no root element")]
    NoRoot,
    #[error("Document ended inside an open element")]
    Truncated,
}

/// One usable feed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertEntry {
    pub title: String,
    pub url: String,
}

/// Entries parsed from one feed and the number of entries dropped.
#[derive(Debug, Default)]
pub struct ParseResult {
    pub entries: Vec<AlertEntry>,
    /// Entries without a title or link, or whose link is not http(s)
    pub skipped: usize,
}

/// Remove the Atom default namespace declaration from a document.
pub fn strip_default_namespace(raw: &str) -> Cow<'_, str> {
    if raw.contains(ATOM_NAMESPACE_DECL) {
        Cow::Owned(raw.replace(ATOM_NAMESPACE_DECL, ""))
    } else {
        Cow::Borrowed(raw)
    }
}

/// Extract the destination from an alert tracking link.
///
/// `https://www.google.com/url?rct=j&sa=t&url=https://example.com/a&ct=ga`
/// yields `https://example.com/a`. A link without the marker is returned as is.
pub fn unwrap_redirect(href: &str) -> &str {
    match href.split_once(REDIRECT_MARKER) {
        Some((_, rest)) => rest.split('&').next().unwrap_or(rest),
        None => href,
    }
}

#[derive(Default)]
struct EntryBuilder {
    title: Option<String>,
    href: Option<String>,
}

/// Parse an alert feed document.
///
/// Only direct children of the root element named `entry` are read. From
/// each, the first `title` and the `href` of the first `link` are used.
/// Titles lose their markup; links are unwrapped with [`unwrap_redirect`].
pub fn parse_alert_feed(raw: &str) -> Result<ParseResult, ParseError> {
    let document = strip_default_namespace(raw);
    let mut reader = Reader::from_str(&document);
    reader.config_mut().trim_text(true);

    let mut result = ParseResult::default();
    let mut depth: usize = 0;
    let mut saw_root = false;
    let mut entry: Option<EntryBuilder> = None;
    let mut title_buf: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                depth += 1;
                saw_root = true;
                if depth == 2 && e.local_name().as_ref() == b"entry" {
                    entry = Some(EntryBuilder::default());
                } else if let (3, Some(builder)) = (depth, entry.as_mut()) {
                    match e.local_name().as_ref() {
                        b"title" if builder.title.is_none() => title_buf = Some(String::new()),
                        b"link" => take_href(&e, &reader, builder)?,
                        _ => {}
                    }
                }
            }
            Event::Empty(e) => {
                saw_root = true;
                if let (2, Some(builder)) = (depth, entry.as_mut()) {
                    match e.local_name().as_ref() {
                        b"link" => take_href(&e, &reader, builder)?,
                        b"title" if builder.title.is_none() => {
                            builder.title = Some(String::new());
                        }
                        _ => {}
                    }
                }
            }
            Event::Text(t) => {
                if let Some(buf) = title_buf.as_mut() {
                    buf.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(buf) = title_buf.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::End(_) => {
                if depth == 3 {
                    if let (Some(buf), Some(builder)) = (title_buf.take(), entry.as_mut()) {
                        builder.title = Some(buf);
                    }
                }
                if depth == 2 {
                    if let Some(builder) = entry.take() {
                        finish_entry(builder, &mut result);
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(ParseError::NoRoot);
    }
    if depth != 0 {
        return Err(ParseError::Truncated);
    }
    Ok(result)
}

fn take_href(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
    builder: &mut EntryBuilder,
) -> Result<(), ParseError> {
    if builder.href.is_some() {
        return Ok(());
    }
    if let Some(attr) = e.try_get_attribute("href")? {
        builder.href = Some(attr.decode_and_unescape_value(reader.decoder())?.into_owned());
    }
    Ok(())
}

fn finish_entry(builder: EntryBuilder, result: &mut ParseResult) {
    let (Some(raw_title), Some(href)) = (builder.title, builder.href) else {
        tracing::debug!("Skipping entry without title or link");
        result.skipped += 1;
        return;
    };

    let url = unwrap_redirect(&href);
    if !is_postable_url(url) {
        tracing::debug!(href = %href, "Skipping entry with unusable link");
        result.skipped += 1;
        return;
    }

    let title = clean_title(&raw_title);
    if title.is_empty() {
        result.skipped += 1;
        return;
    }

    result.entries.push(AlertEntry {
        title,
        url: url.to_string(),
    });
}
