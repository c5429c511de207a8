//! Item-level byte filtering of the original upstream document.
//!
//! Output is assembled exclusively from verbatim byte ranges of the input, so
//! namespaces, CDATA sections and unknown extension elements reach podcast
//! clients exactly as the upstream wrote them. The only bytes not copied from
//! the input are those of an optional `<itunes:new-feed-url>` rewrite.
//!
//! Structure is found by scanning for tag boundaries, not by parsing: the first
//! closing tag after an opening tag ends the element (shortest match), nested or
//! malformed markup is not validated.

use std::borrow::Cow;
use std::collections::HashSet;
use std::ops::Range;

use memchr::memmem;

use crate::util::normalize_title;

const ITEM_OPEN: &[u8] = b"<item";
const ITEM_CLOSE: &[u8] = b"</item>";
const TITLE_OPEN: &[u8] = b"<title>";
const TITLE_CLOSE: &[u8] = b"</title>";
const NEW_FEED_URL_OPEN: &[u8] = b"<itunes:new-feed-url";
const NEW_FEED_URL_CLOSE: &[u8] = b"</itunes:new-feed-url>";

/// Optional rewrites applied to the raw document before item filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOptions {
    /// Replacement value for every `<itunes:new-feed-url>` element.
    ///
    /// Podcast apps follow this tag to migrate subscribers; pointing it at the
    /// proxy keeps them on the filtered feed. `None` (or blank) leaves the
    /// upstream value untouched.
    pub rewrite_new_feed_url: Option<String>,
}

impl FilterOptions {
    fn rewrite_target(&self) -> Option<&str> {
        self.rewrite_new_feed_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// Normalized titles of the items that survived the rules.
///
/// Titles are trimmed on insertion so they compare equal to the normalized
/// `<title>` text extracted from the raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeepTitles(HashSet<String>);

impl KeepTitles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parsed (already entity-decoded) title. Returns `false` if an equal
    /// title was already present.
    pub fn insert(&mut self, title: &str) -> bool {
        self.0.insert(title.trim().to_owned())
    }

    pub fn contains(&self, normalized: &str) -> bool {
        self.0.contains(normalized)
    }
}

impl<S: AsRef<str>> FromIterator<S> for KeepTitles {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut keep = KeepTitles::new();
        for title in iter {
            keep.insert(title.as_ref());
        }
        keep
    }
}

/// Filters the original document down to the items whose title is in `keep`.
///
/// 1. Rewrites `<itunes:new-feed-url>` when [`FilterOptions::rewrite_new_feed_url`]
///    is set and the element exists.
/// 2. Finds every `<item ...>...</item>` span.
/// 3. Copies bytes between spans verbatim, copies each span whose normalized
///    first `<title>` is in `keep`, and drops the others (including items with
///    no title).
///
/// A document without items is returned unchanged (apart from the rewrite).
pub fn filter_xml(raw: &[u8], keep: &KeepTitles, options: &FilterOptions) -> Vec<u8> {
    let raw: Cow<'_, [u8]> = match options.rewrite_target() {
        Some(url) => rewrite_new_feed_url(raw, url),
        None => Cow::Borrowed(raw),
    };

    let spans = item_spans(&raw);
    if spans.is_empty() {
        return raw.into_owned();
    }

    let mut out = Vec::with_capacity(raw.len());
    let mut last = 0;
    let mut kept = 0usize;

    for span in &spans {
        // Channel metadata, whitespace and anything else between items
        out.extend_from_slice(&raw[last..span.start]);

        let item = &raw[span.clone()];
        let keep_item = item_title(item)
            .map(|title| normalize_title(&String::from_utf8_lossy(title)))
            .is_some_and(|title| keep.contains(&title));

        if keep_item {
            out.extend_from_slice(item);
            kept += 1;
        }

        last = span.end;
    }

    // Closing channel/rss tags
    out.extend_from_slice(&raw[last..]);

    tracing::debug!(
        items_total = spans.len(),
        items_kept = kept,
        bytes_in = raw.len(),
        bytes_out = out.len(),
        "Filtered raw feed"
    );

    out
}

/// Byte ranges of every `<item\b ... </item>` element, in document order.
fn item_spans(raw: &[u8]) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut pos = 0;

    while let Some(start) = find_open_tag(raw, ITEM_OPEN, pos, false) {
        let body = start + ITEM_OPEN.len();
        match memmem::find(&raw[body..], ITEM_CLOSE) {
            Some(offset) => {
                let end = body + offset + ITEM_CLOSE.len();
                spans.push(start..end);
                pos = end;
            }
            // No later <item> can be closed either
            None => break,
        }
    }

    spans
}

/// Inner bytes of the first `<title>...</title>` in an item span.
fn item_title(item: &[u8]) -> Option<&[u8]> {
    let open = memmem::find(item, TITLE_OPEN)?;
    let inner_start = open + TITLE_OPEN.len();
    let len = memmem::find(&item[inner_start..], TITLE_CLOSE)?;
    Some(&item[inner_start..inner_start + len])
}

/// Replaces every `<itunes:new-feed-url ...>...</itunes:new-feed-url>` element
/// (tag names matched case-insensitively) with one carrying `url`.
fn rewrite_new_feed_url<'a>(raw: &'a [u8], url: &str) -> Cow<'a, [u8]> {
    let replacement = format!(
        "<itunes:new-feed-url>{}</itunes:new-feed-url>",
        quick_xml::escape::escape(url)
    );

    let mut out: Option<Vec<u8>> = None;
    let mut last = 0;
    let mut pos = 0;

    while let Some(start) = find_open_tag(raw, NEW_FEED_URL_OPEN, pos, true) {
        let name_end = start + NEW_FEED_URL_OPEN.len();
        let Some(gt) = memchr::memchr(b'>', &raw[name_end..]) else {
            break;
        };
        let content_start = name_end + gt + 1;
        let Some(close) = find_ignore_ascii_case(raw, NEW_FEED_URL_CLOSE, content_start) else {
            break;
        };
        let end = close + NEW_FEED_URL_CLOSE.len();

        let buf = out.get_or_insert_with(|| Vec::with_capacity(raw.len()));
        buf.extend_from_slice(&raw[last..start]);
        buf.extend_from_slice(replacement.as_bytes());
        last = end;
        pos = end;
    }

    match out {
        Some(mut buf) => {
            buf.extend_from_slice(&raw[last..]);
            tracing::debug!(url = %url, "Rewrote itunes:new-feed-url");
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(raw),
    }
}

/// Finds `tag` (e.g. `<item`) at or after `from`, requiring a word boundary
/// right after the name so `<items>` does not match `<item`.
fn find_open_tag(haystack: &[u8], tag: &[u8], from: usize, ignore_case: bool) -> Option<usize> {
    let mut pos = from;
    loop {
        let start = if ignore_case {
            find_ignore_ascii_case(haystack, tag, pos)?
        } else {
            pos + memmem::find(haystack.get(pos..)?, tag)?
        };
        let after = start + tag.len();
        match haystack.get(after) {
            Some(&b) if is_word_byte(b) => pos = start + 1,
            _ => return Some(start),
        }
    }
}

fn find_ignore_ascii_case(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
        .map(|offset| from + offset)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
