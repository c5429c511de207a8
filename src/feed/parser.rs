use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use thiserror::Error;

use crate::util::decode_entities;

/// Namespace URI bound to the `itunes:` prefix by podcast feeds.
const ITUNES_NS: &[u8] = b"http://www.itunes.com/dtds/podcast-1.0.dtd";

/// Errors produced while decoding an upstream document.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The XML itself is malformed (mismatched tags, bad syntax, ...).
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    /// The root element is something other than `<rss>`.
    #[error("expected <rss> root element, found <{0}>")]
    UnexpectedRoot(String),
    /// The document contains no element at all.
    #[error("document has no root element")]
    Empty,
    /// The document ended while elements were still open.
    #[error("unexpected end of document inside <{0}>")]
    UnexpectedEof(String),
}

/// A parsed feed: channel title plus items in document order.
///
/// Read-only and rebuilt on every fetch. Only carries what the rule engine needs;
/// output bytes are always taken from the original document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feed {
    pub title: String,
    pub items: Vec<Item>,
}

/// A parsed `<item>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    pub title: String,
    /// `<pubDate>`, kept opaque.
    pub pub_date: String,
    /// `<itunes:episode>`; 0 when absent or not a number.
    pub episode: u32,
    /// `<itunes:duration>` in raw iTunes notation.
    pub duration: String,
    pub description: String,
}

/// Which value the text of the current element feeds into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    ChannelTitle,
    Title,
    PubDate,
    Episode,
    Duration,
    Description,
}

/// Item fields collected so far; the first occurrence of each element wins.
#[derive(Default)]
struct ItemBuilder {
    title: Option<String>,
    pub_date: Option<String>,
    episode: Option<String>,
    duration: Option<String>,
    description: Option<String>,
}

impl ItemBuilder {
    fn slot(&mut self, field: Field) -> Option<&mut Option<String>> {
        match field {
            Field::Title => Some(&mut self.title),
            Field::PubDate => Some(&mut self.pub_date),
            Field::Episode => Some(&mut self.episode),
            Field::Duration => Some(&mut self.duration),
            Field::Description => Some(&mut self.description),
            Field::ChannelTitle => None,
        }
    }

    fn build(self) -> Item {
        let episode = self.episode.as_deref().map(parse_episode).unwrap_or(0);
        Item {
            title: self.title.unwrap_or_default(),
            pub_date: self.pub_date.unwrap_or_default(),
            episode,
            duration: self.duration.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
        }
    }
}

/// Element depths inside `<rss><channel><item><field>`.
const CHANNEL_DEPTH: usize = 2;
const ITEM_DEPTH: usize = 3;
const FIELD_DEPTH: usize = 4;

/// Decodes an RSS document into a [`Feed`] for rule evaluation.
///
/// Only direct children of `<channel>` and `<item>` are considered. Unprefixed
/// `title`, `pubDate` and `description` elements are read, plus `episode` and
/// `duration` in the iTunes namespace (whatever prefix the document binds it
/// to). Text and CDATA sections are concatenated; entities in text are decoded.
///
/// # Errors
///
/// Returns [`ParseError`] if the document is not well-formed XML, has no root,
/// has a root other than `<rss>`, or ends with elements still open.
pub fn parse_feed(bytes: &[u8]) -> Result<Feed, ParseError> {
    let mut reader = NsReader::from_reader(bytes);

    let mut feed = Feed::default();
    let mut channel_title: Option<String> = None;
    // Local names of the open elements, outermost first
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut seen_root = false;
    let mut item: Option<ItemBuilder> = None;
    // Field being collected and the depth of its element
    let mut field: Option<(Field, usize)> = None;
    let mut text = String::new();

    loop {
        let (ns, event) = reader.read_resolved_event()?;
        let in_itunes = matches!(ns, ResolveResult::Bound(Namespace(uri)) if uri == ITUNES_NS);

        match event {
            Event::Start(e) if !seen_root => {
                stack.push(root_name(&e)?);
                seen_root = true;
            }
            Event::Empty(e) if !seen_root => {
                root_name(&e)?;
                seen_root = true;
            }
            Event::Start(e) => {
                let local = e.local_name().as_ref().to_vec();
                open_element(&e, &local, in_itunes, &stack, &mut item, &mut field, &mut text);
                stack.push(local);
            }
            Event::Empty(e) => {
                // A self-closing element opens and closes in one event
                let local = e.local_name().as_ref().to_vec();
                open_element(&e, &local, in_itunes, &stack, &mut item, &mut field, &mut text);
                stack.push(local);
                close_element(&mut stack, &mut feed, &mut channel_title, &mut item, &mut field, &mut text);
            }
            Event::End(_) => {
                close_element(&mut stack, &mut feed, &mut channel_title, &mut item, &mut field, &mut text);
            }
            Event::Text(t) => {
                if collecting(&field, &stack) {
                    text.push_str(&decode_entities(&String::from_utf8_lossy(&t)));
                }
            }
            Event::CData(c) => {
                if collecting(&field, &stack) {
                    text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::UnexpectedEof(
            String::from_utf8_lossy(open).into_owned(),
        ));
    }
    if !seen_root {
        return Err(ParseError::Empty);
    }

    feed.title = channel_title.unwrap_or_default();
    Ok(feed)
}

fn root_name(e: &BytesStart<'_>) -> Result<Vec<u8>, ParseError> {
    let local = e.local_name().as_ref().to_vec();
    if local != b"rss" {
        return Err(ParseError::UnexpectedRoot(
            String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        ));
    }
    Ok(local)
}

fn collecting(field: &Option<(Field, usize)>, stack: &[Vec<u8>]) -> bool {
    matches!(field, Some((_, depth)) if *depth == stack.len())
}

fn open_element(
    e: &BytesStart<'_>,
    local: &[u8],
    in_itunes: bool,
    stack: &[Vec<u8>],
    item: &mut Option<ItemBuilder>,
    field: &mut Option<(Field, usize)>,
    text: &mut String,
) {
    let depth = stack.len() + 1;
    let unprefixed = e.name().prefix().is_none();

    match depth {
        ITEM_DEPTH if is_channel(stack) && unprefixed && local == b"item" => {
            *item = Some(ItemBuilder::default());
        }
        ITEM_DEPTH if is_channel(stack) && unprefixed && local == b"title" => {
            *field = Some((Field::ChannelTitle, depth));
            text.clear();
        }
        FIELD_DEPTH if item.is_some() => {
            let selected = match (unprefixed, in_itunes, local) {
                (true, _, b"title") => Some(Field::Title),
                (true, _, b"pubDate") => Some(Field::PubDate),
                (true, _, b"description") => Some(Field::Description),
                (_, true, b"episode") => Some(Field::Episode),
                (_, true, b"duration") => Some(Field::Duration),
                _ => None,
            };
            if let Some(f) = selected {
                *field = Some((f, depth));
                text.clear();
            }
        }
        _ => {}
    }
}

fn close_element(
    stack: &mut Vec<Vec<u8>>,
    feed: &mut Feed,
    channel_title: &mut Option<String>,
    item: &mut Option<ItemBuilder>,
    field: &mut Option<(Field, usize)>,
    text: &mut String,
) {
    let depth = stack.len();

    if let Some((f, field_depth)) = *field {
        if field_depth == depth {
            let value = std::mem::take(text);
            match f {
                Field::ChannelTitle => {
                    channel_title.get_or_insert(value);
                }
                other => {
                    if let Some(slot) = item.as_mut().and_then(|b| b.slot(other)) {
                        slot.get_or_insert(value);
                    }
                }
            }
            *field = None;
        }
    }

    if depth == ITEM_DEPTH && stack.last().map(Vec::as_slice) == Some(b"item".as_slice()) {
        if let Some(builder) = item.take() {
            feed.items.push(builder.build());
        }
    }

    stack.pop();
}

fn is_channel(stack: &[Vec<u8>]) -> bool {
    stack.len() == CHANNEL_DEPTH && stack[CHANNEL_DEPTH - 1] == b"channel"
}

fn parse_episode(raw: &str) -> u32 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return 0;
    }
    match trimmed.parse::<u32>() {
        Ok(n) => n,
        Err(e) => {
            tracing::debug!(value = %trimmed, error = %e, "Ignoring non-numeric itunes:episode");
            0
        }
    }
}
