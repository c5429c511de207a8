//! Upstream feed handling: fetching, parsing, rule evaluation and byte filtering.
//!
//! A served feed goes through four stages:
//!
//! - [`FeedCache`] - conditional HTTP cache with stale fallback
//! - [`parse_feed`] - namespace-aware decode of the fields rules look at
//! - [`apply_rules`] - ordered, AND-combined item rules
//! - [`filter_xml`] - copies the kept `<item>` spans out of the original bytes
//!
//! Parsing only drives the decision; the response is always built from the
//! upstream bytes so nothing the parser doesn't understand is lost.
//!
//! # Example
//!
//! ```ignore
//! let fetched = cache.fetch(&feed.source).await?;
//! let parsed = parse_feed(&fetched.body)?;
//! let kept = apply_rules(&parsed, &feed.rules)?;
//! let keep: KeepTitles = kept.items.iter().map(|i| i.title.as_str()).collect();
//! let body = filter_xml(&fetched.body, &keep, &FilterOptions::default());
//! ```

mod cache;
mod filter;
mod parser;
mod rules;

#[cfg(test)]
pub(crate) mod fixtures;

pub use cache::{
    http_client, CacheError, CacheStatus, Clock, FeedCache, Fetched, SystemClock, DEFAULT_TIMEOUT,
    DEFAULT_TTL, USER_AGENT,
};
pub use filter::{filter_xml, FilterOptions, KeepTitles};
pub use parser::{parse_feed, Feed, Item, ParseError};
pub use rules::{apply_rules, parse_itunes_duration, RuleError};
