//! Caching RSS/podcast proxy that serves rule-filtered subsets of upstream feeds.
//!
//! Served documents are assembled from the upstream bytes, so everything a
//! podcast client relies on (namespaces, CDATA, enclosures, extension
//! elements) survives untouched; only dropped `<item>` elements and the
//! optional `<itunes:new-feed-url>` rewrite differ from the source.

pub mod config;
pub mod feed;
pub mod server;
pub mod util;
