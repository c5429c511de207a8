//! Utility functions for common operations.
//!
//! This module provides reusable utilities for:
//!
//! - **URL validation**: Checks applied to configured upstream and public URLs
//! - **Text processing**: Entity decoding and title normalization shared by the
//!   parsed-data path and the byte-level output path
//!
//! # Examples
//!
//! ```
//! use rss_proxy::util::{normalize_title, validate_url};
//!
//! // Validate a configured feed source
//! let url = validate_url("https://example.com/feed.xml").unwrap();
//! assert_eq!(url.host_str(), Some("example.com"));
//!
//! // Titles compare equal regardless of entity or CDATA form
//! assert_eq!(normalize_title("Fish &amp; Chips"), normalize_title("Fish & Chips"));
//! ```

mod text;
mod url_validator;

pub use text::{decode_entities, normalize_title};
pub use url_validator::{validate_url, UrlValidationError};
