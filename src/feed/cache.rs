use bytes::Bytes;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long a fetched body is served without contacting the upstream.
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Timeout for a single upstream request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub const USER_AGENT: &str = "rss-proxy/1.0";

/// Maximum upstream body size (10MB).
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024;

const MAX_REDIRECTS: usize = 3;

/// Errors surfaced by [`FeedCache::fetch`] when no cached body can stand in.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Network-level error (DNS, connection, TLS, timeout, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Upstream answered with a status other than 200 or 304
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// 304 received for a URL with no cached body
    #[error("upstream sent not-modified without anything to revalidate")]
    NotModifiedWithoutBody,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// How a body returned by [`FeedCache::fetch`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from cache within the TTL, no network call.
    Hit,
    /// Fetched fresh from upstream (200).
    Miss,
    /// Upstream confirmed the cached body is current (304).
    Revalidated,
    /// Upstream failed; an older cached body was served instead.
    Stale,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Revalidated => "REVALIDATED",
            CacheStatus::Stale => "STALE",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time source for freshness checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Monotonic wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A body returned by the cache together with how it was obtained.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: Bytes,
    pub status: CacheStatus,
}

struct CacheEntry {
    body: Bytes,
    etag: Option<String>,
    last_modified: Option<String>,
    fetched_at: Instant,
}

/// What a request needs from an expired entry; cloned so no lock is held
/// across the network call.
struct Snapshot {
    body: Bytes,
    etag: Option<String>,
    last_modified: Option<String>,
}

/// Builds the upstream HTTP client: fixed User-Agent, request timeout and a
/// short redirect chain.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, CacheError> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(redirect_policy())
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .timeout(timeout)
        .build()?;
    Ok(client)
}

fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev == url) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following upstream redirect"
        );
        attempt.follow()
    })
}

/// Conditional HTTP cache keyed by upstream URL.
///
/// One instance is shared by every feed and request worker. The entry table
/// sits behind a read/write lock that is never held across a network call, so
/// two requests for the same expired URL may both go upstream; the last one
/// to finish wins. Entries are never evicted.
pub struct FeedCache {
    client: reqwest::Client,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl FeedCache {
    pub fn new(client: reqwest::Client, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            clock: Arc::new(SystemClock),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the time source (tests move time without sleeping).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the body for `url`, from cache when fresh, otherwise via a
    /// conditional GET.
    ///
    /// Upstream failures (transport errors, unexpected statuses, body read
    /// failures) fall back to the previously cached body with
    /// [`CacheStatus::Stale`] whenever that body is non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the upstream fails and no usable cached body
    /// exists, or when a 304 arrives for a URL without a cached body.
    pub async fn fetch(&self, url: &str) -> Result<Fetched, CacheError> {
        let snapshot = {
            let entries = self.entries.read();
            match entries.get(url) {
                Some(entry)
                    if self.clock.now().saturating_duration_since(entry.fetched_at) < self.ttl =>
                {
                    return Ok(Fetched {
                        body: entry.body.clone(),
                        status: CacheStatus::Hit,
                    });
                }
                Some(entry) => Some(Snapshot {
                    body: entry.body.clone(),
                    etag: entry.etag.clone(),
                    last_modified: entry.last_modified.clone(),
                }),
                None => None,
            }
        };

        let mut request = self.client.get(url);
        if let Some(snap) = &snapshot {
            if let Some(etag) = snap.etag.as_deref().filter(|v| !v.is_empty()) {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(lm) = snap.last_modified.as_deref().filter(|v| !v.is_empty()) {
                request = request.header(IF_MODIFIED_SINCE, lm);
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return stale_or(url, snapshot, CacheError::Network(e)),
        };

        match response.status() {
            StatusCode::NOT_MODIFIED => {
                let Some(snap) = snapshot.filter(|s| !s.body.is_empty()) else {
                    return Err(CacheError::NotModifiedWithoutBody);
                };
                if let Some(entry) = self.entries.write().get_mut(url) {
                    entry.fetched_at = self.clock.now();
                }
                tracing::debug!(url = %url, "Upstream not modified");
                Ok(Fetched {
                    body: snap.body,
                    status: CacheStatus::Revalidated,
                })
            }
            StatusCode::OK => {
                let etag = header_string(&response, ETAG);
                let last_modified = header_string(&response, LAST_MODIFIED);

                let body = match read_limited_bytes(response, MAX_FEED_SIZE).await {
                    Ok(body) => Bytes::from(body),
                    Err(e) => return stale_or(url, snapshot, e),
                };

                self.entries.write().insert(
                    url.to_owned(),
                    CacheEntry {
                        body: body.clone(),
                        etag,
                        last_modified,
                        fetched_at: self.clock.now(),
                    },
                );
                Ok(Fetched {
                    body,
                    status: CacheStatus::Miss,
                })
            }
            status => stale_or(url, snapshot, CacheError::HttpStatus(status.as_u16())),
        }
    }
}

/// Serves the snapshot's body as stale if it has one, otherwise surfaces `error`.
fn stale_or(url: &str, snapshot: Option<Snapshot>, error: CacheError) -> Result<Fetched, CacheError> {
    match snapshot {
        Some(snap) if !snap.body.is_empty() => {
            tracing::warn!(url = %url, error = %error, "Upstream failed, serving stale copy");
            Ok(Fetched {
                body: snap.body,
                status: CacheStatus::Stale,
            })
        }
        _ => Err(error),
    }
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Reads a response body while enforcing a size limit.
///
/// Streams the body chunk-by-chunk and aborts early if the limit is exceeded,
/// preventing memory exhaustion from oversized or malicious responses.
/// A body shorter than its advertised Content-Length is reported as
/// [`CacheError::IncompleteResponse`].
async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, CacheError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(CacheError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(CacheError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(CacheError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(CacheError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
