//! HTTP surface: one route per configured feed plus a health check.
//!
//! Every feed request runs the same pipeline (fetch, parse, rules, byte
//! filter) and answers only once the whole document is ready.

use actix_web::http::header::CACHE_CONTROL;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{feed_url_from_base, FeedConfig};
use crate::feed::{
    apply_rules, filter_xml, parse_feed, CacheError, FeedCache, FilterOptions, KeepTitles,
    ParseError, RuleError,
};

pub const FEED_CONTENT_TYPE: &str = "application/rss+xml; charset=utf-8";
pub const FEED_CACHE_CONTROL: &str = "public, max-age=900";

/// Request-level failure, mapped to an HTTP status with the error text as body.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Upstream unavailable and nothing cached to fall back on.
    #[error("upstream fetch failed: {0}")]
    Upstream(#[from] CacheError),
    #[error("upstream feed could not be parsed: {0}")]
    Parse(#[from] ParseError),
    #[error("feed rules could not be applied: {0}")]
    Rules(#[from] RuleError),
}

impl ResponseError for ServeError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServeError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServeError::Parse(_) | ServeError::Rules(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Shared request state: the cache and the public base URL used for
/// `<itunes:new-feed-url>` rewriting.
pub struct FeedProxy {
    cache: Arc<FeedCache>,
    base_url: Option<String>,
}

impl FeedProxy {
    pub fn new(cache: Arc<FeedCache>, base_url: Option<String>) -> Self {
        Self { cache, base_url }
    }

    /// Produces the filtered document for one feed.
    ///
    /// The upstream bytes are fetched once and used twice: parsed to decide
    /// which items survive, then filtered to build the output.
    pub async fn render(&self, feed: &FeedConfig) -> Result<Vec<u8>, ServeError> {
        tracing::info!(feed_id = %feed.id, source = %feed.source, "Fetching upstream feed");
        let fetched = self.cache.fetch(&feed.source).await?;
        tracing::info!(
            feed_id = %feed.id,
            cache_status = %fetched.status,
            bytes = fetched.body.len(),
            "Fetched upstream feed"
        );

        let parsed = parse_feed(&fetched.body)?;
        tracing::debug!(feed_id = %feed.id, items_total = parsed.items.len(), "Parsed upstream feed");

        let kept = apply_rules(&parsed, &feed.rules)?;
        tracing::info!(
            feed_id = %feed.id,
            items_kept = kept.items.len(),
            items_dropped = parsed.items.len() - kept.items.len(),
            "Applied rules"
        );

        let keep: KeepTitles = kept.items.iter().map(|item| item.title.as_str()).collect();
        let options = FilterOptions {
            rewrite_new_feed_url: self
                .base_url
                .as_deref()
                .and_then(|base| feed_url_from_base(base, &feed.id)),
        };

        Ok(filter_xml(&fetched.body, &keep, &options))
    }
}

async fn serve_feed(
    proxy: web::Data<FeedProxy>,
    feed: web::Data<FeedConfig>,
) -> Result<HttpResponse, ServeError> {
    match proxy.render(&feed).await {
        Ok(body) => {
            tracing::info!(feed_id = %feed.id, bytes = body.len(), "Served feed");
            Ok(HttpResponse::Ok()
                .content_type(FEED_CONTENT_TYPE)
                .insert_header((CACHE_CONTROL, FEED_CACHE_CONTROL))
                .body(body))
        }
        Err(e) => {
            tracing::error!(feed_id = %feed.id, source = %feed.source, error = %e, "Failed to serve feed");
            Err(e)
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

/// Path a feed is served under: `{prefix}/{id}.xml`.
pub fn feed_path(route_prefix: &str, feed_id: &str) -> String {
    format!("{}/{}.xml", route_prefix.trim_end_matches('/'), feed_id)
}

/// Registers the health check and one GET route per feed.
///
/// Each feed's config is attached to its own resource, so the handler gets it
/// without a lookup. Ids not listed here fall through to actix's 404.
pub fn routes(cfg: &mut web::ServiceConfig, route_prefix: &str, feeds: &[FeedConfig]) {
    let prefix = route_prefix.trim_end_matches('/');

    cfg.route(&format!("{prefix}/healthz"), web::get().to(healthz));

    for feed in feeds {
        cfg.service(
            web::resource(feed_path(prefix, &feed.id))
                .app_data(web::Data::new(feed.clone()))
                .route(web::get().to(serve_feed)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Rule;
    use crate::feed::fixtures::{SAMPLE_RSS, UPSTREAM_NEW_FEED_URL};
    use crate::feed::{http_client, DEFAULT_TTL};
    use actix_web::test::{call_and_read_body, call_service, init_service, read_body, TestRequest};
    use actix_web::App;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn proxy(base_url: Option<&str>) -> web::Data<FeedProxy> {
        let client = http_client(std::time::Duration::from_secs(5)).unwrap();
        let cache = Arc::new(FeedCache::new(client, DEFAULT_TTL));
        web::Data::new(FeedProxy::new(cache, base_url.map(str::to_string)))
    }

    fn feed_config(id: &str, source: String, rules: Vec<Rule>) -> FeedConfig {
        FeedConfig {
            id: id.to_string(),
            source,
            rules,
        }
    }

    async fn upstream(template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    #[actix_web::test]
    async fn test_end_to_end_filter_and_rewrite() {
        let server = upstream(ResponseTemplate::new(200).set_body_string(SAMPLE_RSS)).await;
        let feeds = vec![feed_config(
            "test",
            format!("{}/feed.xml", server.uri()),
            vec![Rule::TitleContains {
                value: "KEEP".to_string(),
            }],
        )];

        let app = init_service(
            App::new()
                .app_data(proxy(Some("https://podcasts.example.com/rss/")))
                .configure(|cfg| routes(cfg, "/rss", &feeds)),
        )
        .await;

        let req = TestRequest::get().uri("/rss/test.xml").to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            FEED_CONTENT_TYPE
        );
        assert_eq!(
            resp.headers().get("cache-control").unwrap(),
            FEED_CACHE_CONTROL
        );

        let body = read_body(resp).await;
        let body = std::str::from_utf8(&body).unwrap();

        assert!(body.contains(
            "    <item>\n      <title>KEEP ME</title>\n      <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>"
        ));
        assert!(body.contains("<![CDATA[<p>Hello <strong>world</strong></p>]]>"));
        assert!(body.contains(
            "<item>\n      <title><![CDATA[CDATA KEEP]]></title>\n      <itunes:duration>10:01</itunes:duration>\n    </item>"
        ));
        assert!(!body.contains("Fish &amp; Chips"));
        assert!(!body.contains("DROP ME"));
        assert!(body.contains(
            "<itunes:new-feed-url>https://podcasts.example.com/rss/test.xml</itunes:new-feed-url>"
        ));
        assert!(!body.contains(UPSTREAM_NEW_FEED_URL));
    }

    #[actix_web::test]
    async fn test_without_base_url_keeps_upstream_new_feed_url() {
        let server = upstream(ResponseTemplate::new(200).set_body_string(SAMPLE_RSS)).await;
        let feeds = vec![feed_config("test", server.uri(), Vec::new())];

        let app = init_service(
            App::new()
                .app_data(proxy(None))
                .configure(|cfg| routes(cfg, "/rss", &feeds)),
        )
        .await;

        let req = TestRequest::get().uri("/rss/test.xml").to_request();
        let body = call_and_read_body(&app, req).await;
        assert_eq!(std::str::from_utf8(&body).unwrap(), SAMPLE_RSS);
    }

    #[actix_web::test]
    async fn test_upstream_failure_is_bad_gateway() {
        let server = upstream(ResponseTemplate::new(500)).await;
        let feeds = vec![feed_config("test", server.uri(), Vec::new())];

        let app = init_service(
            App::new()
                .app_data(proxy(None))
                .configure(|cfg| routes(cfg, "/rss", &feeds)),
        )
        .await;

        let req = TestRequest::get().uri("/rss/test.xml").to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = read_body(resp).await;
        assert!(std::str::from_utf8(&body).unwrap().contains("status 500"));
    }

    #[actix_web::test]
    async fn test_unparseable_upstream_is_internal_error() {
        let server =
            upstream(ResponseTemplate::new(200).set_body_string("<html><body>oops</body></html>"))
                .await;
        let feeds = vec![feed_config("test", server.uri(), Vec::new())];

        let app = init_service(
            App::new()
                .app_data(proxy(None))
                .configure(|cfg| routes(cfg, "/rss", &feeds)),
        )
        .await;

        let req = TestRequest::get().uri("/rss/test.xml").to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn test_invalid_regex_is_internal_error() {
        let server = upstream(ResponseTemplate::new(200).set_body_string(SAMPLE_RSS)).await;
        let feeds = vec![feed_config(
            "test",
            server.uri(),
            vec![Rule::TitleRegex {
                value: "([unclosed".to_string(),
            }],
        )];

        let app = init_service(
            App::new()
                .app_data(proxy(None))
                .configure(|cfg| routes(cfg, "/rss", &feeds)),
        )
        .await;

        let req = TestRequest::get().uri("/rss/test.xml").to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = read_body(resp).await;
        assert!(std::str::from_utf8(&body).unwrap().contains("([unclosed"));
    }

    #[actix_web::test]
    async fn test_healthz_and_unknown_feed() {
        let feeds = vec![feed_config("test", "http://127.0.0.1:1/".to_string(), Vec::new())];
        let app = init_service(
            App::new()
                .app_data(proxy(None))
                .configure(|cfg| routes(cfg, "/rss/", &feeds)),
        )
        .await;

        let req = TestRequest::get().uri("/rss/healthz").to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(read_body(resp).await, "ok".as_bytes());

        let req = TestRequest::get().uri("/rss/other.xml").to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_feed_path() {
        assert_eq!(feed_path("/rss", "daily"), "/rss/daily.xml");
        assert_eq!(feed_path("/rss/", "daily"), "/rss/daily.xml");
        assert_eq!(feed_path("", "daily"), "/daily.xml");
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(
            ServeError::Upstream(CacheError::HttpStatus(503)).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServeError::Parse(ParseError::Empty).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
