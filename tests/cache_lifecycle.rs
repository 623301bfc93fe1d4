//! End-to-end read/write lifecycle through the full engine.

mod common;

use std::sync::Arc;

use common::TestSite;
use subito::{PageCache, RequestContext, ResponseState, SaveOutcome, ServeOutcome};
use tempfile::TempDir;

fn engine(dir: &TempDir) -> PageCache {
    common::init_tracing();

    let site = TestSite::new("https://example.test/")
        .with_post(42, "https://example.test/hello-world/");

    PageCache::full(
        dir.path().join("cache"),
        dir.path().join("install"),
        Arc::new(site),
        None,
    )
    .expect("engine boots")
}

fn get(url: &str) -> RequestContext {
    RequestContext::builder(url).expect("valid url").build()
}

#[test]
fn first_visit_misses_then_hits_after_save() {
    let dir = TempDir::new().expect("tempdir");
    let cache = engine(&dir);
    let request = get("https://example.test/hello-world/");
    let body = b"<html><body>hello world</body></html>";

    assert!(matches!(
        cache.serve(&request).expect("serve"),
        ServeOutcome::Miss
    ));

    let saved = cache
        .save(&request, &ResponseState::html(200), body)
        .expect("save");
    assert!(matches!(saved, SaveOutcome::Saved { variants } if variants >= 1));

    let ServeOutcome::Hit(page) = cache.serve(&request).expect("serve") else {
        panic!("expected a hit after save");
    };
    assert_eq!(page.status, 200);
    assert_eq!(&page.body[..], body);

    let names: Vec<&str> = page.headers.iter().map(|(name, _)| name.as_str()).collect();
    assert!(names.contains(&"Last-Modified"));
    assert!(names.contains(&"X-Cache-Age"));
    assert!(names.contains(&"X-Cached-By"));
}

#[test]
fn revalidation_with_the_served_last_modified_gets_a_304() {
    let dir = TempDir::new().expect("tempdir");
    let cache = engine(&dir);
    let request = get("https://example.test/hello-world/");

    cache
        .save(&request, &ResponseState::html(200), b"<html></html>")
        .expect("save");

    let ServeOutcome::Hit(page) = cache.serve(&request).expect("serve") else {
        panic!("expected a hit");
    };
    let last_modified = page
        .headers
        .iter()
        .find(|(name, _)| name == "Last-Modified")
        .map(|(_, value)| value.clone())
        .expect("Last-Modified header");

    let revalidation = RequestContext::builder("https://example.test/hello-world/")
        .expect("valid url")
        .header("If-Modified-Since", &last_modified)
        .build();

    let ServeOutcome::NotModified(response) = cache.serve(&revalidation).expect("serve") else {
        panic!("expected a 304");
    };
    assert_eq!(response.status, 304);
    assert!(response.body.is_empty());
}

#[test]
fn query_strings_bypass_the_cache_entirely() {
    let dir = TempDir::new().expect("tempdir");
    let cache = engine(&dir);

    let bare = get("https://example.test/hello-world/");
    cache
        .save(&bare, &ResponseState::html(200), b"<html></html>")
        .expect("save");

    let with_query = get("https://example.test/hello-world/?preview=1");
    assert!(matches!(
        cache.serve(&with_query).expect("serve"),
        ServeOutcome::Miss
    ));
    assert_eq!(
        cache
            .save(&with_query, &ResponseState::html(200), b"<html></html>")
            .expect("save"),
        SaveOutcome::Skipped
    );
}

#[test]
fn non_html_responses_are_not_stored() {
    let dir = TempDir::new().expect("tempdir");
    let cache = engine(&dir);
    let request = get("https://example.test/feed.xml");

    let mut response = ResponseState::html(200);
    response.content_type = "application/rss+xml; charset=UTF-8".to_string();

    assert_eq!(
        cache
            .save(&request, &response, b"<rss></rss>")
            .expect("save"),
        SaveOutcome::Skipped
    );
}

#[test]
fn any_2xx_response_is_stored() {
    let dir = TempDir::new().expect("tempdir");
    let cache = engine(&dir);
    let request = get("https://example.test/hello-world/");

    let saved = cache
        .save(&request, &ResponseState::html(206), b"<html>partial</html>")
        .expect("save");
    assert!(matches!(saved, SaveOutcome::Saved { .. }));
    assert!(matches!(
        cache.serve(&request).expect("serve"),
        ServeOutcome::Hit(_)
    ));
}

#[test]
fn error_responses_are_not_stored() {
    let dir = TempDir::new().expect("tempdir");
    let cache = engine(&dir);
    let request = get("https://example.test/gone/");

    assert_eq!(
        cache
            .save(&request, &ResponseState::html(404), b"<html>gone</html>")
            .expect("save"),
        SaveOutcome::Skipped
    );
}

#[test]
fn logged_in_visitors_bypass_cached_pages() {
    let dir = TempDir::new().expect("tempdir");
    let cache = engine(&dir);

    let anonymous = get("https://example.test/hello-world/");
    cache
        .save(&anonymous, &ResponseState::html(200), b"<html></html>")
        .expect("save");

    let session = RequestContext::builder("https://example.test/hello-world/")
        .expect("valid url")
        .cookie("site_logged_in_0a1b", "token")
        .build();

    assert!(matches!(
        cache.serve(&session).expect("serve"),
        ServeOutcome::Miss
    ));
}
