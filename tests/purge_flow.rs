//! Content events through to artifact removal, end to end.

mod common;

use std::sync::Arc;

use common::TestSite;
use subito::host::PostStatus;
use subito::{PageCache, RequestContext, ResponseState, ServeOutcome};
use tempfile::TempDir;
use time::macros::date;

fn blog_site() -> TestSite {
    let mut site = TestSite::new("https://example.test/")
        .with_post(42, "https://example.test/hello-world/")
        .with_post(43, "https://example.test/other-post/");
    site.published.insert(42, date!(2026 - 02 - 03));
    site.content_types.insert(42, "post".to_string());
    site
}

fn engine_with(dir: &TempDir, site: TestSite) -> PageCache {
    common::init_tracing();

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

fn cache_page(cache: &PageCache, url: &str, body: &[u8]) {
    cache
        .save(&get(url), &ResponseState::html(200), body)
        .expect("save");
}

fn is_hit(cache: &PageCache, url: &str) -> bool {
    matches!(
        cache.serve(&get(url)).expect("serve"),
        ServeOutcome::Hit(_)
    )
}

#[test]
fn unpublishing_removes_the_post_and_the_listing_pages() {
    let dir = TempDir::new().expect("tempdir");
    let cache = engine_with(&dir, blog_site());

    cache_page(&cache, "https://example.test/hello-world/", b"<html>post</html>");
    cache_page(&cache, "https://example.test/", b"<html>home</html>");
    cache_page(&cache, "https://example.test/other-post/", b"<html>other</html>");

    cache
        .events()
        .post_status_changed(42, &PostStatus::Publish, &PostStatus::Draft);

    // Nothing happens until the deferred batch drains.
    assert!(is_hit(&cache, "https://example.test/hello-world/"));

    cache.shutdown();

    assert!(!is_hit(&cache, "https://example.test/hello-world/"));
    assert!(!is_hit(&cache, "https://example.test/"));
    // An unrelated post survives.
    assert!(is_hit(&cache, "https://example.test/other-post/"));
}

#[test]
fn publishing_a_brand_new_post_purges_nothing() {
    let dir = TempDir::new().expect("tempdir");
    let cache = engine_with(&dir, blog_site());

    cache_page(&cache, "https://example.test/", b"<html>home</html>");

    cache
        .events()
        .post_status_changed(42, &PostStatus::AutoDraft, &PostStatus::Publish);
    cache.shutdown();

    assert!(is_hit(&cache, "https://example.test/"));
}

#[test]
fn term_deletion_wipes_the_whole_site_cache() {
    let mut site = blog_site();
    site.viewable_taxonomies.insert("category".to_string());

    let dir = TempDir::new().expect("tempdir");
    let cache = engine_with(&dir, site);

    cache_page(&cache, "https://example.test/hello-world/", b"<html>a</html>");
    cache_page(&cache, "https://example.test/other-post/", b"<html>b</html>");

    cache.events().term_changed("category");
    cache.shutdown();

    assert!(!is_hit(&cache, "https://example.test/hello-world/"));
    assert!(!is_hit(&cache, "https://example.test/other-post/"));
}

#[test]
fn moving_a_post_between_terms_purges_the_old_archive() {
    let mut site = blog_site();
    site.viewable_taxonomies.insert("category".to_string());
    site.term_links.insert(
        (5, "category".to_string()),
        "https://example.test/category/news/".to_string(),
    );
    site.term_links.insert(
        (6, "category".to_string()),
        "https://example.test/category/tech/".to_string(),
    );

    let dir = TempDir::new().expect("tempdir");
    let cache = engine_with(&dir, site);

    cache_page(
        &cache,
        "https://example.test/category/news/",
        b"<html>news archive</html>",
    );

    // The post leaves "news" for "tech".
    cache.events().terms_assigned(42, &[6], &[5], "category");
    cache.shutdown();

    assert!(!is_hit(&cache, "https://example.test/category/news/"));
}

#[test]
fn full_purge_dominates_queued_item_purges() {
    let dir = TempDir::new().expect("tempdir");
    let cache = engine_with(&dir, blog_site());

    cache
        .events()
        .post_status_changed(42, &PostStatus::Publish, &PostStatus::Draft);
    cache.events().menu_updated();

    let batch = cache.events().batch();
    assert!(batch.is_full_purge_pending());
    assert_eq!(batch.count(), 0);
}

#[test]
fn duplicate_events_queue_once() {
    let dir = TempDir::new().expect("tempdir");
    let cache = engine_with(&dir, blog_site());

    cache.events().comment_count_changed(42);
    cache.events().comment_count_changed(42);

    assert_eq!(cache.events().batch().count(), 1);
}

#[test]
fn oversized_term_assignments_escalate_to_a_full_purge() {
    let mut site = blog_site();
    site.viewable_taxonomies.insert("post_tag".to_string());

    let dir = TempDir::new().expect("tempdir");
    let cache = engine_with(&dir, site);

    let assigned: Vec<u64> = (1..=1_501).collect();
    cache.events().terms_assigned(42, &assigned, &[], "post_tag");

    assert!(cache.events().batch().is_full_purge_pending());
}

#[test]
fn clearing_an_empty_cache_still_succeeds() {
    let dir = TempDir::new().expect("tempdir");
    let cache = engine_with(&dir, blog_site());

    assert!(cache.clear());
    assert!(cache.clear());
}

#[test]
fn template_edits_wipe_the_site() {
    let mut site = blog_site();
    site = site.with_post(90, "https://example.test/?p=90");
    site.content_types.insert(90, "wp_template".to_string());

    let dir = TempDir::new().expect("tempdir");
    let cache = engine_with(&dir, site);

    cache_page(&cache, "https://example.test/hello-world/", b"<html></html>");

    cache
        .events()
        .post_status_changed(90, &PostStatus::Publish, &PostStatus::Publish);
    cache.shutdown();

    assert!(!is_hit(&cache, "https://example.test/hello-world/"));
}
