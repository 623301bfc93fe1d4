//! The stock classification stages.

use std::sync::Arc;

use regex::Regex;
use tracing::warn;

use crate::config::{ConfigStore, EXCLUSIONS_KEY};
use crate::http::RequestContext;

use super::{Pipe, PipelineContext, Verdict};

fn reject_if(condition: bool) -> Verdict {
    if condition { Verdict::Reject } else { Verdict::Continue }
}

/// Only successful (2xx) responses are cacheable. With no response yet (read
/// path) the stage passes; the artifact on disk was a success when written.
pub struct ResponseCode;

impl Pipe for ResponseCode {
    fn name(&self) -> &'static str {
        "response_code"
    }

    fn handle(&self, ctx: &PipelineContext<'_>) -> Verdict {
        match ctx.response {
            None => Verdict::Continue,
            Some(response) => reject_if(!(200..300).contains(&response.status)),
        }
    }
}

/// Honors the execution-context bypass signals on the request.
pub struct BypassFlags;

impl Pipe for BypassFlags {
    fn name(&self) -> &'static str {
        "bypass_flags"
    }

    fn handle(&self, ctx: &PipelineContext<'_>) -> Verdict {
        reject_if(ctx.request.flags().any())
    }
}

/// Administrative screens are never cached.
pub struct AdminPath {
    marker: String,
}

impl AdminPath {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl Default for AdminPath {
    fn default() -> Self {
        Self::new("/admin")
    }
}

impl Pipe for AdminPath {
    fn name(&self) -> &'static str {
        "admin_path"
    }

    fn handle(&self, ctx: &PipelineContext<'_>) -> Verdict {
        reject_if(ctx.request.path().contains(&self.marker))
    }
}

/// Logged-in sessions and password-entry sessions see personalized pages.
///
/// Detection is by cookie-name substring, matching the host's session cookie
/// naming scheme.
pub struct Authenticated {
    markers: Vec<String>,
}

impl Authenticated {
    pub fn new(markers: Vec<String>) -> Self {
        Self { markers }
    }

    fn matches(&self, request: &RequestContext) -> bool {
        request
            .cookie_names()
            .any(|name| self.markers.iter().any(|marker| name.contains(marker.as_str())))
    }
}

impl Default for Authenticated {
    fn default() -> Self {
        Self::new(vec!["logged_in".to_string(), "postpass_".to_string()])
    }
}

impl Pipe for Authenticated {
    fn name(&self) -> &'static str {
        "authenticated"
    }

    fn handle(&self, ctx: &PipelineContext<'_>) -> Verdict {
        reject_if(self.matches(ctx.request))
    }
}

/// GET and HEAD only.
pub struct MethodCheck;

impl Pipe for MethodCheck {
    fn name(&self) -> &'static str {
        "method"
    }

    fn handle(&self, ctx: &PipelineContext<'_>) -> Verdict {
        reject_if(!ctx.request.method().is_cacheable())
    }
}

/// The login screen is a session boundary, never cached.
pub struct LoginPath {
    slug: String,
}

impl LoginPath {
    pub fn new(slug: impl Into<String>) -> Self {
        Self { slug: slug.into() }
    }
}

impl Default for LoginPath {
    fn default() -> Self {
        Self::new("login")
    }
}

impl Pipe for LoginPath {
    fn name(&self) -> &'static str {
        "login_path"
    }

    fn handle(&self, ctx: &PipelineContext<'_>) -> Verdict {
        reject_if(ctx.request.path().trim_matches('/') == self.slug)
    }
}

/// Query strings parameterize the page; the artifact key ignores them, so
/// any query at all means bypass.
pub struct QueryString;

impl Pipe for QueryString {
    fn name(&self) -> &'static str {
        "query_string"
    }

    fn handle(&self, ctx: &PipelineContext<'_>) -> Verdict {
        reject_if(!ctx.request.query().is_empty())
    }
}

/// User-configured exclusions, evaluated against live config.
///
/// Each entry is tried as an exact path match first, then as a regular
/// expression. An entry that fails to compile is logged and skipped rather
/// than disabling the whole list.
pub struct Exclusion {
    config: Arc<ConfigStore>,
}

impl Exclusion {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }

    fn matches(&self, path: &str) -> bool {
        for pattern in self.config.string_list(EXCLUSIONS_KEY) {
            if pattern == path {
                return true;
            }

            match Regex::new(&pattern) {
                Ok(regex) => {
                    if regex.is_match(path) {
                        return true;
                    }
                }
                Err(compile_error) => {
                    warn!(
                        pattern,
                        error = %compile_error,
                        "Skipping exclusion pattern that is not a valid regex"
                    );
                }
            }
        }

        false
    }
}

impl Pipe for Exclusion {
    fn name(&self) -> &'static str {
        "exclusion"
    }

    fn handle(&self, ctx: &PipelineContext<'_>) -> Verdict {
        reject_if(self.matches(ctx.request.path()))
    }
}

/// Path prefixes owned by another subsystem, active only while that
/// subsystem is. An inactive integration is a no-op stage.
pub struct IntegrationExclusion {
    integration: &'static str,
    active: bool,
    prefixes: Vec<&'static str>,
}

impl IntegrationExclusion {
    pub fn new(integration: &'static str, active: bool, prefixes: Vec<&'static str>) -> Self {
        Self {
            integration,
            active,
            prefixes,
        }
    }

    /// Donation flows: per-campaign forms and donor-specific screens.
    pub fn donations(active: bool) -> Self {
        Self::new(
            "donations",
            active,
            vec!["/donations", "/donation-confirmation", "/donor-dashboard"],
        )
    }

    /// Storefront flows: cart, checkout, and account pages.
    pub fn storefront(active: bool) -> Self {
        Self::new("storefront", active, vec!["/cart", "/checkout", "/my-account"])
    }
}

impl Pipe for IntegrationExclusion {
    fn name(&self) -> &'static str {
        self.integration
    }

    fn handle(&self, ctx: &PipelineContext<'_>) -> Verdict {
        if !self.active {
            return Verdict::Continue;
        }

        reject_if(
            self.prefixes
                .iter()
                .any(|prefix| ctx.request.path().starts_with(prefix)),
        )
    }
}

/// Only HTML documents are cached; everything else has its own delivery path.
pub struct ContentType;

impl Pipe for ContentType {
    fn name(&self) -> &'static str {
        "content_type"
    }

    fn handle(&self, ctx: &PipelineContext<'_>) -> Verdict {
        match ctx.response {
            // Write path only; without a response the content type is unprovable.
            None => Verdict::Reject,
            Some(response) => reject_if(!response.content_type.starts_with("text/html;")),
        }
    }
}

/// Host-state vetoes that only exist after rendering: machine-facing
/// handlers, password prompts, and installs without pretty permalinks.
///
/// A password-protected front page or archive still caches; the prompt there
/// is rendered per item, not for the page itself.
pub struct HostState;

impl Pipe for HostState {
    fn name(&self) -> &'static str {
        "host_state"
    }

    fn handle(&self, ctx: &PipelineContext<'_>) -> Verdict {
        let Some(response) = ctx.response else {
            return Verdict::Continue;
        };

        let password_veto =
            response.password_protected && !response.is_front_page && !response.is_archive;

        reject_if(
            response.is_robots
                || response.is_feed
                || password_veto
                || !response.pretty_permalinks,
        )
    }
}

/// The rendered object's own "never cache me" flag.
pub struct ObjectExcluded;

impl Pipe for ObjectExcluded {
    fn name(&self) -> &'static str {
        "object_excluded"
    }

    fn handle(&self, ctx: &PipelineContext<'_>) -> Verdict {
        match ctx.response {
            None => Verdict::Continue,
            Some(response) => reject_if(response.object_excluded),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::http::{ExecutionFlags, Method, RequestContext, ResponseState};

    fn request(url: &str) -> RequestContext {
        RequestContext::builder(url).expect("valid url").build()
    }

    fn serve_ctx(request: &RequestContext) -> PipelineContext<'_> {
        PipelineContext {
            request,
            response: None,
        }
    }

    #[test]
    fn response_code_passes_without_a_response() {
        let request = request("https://example.test/");
        assert_eq!(ResponseCode.handle(&serve_ctx(&request)), Verdict::Continue);
    }

    #[test]
    fn response_code_accepts_the_whole_2xx_range() {
        let request = request("https://example.test/partial");

        for status in [200, 204, 206, 299] {
            let response = ResponseState::html(status);
            let ctx = PipelineContext {
                request: &request,
                response: Some(&response),
            };
            assert_eq!(ResponseCode.handle(&ctx), Verdict::Continue);
        }
    }

    #[test]
    fn response_code_rejects_outside_2xx() {
        let request = request("https://example.test/missing");

        for status in [199, 301, 404, 500] {
            let response = ResponseState::html(status);
            let ctx = PipelineContext {
                request: &request,
                response: Some(&response),
            };
            assert_eq!(ResponseCode.handle(&ctx), Verdict::Reject);
        }
    }

    #[test]
    fn bypass_flags_reject_background_work() {
        let request = RequestContext::builder("https://example.test/")
            .expect("valid url")
            .flags(ExecutionFlags {
                background_job: true,
                ..Default::default()
            })
            .build();

        assert_eq!(BypassFlags.handle(&serve_ctx(&request)), Verdict::Reject);
    }

    #[test]
    fn admin_path_matches_anywhere_in_the_path() {
        let admin = request("https://example.test/admin/settings");
        let public = request("https://example.test/blog/admin-tips/");

        assert_eq!(
            AdminPath::default().handle(&serve_ctx(&admin)),
            Verdict::Reject
        );
        // Substring match by design of the host's URL space; a public slug
        // containing "admin-" does not start a new path segment with it.
        assert_eq!(
            AdminPath::default().handle(&serve_ctx(&public)),
            Verdict::Continue
        );
    }

    #[test]
    fn session_cookies_reject() {
        let logged_in = RequestContext::builder("https://example.test/")
            .expect("valid url")
            .cookie("host_logged_in_a1b2", "token")
            .build();
        let anonymous = RequestContext::builder("https://example.test/")
            .expect("valid url")
            .cookie("consent", "yes")
            .build();

        assert_eq!(
            Authenticated::default().handle(&serve_ctx(&logged_in)),
            Verdict::Reject
        );
        assert_eq!(
            Authenticated::default().handle(&serve_ctx(&anonymous)),
            Verdict::Continue
        );
    }

    #[test]
    fn only_safe_methods_pass() {
        let get = request("https://example.test/");
        let post = RequestContext::builder("https://example.test/")
            .expect("valid url")
            .method(Method::Post)
            .build();

        assert_eq!(MethodCheck.handle(&serve_ctx(&get)), Verdict::Continue);
        assert_eq!(MethodCheck.handle(&serve_ctx(&post)), Verdict::Reject);
    }

    #[test]
    fn login_path_matches_with_or_without_slashes() {
        let login = request("https://example.test/login/");
        let blog = request("https://example.test/login-help/");

        assert_eq!(
            LoginPath::default().handle(&serve_ctx(&login)),
            Verdict::Reject
        );
        assert_eq!(
            LoginPath::default().handle(&serve_ctx(&blog)),
            Verdict::Continue
        );
    }

    #[test]
    fn any_query_string_rejects() {
        let with_query = request("https://example.test/about?preview=1");
        let bare = request("https://example.test/about");

        assert_eq!(QueryString.handle(&serve_ctx(&with_query)), Verdict::Reject);
        assert_eq!(QueryString.handle(&serve_ctx(&bare)), Verdict::Continue);
    }

    #[test]
    fn exclusions_match_exact_then_regex() {
        let config = ConfigStore::in_memory();
        config.set(
            EXCLUSIONS_KEY,
            json!(["/private/", "^/drafts/", "[invalid"]),
        );
        let stage = Exclusion::new(config);

        let exact = request("https://example.test/private/");
        let pattern = request("https://example.test/drafts/2026/");
        let clean = request("https://example.test/about/");

        assert_eq!(stage.handle(&serve_ctx(&exact)), Verdict::Reject);
        assert_eq!(stage.handle(&serve_ctx(&pattern)), Verdict::Reject);
        // The invalid pattern is skipped, not fatal.
        assert_eq!(stage.handle(&serve_ctx(&clean)), Verdict::Continue);
    }

    #[test]
    fn inactive_integration_is_a_no_op() {
        let cart = request("https://example.test/cart/");

        assert_eq!(
            IntegrationExclusion::storefront(false).handle(&serve_ctx(&cart)),
            Verdict::Continue
        );
        assert_eq!(
            IntegrationExclusion::storefront(true).handle(&serve_ctx(&cart)),
            Verdict::Reject
        );
    }

    #[test]
    fn donations_paths_are_covered() {
        let stage = IntegrationExclusion::donations(true);
        let confirmation = request("https://example.test/donation-confirmation/receipt/");

        assert_eq!(stage.handle(&serve_ctx(&confirmation)), Verdict::Reject);
    }

    #[test]
    fn content_type_requires_html() {
        let request = request("https://example.test/sitemap.xml");
        let mut response = ResponseState::html(200);
        response.content_type = "application/xml; charset=UTF-8".to_string();
        let ctx = PipelineContext {
            request: &request,
            response: Some(&response),
        };

        assert_eq!(ContentType.handle(&ctx), Verdict::Reject);
    }

    #[test]
    fn host_state_password_veto_spares_front_page_and_archives() {
        let request = request("https://example.test/");

        let mut plain = ResponseState::html(200);
        plain.password_protected = true;
        let ctx = PipelineContext {
            request: &request,
            response: Some(&plain),
        };
        assert_eq!(HostState.handle(&ctx), Verdict::Reject);

        let mut front = ResponseState::html(200);
        front.password_protected = true;
        front.is_front_page = true;
        let ctx = PipelineContext {
            request: &request,
            response: Some(&front),
        };
        assert_eq!(HostState.handle(&ctx), Verdict::Continue);
    }

    #[test]
    fn host_state_requires_pretty_permalinks() {
        let request = request("https://example.test/");
        let mut response = ResponseState::html(200);
        response.pretty_permalinks = false;
        let ctx = PipelineContext {
            request: &request,
            response: Some(&response),
        };

        assert_eq!(HostState.handle(&ctx), Verdict::Reject);
    }

    #[test]
    fn object_exclusion_flag_rejects() {
        let request = request("https://example.test/secret-page/");
        let mut response = ResponseState::html(200);
        response.object_excluded = true;
        let ctx = PipelineContext {
            request: &request,
            response: Some(&response),
        };

        assert_eq!(ObjectExcluded.handle(&ctx), Verdict::Reject);
    }
}
