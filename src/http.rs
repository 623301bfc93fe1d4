//! Immutable request and response snapshots.
//!
//! A [`RequestContext`] is built once per request, before the host application
//! has bootstrapped, and is consumed read-only by both classification
//! pipelines. A [`ResponseState`] captures what is only knowable after the
//! page has been rendered and is attached on the write path alone.

use std::collections::BTreeMap;

use thiserror::Error;
use time::OffsetDateTime;
use url::Url;

/// HTTP request method, folded down to what the cache cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Other(String),
}

impl Method {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            "OPTIONS" => Self::Options,
            other => Self::Other(other.to_string()),
        }
    }

    /// GET and HEAD are the only methods a cached page may answer.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }
}

/// Execution-context signals that force a cache bypass.
///
/// These model the host's "do not cache" markers: an explicit per-page
/// opt-out, background/cron work, async (XHR-style) endpoints, and
/// machine-to-machine API or syndication requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionFlags {
    pub do_not_cache: bool,
    pub background_job: bool,
    pub async_task: bool,
    pub api_request: bool,
}

impl ExecutionFlags {
    pub fn any(&self) -> bool {
        self.do_not_cache || self.background_job || self.async_task || self.api_request
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request URL could not be parsed: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Read-only snapshot of one inbound request.
///
/// Constructed once, immutable afterwards. Header names and cookie names are
/// stored lower-cased so lookups are case-insensitive.
#[derive(Debug, Clone)]
pub struct RequestContext {
    uri: Url,
    path: String,
    query: String,
    method: Method,
    headers: BTreeMap<String, String>,
    cookies: BTreeMap<String, String>,
    started_at: OffsetDateTime,
    object_id: Option<u64>,
    flags: ExecutionFlags,
}

impl RequestContext {
    pub fn builder(url: &str) -> Result<RequestContextBuilder, RequestError> {
        let uri = Url::parse(url)?;
        Ok(RequestContextBuilder {
            uri,
            method: Method::Get,
            headers: BTreeMap::new(),
            cookies: BTreeMap::new(),
            started_at: None,
            object_id: None,
            flags: ExecutionFlags::default(),
        })
    }

    /// The full request URL.
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn url_str(&self) -> &str {
        self.uri.as_str()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    /// The resolved content object id, once the host can provide one.
    pub fn object_id(&self) -> Option<u64> {
        self.object_id
    }

    pub fn flags(&self) -> &ExecutionFlags {
        &self.flags
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn cookie_names(&self) -> impl Iterator<Item = &str> {
        self.cookies.keys().map(String::as_str)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Builder for [`RequestContext`]; consumed by `build`.
#[derive(Debug)]
pub struct RequestContextBuilder {
    uri: Url,
    method: Method,
    headers: BTreeMap<String, String>,
    cookies: BTreeMap<String, String>,
    started_at: Option<OffsetDateTime>,
    object_id: Option<u64>,
    flags: ExecutionFlags,
}

impl RequestContextBuilder {
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn started_at(mut self, at: OffsetDateTime) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn object_id(mut self, id: u64) -> Self {
        self.object_id = Some(id);
        self
    }

    pub fn flags(mut self, flags: ExecutionFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn build(self) -> RequestContext {
        let path = self.uri.path().to_string();
        let query = self.uri.query().unwrap_or("").to_string();

        RequestContext {
            uri: self.uri,
            path,
            query,
            method: self.method,
            headers: self.headers,
            cookies: self.cookies,
            started_at: self.started_at.unwrap_or_else(OffsetDateTime::now_utc),
            object_id: self.object_id,
            flags: self.flags,
        }
    }
}

/// What is known about the rendered response, write path only.
///
/// The host-state fields describe the page the host just rendered:
/// machine-facing handlers (robots, feeds), password protection and the
/// surrounding context, and whether human-readable permalinks are configured
/// at all. Without pretty permalinks the URL-keyed artifact layout is
/// meaningless, so caching is off entirely.
#[derive(Debug, Clone)]
pub struct ResponseState {
    pub status: u16,
    pub content_type: String,
    /// The rendered content object carries a per-object "exclude from cache" flag.
    pub object_excluded: bool,
    pub is_robots: bool,
    pub is_feed: bool,
    pub password_protected: bool,
    pub is_front_page: bool,
    pub is_archive: bool,
    pub pretty_permalinks: bool,
}

impl ResponseState {
    /// A plain successful HTML page with no host-state complications.
    pub fn html(status: u16) -> Self {
        Self {
            status,
            content_type: "text/html; charset=UTF-8".to_string(),
            object_excluded: false,
            is_robots: false,
            is_feed: false,
            password_protected: false,
            is_front_page: false,
            is_archive: false,
            pretty_permalinks: true,
        }
    }
}
