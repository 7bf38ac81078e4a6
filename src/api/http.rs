//! Purpose: Resolve link URLs over HTTP(S) into JSON documents.
//! Exports: `HttpResolver`.
//! Role: Default transport for `ResourceFetch`; blocking ureq calls on tokio's blocking pool.
//! Invariants: 2xx parses the body, 404 is "not found", any other status is a Transport error.
//! Invariants: Relative link URLs are joined onto the configured base URL.
//! Invariants: Timeouts belong to the injected `ureq::Agent`; this module adds none.
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::debug;
use url::Url;

use crate::core::error::{Error, ErrorKind};
use crate::core::resolver::{FetchFuture, Fetched, Resolver};
use crate::json::parse::document_from_str;

#[derive(Clone)]
pub struct HttpResolver {
    inner: Arc<HttpResolverInner>,
}

#[derive(Clone)]
struct HttpResolverInner {
    base_url: Option<Url>,
    token: Option<String>,
    headers: Vec<(String, String)>,
    agent: ureq::Agent,
}

impl HttpResolver {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HttpResolverInner {
                base_url: None,
                token: None,
                headers: Vec::new(),
                agent: ureq::AgentBuilder::new().build(),
            }),
        }
    }

    pub fn with_base_url(self, base_url: impl AsRef<str>) -> Result<Self, Error> {
        let base_url = normalize_base_url(base_url.as_ref())?;
        Ok(self.update(|inner| inner.base_url = Some(base_url)))
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.update(|inner| inner.token = Some(token))
    }

    pub fn with_header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let header = (name.into(), value.into());
        self.update(|inner| inner.headers.push(header))
    }

    pub fn with_agent(self, agent: ureq::Agent) -> Self {
        self.update(|inner| inner.agent = agent)
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.inner.base_url.as_ref()
    }

    /// Absolute URLs pass through; relative ones need a base URL.
    pub fn resolve_url(&self, url: &str) -> Result<Url, Error> {
        match Url::parse(url) {
            Ok(absolute) => ensure_http(absolute),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self.inner.base_url.as_ref().ok_or_else(|| {
                    Error::new(ErrorKind::Transport)
                        .with_message("relative url requires a base url")
                        .with_url(url)
                })?;
                base.join(url).map_err(|err| {
                    Error::new(ErrorKind::Transport)
                        .with_message("invalid link url")
                        .with_url(url)
                        .with_source(err)
                })
            }
            Err(err) => Err(Error::new(ErrorKind::Transport)
                .with_message("invalid link url")
                .with_url(url)
                .with_source(err)),
        }
    }

    fn update(mut self, f: impl FnOnce(&mut HttpResolverInner)) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            f(inner);
        } else {
            let mut inner = HttpResolverInner::clone(&self.inner);
            f(&mut inner);
            self.inner = Arc::new(inner);
        }
        self
    }

    fn get_blocking(&self, url: &Url) -> Result<Fetched, Error> {
        let mut request = self
            .inner
            .agent
            .request("GET", url.as_str())
            .set("Accept", "application/json");
        if let Some(token) = &self.inner.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        for (name, value) in &self.inner.headers {
            request = request.set(name, value);
        }

        match request.call() {
            Ok(response) => read_document(url, response),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(ureq::Error::Status(code, _)) => Err(status_error(url, code)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Transport)
                .with_message(format!("GET {url} request failed"))
                .with_url(url.as_str())
                .with_source(err)),
        }
    }
}

impl Default for HttpResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for HttpResolver {
    fn fetch(&self, url: &str) -> FetchFuture {
        let resolver = self.clone();
        let raw = url.to_string();
        async move {
            let url = resolver.resolve_url(&raw)?;
            tokio::task::spawn_blocking(move || {
                let fetched = resolver.get_blocking(&url);
                debug!(url = %url, found = ?fetched.as_ref().map(Option::is_some), "http fetch");
                fetched
            })
            .await
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("http fetch task failed")
                    .with_url(raw.as_str())
                    .with_source(err)
            })?
        }
        .boxed()
    }
}

fn read_document(url: &Url, response: ureq::Response) -> Result<Fetched, Error> {
    let status = response.status();
    if !(200..300).contains(&status) {
        return Err(status_error(url, status));
    }
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Transport)
            .with_message("failed to read response body")
            .with_url(url.as_str())
            .with_source(err)
    })?;
    let document = document_from_str(&body).map_err(|err| err.with_url(url.as_str()))?;
    Ok(Some(Arc::new(document)))
}

fn status_error(url: &Url, status: u16) -> Error {
    Error::new(ErrorKind::Transport)
        .with_message(format!("GET {url} return status : {status}"))
        .with_url(url.as_str())
}

fn normalize_base_url(raw: &str) -> Result<Url, Error> {
    let url = Url::parse(raw).map_err(|err| {
        Error::new(ErrorKind::Construction)
            .with_message("invalid base url")
            .with_source(err)
    })?;
    let mut url = ensure_http(url).map_err(|_| {
        Error::new(ErrorKind::Construction).with_message("base url must use http or https scheme")
    })?;
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn ensure_http(url: Url) -> Result<Url, Error> {
    if matches!(url.scheme(), "http" | "https") {
        return Ok(url);
    }
    Err(Error::new(ErrorKind::Transport)
        .with_message(format!("unsupported url scheme {}", url.scheme()))
        .with_url(url.as_str()))
}
