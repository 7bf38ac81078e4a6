//! Purpose: Provide resolver implementations that do not touch the network.
//! Exports: `MapResolver`, `CachedResolver`.
//! Role: In-memory fixtures for tests/embedding, and the per-run raw JSON cache.
//! Invariants: `CachedResolver` issues at most one inner fetch per URL for its lifetime.
//! Invariants: The raw JSON cache is keyed by URL only, independent of the typed identity cache.
//! Invariants: `MapResolver` reports unknown URLs as "not found", not as errors.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::Shared;
use serde_json::Value;
use tracing::debug;

use crate::core::error::Error;
use crate::core::resolver::{FetchFuture, Fetched, Resolver};

#[derive(Clone)]
enum Canned {
    Document(Arc<Value>),
    Failure(Error),
}

/// Serves JSON documents from memory and counts how often each URL was requested.
#[derive(Clone, Default)]
pub struct MapResolver {
    documents: HashMap<String, Canned>,
    delays: HashMap<String, Duration>,
    requests: Arc<Mutex<HashMap<String, usize>>>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, url: impl Into<String>, document: Value) -> Self {
        self.documents
            .insert(url.into(), Canned::Document(Arc::new(document)));
        self
    }

    pub fn with_documents<I, K>(mut self, documents: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (url, document) in documents {
            self = self.with_document(url, document);
        }
        self
    }

    /// Makes every request for `url` fail with `err`.
    pub fn with_failure(mut self, url: impl Into<String>, err: Error) -> Self {
        self.documents.insert(url.into(), Canned::Failure(err));
        self
    }

    /// Delays the answer for `url`; lets tests control completion order.
    pub fn with_delay(mut self, url: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(url.into(), delay);
        self
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .values()
            .sum()
    }
}

impl Resolver for MapResolver {
    fn fetch(&self, url: &str) -> FetchFuture {
        *self
            .requests
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .entry(url.to_string())
            .or_insert(0) += 1;

        let answer: Result<Fetched, Error> = match self.documents.get(url) {
            Some(Canned::Document(document)) => Ok(Some(Arc::clone(document))),
            Some(Canned::Failure(err)) => Err(err.clone()),
            None => Ok(None),
        };
        let delay = self.delays.get(url).copied();
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            answer
        }
        .boxed()
    }
}

/// Shares one inner fetch per URL between every caller of this resolver.
pub struct CachedResolver {
    inner: Arc<dyn Resolver>,
    responses: Mutex<HashMap<String, Shared<FetchFuture>>>,
}

impl CachedResolver {
    pub fn new(inner: Arc<dyn Resolver>) -> Self {
        Self {
            inner,
            responses: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_urls(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .len()
    }
}

impl Resolver for CachedResolver {
    fn fetch(&self, url: &str) -> FetchFuture {
        let mut responses = self
            .responses
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if let Some(pending) = responses.get(url) {
            return pending.clone().boxed();
        }
        debug!(url = %url, "fetching document");
        let pending = self.inner.fetch(url).shared();
        responses.insert(url.to_string(), pending.clone());
        pending.boxed()
    }
}
