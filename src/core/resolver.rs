//! Purpose: Define the contract the interpreter uses to turn a URL into a JSON document.
//! Exports: `Resolver`, `Fetched`, `FetchFuture`.
//! Role: Seam between the interpreter and transports (HTTP, in-memory fixtures, caches).
//! Invariants: `Ok(None)` means "not found" and is never an error by itself.
//! Invariants: Returned futures are `'static`; implementations clone what they need.
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use super::error::Error;

/// A fetched document; `None` signals "not found".
pub type Fetched = Option<Arc<Value>>;

pub type FetchFuture = BoxFuture<'static, Result<Fetched, Error>>;

pub trait Resolver: Send + Sync {
    fn fetch(&self, url: &str) -> FetchFuture;
}

impl<F> Resolver for F
where
    F: Fn(&str) -> FetchFuture + Send + Sync,
{
    fn fetch(&self, url: &str) -> FetchFuture {
        self(url)
    }
}
