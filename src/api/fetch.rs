//! Purpose: Root entry points that turn a mapping plus a URL (or JSON) into a mapped value.
//! Exports: `ResourceFetch`, `ResourceRetriever`, `FetchConfig`, `ResolverFactory`.
//! Role: Creates the per-run state (resolver, identity cache) and drives the interpreter.
//! Invariants: Every call gets a fresh resolver from the factory and a fresh identity cache.
//! Invariants: With `validate_mappings`, construction errors surface before any fetch.
//! Invariants: A call resolves only after every cross-linked object has settled.
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::ApiResult;
use super::http::HttpResolver;
use super::resolve::CachedResolver;
use crate::core::error::{Error, ErrorKind};
use crate::core::interpret::{Context, interpret_root};
use crate::core::mapped::Mapped;
use crate::core::mapping::{ExtraProperties, Mapping, MappingRef};
use crate::core::resolver::Resolver;

/// Produces the resolver for one top-level run.
pub type ResolverFactory = Arc<dyn Fn() -> Arc<dyn Resolver> + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Strategy for objects whose mapping does not choose one.
    pub extra_properties: ExtraProperties,
    pub validate_mappings: bool,
}

impl FetchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extra_properties(mut self, strategy: ExtraProperties) -> Self {
        self.extra_properties = strategy;
        self
    }

    pub fn with_validate_mappings(mut self, validate: bool) -> Self {
        self.validate_mappings = validate;
        self
    }

    pub fn from_json_str(text: &str) -> ApiResult<Self> {
        serde_json::from_str(text).map_err(|err| {
            Error::new(ErrorKind::Construction)
                .with_message("invalid fetch config")
                .with_source(err)
        })
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            extra_properties: ExtraProperties::Copy,
            validate_mappings: true,
        }
    }
}

#[derive(Clone)]
pub struct ResourceFetch {
    resolvers: ResolverFactory,
    config: FetchConfig,
}

impl ResourceFetch {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Resolver> + Send + Sync + 'static,
    {
        Self {
            resolvers: Arc::new(factory),
            config: FetchConfig::default(),
        }
    }

    /// Wraps `resolver` in a fresh per-run raw JSON cache for every call.
    pub fn cached(resolver: Arc<dyn Resolver>) -> Self {
        Self::new(move || -> Arc<dyn Resolver> {
            Arc::new(CachedResolver::new(Arc::clone(&resolver)))
        })
    }

    pub fn http(resolver: HttpResolver) -> Self {
        Self::cached(Arc::new(resolver))
    }

    pub fn with_config(mut self, config: FetchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Binds a root mapping; the returned retriever starts runs from URLs or JSON.
    pub fn fetch_resource(&self, mapping: impl Into<MappingRef>) -> ResourceRetriever {
        ResourceRetriever {
            fetch: self.clone(),
            mapping: mapping.into(),
        }
    }

    /// Interprets an already-fetched document without an initial URL fetch.
    pub async fn fetch_object(
        &self,
        json: Value,
        mapping: impl Into<MappingRef>,
    ) -> ApiResult<Mapped> {
        self.fetch_resource(mapping).from_object(json).await
    }

    async fn run(&self, mapping: Mapping, json: Value) -> ApiResult<Mapped> {
        if self.config.validate_mappings {
            mapping.validate()?;
        }
        let context = Context::new(self.config.extra_properties, (self.resolvers)());
        let root = mapping.describe();
        debug!(root = %root, "fetch run started");
        let result = interpret_root(context, mapping, json).await;
        match &result {
            Ok(_) => debug!(root = %root, "fetch run finished"),
            Err(err) => debug!(root = %root, error = %err, "fetch run failed"),
        }
        result
    }
}

impl Default for ResourceFetch {
    fn default() -> Self {
        Self::http(HttpResolver::new())
    }
}

impl fmt::Debug for ResourceFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceFetch")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A root mapping bound to a `ResourceFetch`.
#[derive(Clone, Debug)]
pub struct ResourceRetriever {
    fetch: ResourceFetch,
    mapping: MappingRef,
}

impl ResourceRetriever {
    /// Fetches `url` and interprets the document with the root mapping.
    pub async fn from(&self, url: &str) -> ApiResult<Mapped> {
        let root = Mapping::link(self.mapping.clone());
        self.fetch.run(root, Value::String(url.to_string())).await
    }

    /// Fetches every URL within one run; results follow the input order.
    pub async fn from_urls<I, S>(&self, urls: I) -> ApiResult<Vec<Mapped>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls = urls
            .into_iter()
            .map(|url| Value::String(url.into()))
            .collect();
        let root = Mapping::array(Mapping::link(self.mapping.clone()));
        into_elements(self.fetch.run(root, Value::Array(urls)).await?)
    }

    pub async fn from_object(&self, json: Value) -> ApiResult<Mapped> {
        let root = self.mapping.resolve()?.clone();
        self.fetch.run(root, json).await
    }

    /// Interprets several documents within one run, sharing its identity cache.
    pub async fn from_objects(&self, documents: Vec<Value>) -> ApiResult<Vec<Mapped>> {
        let root = Mapping::array(self.mapping.clone());
        into_elements(self.fetch.run(root, Value::Array(documents)).await?)
    }
}

fn into_elements(value: Mapped) -> ApiResult<Vec<Mapped>> {
    match value {
        Mapped::Array(values) => Ok(values),
        other => Err(Error::new(ErrorKind::Internal)
            .with_message(format!("array root produced {other:?}"))),
    }
}
