//! Purpose: Define the stable public Rust API boundary for linkmap.
//! Exports: Mapping construction, the registry, resolvers, and root fetch entry points.
//! Role: Public, additive-only surface; hides the interpreter's internals.
//! Invariants: Everything a caller needs to describe, fetch, and inspect values is here.
//! Invariants: Transport details stay behind the `Resolver` trait.

mod fetch;
mod http;
mod registry;
mod resolve;

pub use crate::core::class::{Class, Instance, ObjectRef};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::mapped::Mapped;
pub use crate::core::mapping::{
    Alternative, ChoiceMapping, ExtraProperties, LinkMapping, LinkTarget, Mapping, MappingRef,
    NotFoundPolicy, ObjectMapping, ObjectMappingBuilder, Predicate, Primitive, PropertyMapping,
    RawKind, RawValue,
};
pub use crate::core::resolver::{FetchFuture, Fetched, Resolver};
pub use fetch::{FetchConfig, ResolverFactory, ResourceFetch, ResourceRetriever};
pub use http::HttpResolver;
pub use registry::{FieldShape, Registry};
pub use resolve::{CachedResolver, MapResolver};

pub type ApiResult<T> = Result<T, Error>;
