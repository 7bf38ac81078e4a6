//! Purpose: Declarative JSON-to-object mapping that follows links between resources.
//! Exports: `api` (public surface), `core` (mapping model, identity cache, interpreter).
//! Role: Library crate; callers describe shapes once and fetch typed object graphs per run.
//! Invariants: One top-level fetch owns one identity cache; nothing is shared across runs.
//! Invariants: Cyclic resources come back as shared instances, never as copies.
pub mod api;
pub mod core;
mod json;
