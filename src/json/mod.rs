//! Purpose: Internal JSON decoding boundary shared by resolvers.
//! Exports: `parse` module with document decode helpers.
//! Role: Single seam so resolvers report malformed bodies the same way.
//! Invariants: Decode failures surface as `Transport` errors, never panics.

pub(crate) mod parse;
