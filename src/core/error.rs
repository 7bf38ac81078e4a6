//! Purpose: Define the error model shared by mapping construction, resolvers, and interpretation.
//! Exports: `Error`, `ErrorKind`.
//! Role: Single error type carried through every `Result` in the crate.
//! Invariants: `ErrorKind` is a closed taxonomy; callers match on kinds, not message text.
//! Invariants: Context entries are stored outermost first so `Display` reads top-down.
//! Invariants: Errors are `Clone` because one failed object is reported to every awaiter.
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// JSON runtime type differs from what the mapping expects.
    ShapeMismatch,
    /// A non-optional link or object property is absent from the source JSON.
    MissingRequiredLink,
    /// The resolver reported "not found" for a link that has no recovery policy.
    NotFound,
    /// Undeclared JSON keys under the `fail` strategy.
    ExtraProperties,
    /// No choice predicate accepted the JSON value.
    NoChoiceMatched,
    /// Non-2xx/non-404 status, I/O failure, or malformed body.
    Transport,
    /// Mapping description is inconsistent; raised before any fetch.
    Construction,
    Internal,
}

#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    url: Option<String>,
    context: Vec<String>,
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            url: None,
            context: Vec::new(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn context(&self) -> &[String] {
        &self.context
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Records the URL being resolved; the innermost URL wins.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        if self.url.is_none() {
            self.url = Some(url.into());
        }
        self
    }

    /// Prefixes one level of context (property, index, choice) to the chain.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.insert(0, context.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        for context in &self.context {
            write!(f, ": {context}")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(url) = &self.url {
            write!(f, " (url: {url})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}
