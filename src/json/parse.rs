//! Purpose: Decode fetched response bodies into JSON documents.
//! Exports: `document_from_str`, `ParseFailureCategory`, `categorize_error`.
//! Role: Parser boundary that maps serde_json failures into the crate error model.
//! Invariants: Messages start with "Error parsing json" so callers can recognise them.
//! Notes: Body text is never echoed into the error; only the parser's own position info.

use serde_json::Value;
use serde_json::error::Category;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ParseFailureCategory {
    Syntax,
    Truncated,
    Data,
    Io,
}

impl ParseFailureCategory {
    fn label(self) -> &'static str {
        match self {
            ParseFailureCategory::Syntax => "syntax",
            ParseFailureCategory::Truncated => "truncated",
            ParseFailureCategory::Data => "data",
            ParseFailureCategory::Io => "io",
        }
    }
}

pub(crate) fn categorize_error(err: &serde_json::Error) -> ParseFailureCategory {
    match err.classify() {
        Category::Syntax => ParseFailureCategory::Syntax,
        Category::Eof => ParseFailureCategory::Truncated,
        Category::Data => ParseFailureCategory::Data,
        Category::Io => ParseFailureCategory::Io,
    }
}

pub(crate) fn document_from_str(body: &str) -> Result<Value, Error> {
    serde_json::from_str(body).map_err(|err| {
        let category = categorize_error(&err);
        Error::new(ErrorKind::Transport)
            .with_message(format!(
                "Error parsing json ({}) at line {} column {}",
                category.label(),
                err.line(),
                err.column()
            ))
            .with_source(err)
    })
}
