//! Error types for the core domain.

use thiserror::Error;

/// Most entries shown when a list of identifiers is rendered into a message.
pub const MAX_DISPLAYED: usize = 5;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("not a legal bag name: {0}")]
    InvalidBagName(String),

    #[error("invalid caching options: {0}")]
    InvalidOptions(String),

    #[error("invalid cache role: {0}")]
    InvalidRole(String),

    #[error("invalid volume status: {0}")]
    InvalidStatus(i64),

    #[error("error parsing file lookup: {0}")]
    FileLookup(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Render a list of names, showing at most [`MAX_DISPLAYED`] of them.
pub fn format_capped<S: AsRef<str>>(items: &[S]) -> String {
    let shown: Vec<&str> = items
        .iter()
        .take(MAX_DISPLAYED)
        .map(|s| s.as_ref())
        .collect();
    if items.len() <= MAX_DISPLAYED {
        format!("{:?}", shown)
    } else {
        format!("{:?} (and {} more)", shown, items.len() - MAX_DISPLAYED)
    }
}
