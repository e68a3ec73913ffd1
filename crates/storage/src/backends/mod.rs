//! Storage backends.

pub mod bagstore;
pub mod fallback;
pub mod filesystem;
