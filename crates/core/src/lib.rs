//! Core domain types and shared logic for the bag cache manager.
//!
//! This crate defines the data model used across all other crates:
//! - Object identifiers and caching options
//! - Volume roles and status
//! - Preservation bag naming and version ordering
//! - Multibag file-lookup parsing
//! - Checksums and timestamps
//! - Configuration

pub mod bag_name;
pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod multibag;
pub mod opts;
pub mod roles;
pub mod timestamp;

pub use bag_name::{BagName, find_latest_head_bag, parse_bag_name, select_version};
pub use error::{Error, MAX_DISPLAYED, Result, format_capped};
pub use hash::{Checksum, ChecksumHasher, SHA256};
pub use id::ObjectId;
pub use opts::CacheOpts;
pub use roles::{CacheRoles, VolumeStatus};
pub use timestamp::{format_millis, now_millis};
