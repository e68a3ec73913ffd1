//! Repository traits for inventory operations.

pub mod objects;
pub mod summaries;
pub mod volumes;

pub use objects::ObjectRepo;
pub use summaries::SummaryRepo;
pub use volumes::VolumeRepo;
