//! Database repositories
//!
//! Repository pattern for database access, separating data access logic
//! from business logic.

pub mod catalog;
pub mod enrichment;
pub mod epg;
pub mod notifications;

// Re-export commonly used items
pub use catalog::{CatalogFilter, ChunkCounts};
