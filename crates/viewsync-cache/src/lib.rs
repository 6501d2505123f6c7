//! # ViewSync Cache
//!
//! 快取記帳、髒標記與表示物件的幾何快取

pub mod cache_keeper;
pub mod dirty_tracking;
pub mod geometry_cache;

// Re-export 主要類型
pub use cache_keeper::{CacheKeeper, CacheKeeperHandle};
pub use dirty_tracking::{DirtyFlag, UpdateState};
pub use geometry_cache::{CacheKey, GeometryCache};
