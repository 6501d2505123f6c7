//! # ViewSync View
//!
//! 視圖協調器、多進程會話與組合表示物件

pub mod composite;
pub mod session;
pub mod view;

// Re-export 主要類型
pub use composite::CompositeRepresentation;
pub use session::Session;
pub use view::{DenyCaching, RepresentationCache, View, ViewCachePolicy};
