//! # ViewSync
//!
//! 多進程渲染系統中的視圖/表示物件更新抑制與分散式快取協調層。
//!
//! 每幀在所有協作進程上以相同方式決定：
//! - 每個表示物件是否必須重新執行資料管線
//! - 是否可以改用先前快取的結果
//! - 本進程累計使用了多少快取記憶體
//!
//! ## 使用範例
//!
//! ```ignore
//! use viewsync::*;
//!
//! let session = Session::serial(&CacheConfig::default())?;
//! let mut view = View::new(&session, ViewConfig::new());
//! view.add_representation(DataRepresentation::shared(my_algorithm, session.cache_keeper()));
//! let summary = view.still_render()?;
//! ```

// Re-export 主要類型
pub use viewsync_cache::{CacheKeeper, CacheKeeperHandle, DirtyFlag, GeometryCache, UpdateState};
pub use viewsync_core::{
    Bounds, CacheConfig, CachePolicy, Communicator, DataObject, FrameSummary, PassType, ReduceOp,
    ReplyInfo, Result, SerialCommunicator, ThreadCommunicator, ViewConfig, ViewContext,
    ViewSyncError,
};
pub use viewsync_repr::{
    Algorithm, AlwaysExecute, DataRepresentation, DataUpdated, DataUpdatedObserver,
    ExecutionOutcome, ExecutionRequest, PipelineStage, Representation, RepresentationAlgorithm,
    RepresentationState, SharedRepresentation, SharedStage, SuppressingExecutive, Suppressible,
    SuppressionGate,
};
pub use viewsync_view::{
    CompositeRepresentation, DenyCaching, RepresentationCache, Session, View, ViewCachePolicy,
};
