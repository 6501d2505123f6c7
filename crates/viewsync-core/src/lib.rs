//! # ViewSync Core
//!
//! 核心類型定義：錯誤、配置、渲染通道、資料物件與跨進程集體通訊

pub mod collective;
pub mod config;
pub mod data;
pub mod frame;

// Re-export 主要類型
pub use collective::{Communicator, ReduceOp, SerialCommunicator, ThreadCommunicator};
pub use config::{CacheConfig, ViewConfig, DEFAULT_CACHE_LIMIT_KB};
pub use data::DataObject;
pub use frame::{Bounds, CachePolicy, FrameSummary, PassType, ReplyInfo, ViewContext};

/// ViewSync 錯誤類型
#[derive(Debug, thiserror::Error)]
pub enum ViewSyncError {
    #[error("快取已滿，拒絕加入 {requested_kb} KB（目前 {cache_size_kb} KB）")]
    CacheFull { requested_kb: u64, cache_size_kb: u64 },

    #[error("集體通訊失敗: {0}")]
    Collective(String),

    #[error("識別碼協商不一致: {0}")]
    IdentifierHandshake(String),

    #[error("管線執行錯誤: {0}")]
    Pipeline(String),

    #[error("其他進程的{0}通道失敗")]
    PeerFailure(String),

    #[error("配置解析錯誤: {0}")]
    Config(#[from] serde_json::Error),

    #[error("其他錯誤: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ViewSyncError>;
