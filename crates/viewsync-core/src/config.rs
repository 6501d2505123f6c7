//! 視圖與快取配置模型

use serde::{Deserialize, Serialize};

/// 預設快取上限（KB），即 100 MB
pub const DEFAULT_CACHE_LIMIT_KB: u64 = 100 * 1024;

/// 視圖配置
///
/// 由代理層廣播到每個進程，因此所有進程上的值必須一致。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// 是否啟用快取（例如動畫播放時重用各時間步的結果）
    pub use_cache: bool,

    /// 視圖層級的快取鍵
    pub cache_key: f64,

    /// 可分配給表示物件的最大識別碼
    pub max_representation_id: u32,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            use_cache: false,
            cache_key: 0.0,
            max_representation_id: u32::MAX,
        }
    }
}

impl ViewConfig {
    /// 創建預設配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 建構器模式：設置是否啟用快取
    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// 建構器模式：設置快取鍵
    pub fn with_cache_key(mut self, cache_key: f64) -> Self {
        self.cache_key = cache_key;
        self
    }

    /// 建構器模式：設置識別碼上限
    pub fn with_max_representation_id(mut self, max_id: u32) -> Self {
        self.max_representation_id = max_id;
        self
    }

    /// 從 JSON 載入配置，缺少的欄位使用預設值
    ///
    /// # 範例
    /// ```
    /// # use viewsync_core::ViewConfig;
    /// let config = ViewConfig::from_json(r#"{ "use_cache": true, "cache_key": 2.5 }"#).unwrap();
    /// assert!(config.use_cache);
    /// assert_eq!(config.max_representation_id, u32::MAX);
    /// ```
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// 快取記帳配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 整個進程的快取上限（KB）
    pub cache_limit_kb: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_limit_kb: DEFAULT_CACHE_LIMIT_KB,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 建構器模式：設置快取上限
    pub fn with_cache_limit_kb(mut self, limit_kb: u64) -> Self {
        self.cache_limit_kb = limit_kb;
        self
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
