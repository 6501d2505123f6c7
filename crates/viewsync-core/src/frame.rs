//! 每幀渲染通道與視圖上下文

use serde::{Deserialize, Serialize};

/// 渲染通道類型
///
/// 每幀嚴格依 `Update → UpdateLod → Render` 順序執行。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PassType {
    /// 資料更新（決定是否真正重新執行管線）
    Update,
    /// 低解析度（LOD）資料更新
    UpdateLod,
    /// 渲染
    Render,
}

impl PassType {
    /// 一幀內的通道順序
    pub const ORDERED: [PassType; 3] = [PassType::Update, PassType::UpdateLod, PassType::Render];
}

/// 視圖上下文
///
/// 視圖在每次呼叫時以參照傳入，表示物件不保存指向視圖的反向參照。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewContext {
    /// 視圖識別碼
    pub view_id: u32,
    /// 視圖時間（None 表示無效）
    pub view_time: Option<f64>,
    /// 視圖層級是否啟用快取
    pub use_cache: bool,
    /// 視圖層級快取鍵
    pub cache_key: f64,
}

/// 有效快取策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachePolicy {
    pub use_cache: bool,
    pub cache_key: f64,
}

impl CachePolicy {
    /// 不使用快取
    pub const DISABLED: CachePolicy = CachePolicy {
        use_cache: false,
        cache_key: 0.0,
    };

    /// 解析有效快取策略：強制快取優先，否則跟隨視圖
    pub fn resolve(force_use_cache: bool, forced_cache_key: f64, view: Option<&ViewContext>) -> Self {
        if force_use_cache {
            return Self {
                use_cache: true,
                cache_key: forced_cache_key,
            };
        }

        match view {
            Some(view) => Self {
                use_cache: view.use_cache,
                cache_key: view.cache_key,
            },
            None => Self::DISABLED,
        }
    }
}

/// 空間邊界盒
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Bounds {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// 由點集計算邊界盒，空點集回傳 None
    pub fn from_points(points: &[[f64; 3]]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut bounds = Self::new(*first, *first);
        for point in rest {
            for axis in 0..3 {
                bounds.min[axis] = bounds.min[axis].min(point[axis]);
                bounds.max[axis] = bounds.max[axis].max(point[axis]);
            }
        }
        Some(bounds)
    }

    /// 合併兩個邊界盒
    pub fn union(&self, other: &Bounds) -> Bounds {
        let mut merged = *self;
        for axis in 0..3 {
            merged.min[axis] = merged.min[axis].min(other.min[axis]);
            merged.max[axis] = merged.max[axis].max(other.max[axis]);
        }
        merged
    }

    /// 合併可選邊界盒
    pub fn merge(lhs: Option<Bounds>, rhs: Option<Bounds>) -> Option<Bounds> {
        match (lhs, rhs) {
            (Some(a), Some(b)) => Some(a.union(&b)),
            (a, None) => a,
            (None, b) => b,
        }
    }
}

/// 單一表示物件對某個通道的回覆
///
/// 視圖在各幀間重用這些物件。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyInfo {
    /// 表示物件是否處理了此通道（不可見時為 false）
    pub handled: bool,
    /// 本幀是否真正執行了管線
    pub executed: bool,
    /// 本幀是否改用快取結果
    pub used_cache: bool,
    /// 可見資料的邊界盒
    pub bounds: Option<Bounds>,
    /// 交付的資料大小（KB）
    pub data_size_kb: u64,
}

impl ReplyInfo {
    /// 重置為空回覆
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 一次 `Update` 之後各進程一致的結果
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSummary {
    /// 跨進程同步後的快取已滿旗標
    pub cache_full: bool,
    /// 全域可見資料邊界盒
    pub bounds: Option<Bounds>,
    /// 全域交付資料大小（KB）
    pub total_data_size_kb: u64,
    /// 本進程真正執行的表示物件數量
    pub executed_locally: usize,
}
