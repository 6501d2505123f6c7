//! 資料物件模型

use std::sync::Arc;

use crate::frame::Bounds;

/// 管線輸出的資料物件
///
/// 點資料以 `Arc` 共享，複製資料物件（例如存入快取）不會複製底層陣列。
#[derive(Debug, Clone, PartialEq)]
pub struct DataObject {
    /// 點座標
    pub points: Arc<Vec<[f64; 3]>>,

    /// 邊界盒
    pub bounds: Option<Bounds>,

    /// 記憶體用量（KB，向上取整）
    pub memory_kb: u64,

    /// 產生此資料時的請求時間
    pub time: Option<f64>,
}

impl DataObject {
    /// 由點集創建資料物件
    pub fn from_points(points: Vec<[f64; 3]>, time: Option<f64>) -> Self {
        let bounds = Bounds::from_points(&points);
        let bytes = (points.len() * std::mem::size_of::<[f64; 3]>()) as u64;
        Self {
            points: Arc::new(points),
            bounds,
            memory_kb: bytes.div_ceil(1024),
            time,
        }
    }

    /// 空資料物件
    pub fn empty() -> Self {
        Self::from_points(Vec::new(), None)
    }

    /// 建構器模式：覆寫記憶體用量
    pub fn with_memory_kb(mut self, memory_kb: u64) -> Self {
        self.memory_kb = memory_kb;
        self
    }

    pub fn number_of_points(&self) -> usize {
        self.points.len()
    }
}
