//! 表示物件的幾何快取
//!
//! 以快取鍵（通常是時間步）保存管線結果，所有存入與釋放都向進程的
//! [`CacheKeeperHandle`] 回報。

use std::collections::BTreeMap;

use viewsync_core::{DataObject, Result};

use crate::cache_keeper::CacheKeeperHandle;

/// 快取鍵
///
/// 以 `f64` 的位元表示排序；`-0.0` 正規化為 `0.0`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(u64);

impl CacheKey {
    pub fn new(key: f64) -> Self {
        let normalized = if key == 0.0 { 0.0 } else { key };
        Self(normalized.to_bits())
    }

    pub fn value(&self) -> f64 {
        f64::from_bits(self.0)
    }
}

impl From<f64> for CacheKey {
    fn from(key: f64) -> Self {
        Self::new(key)
    }
}

/// 幾何快取
#[derive(Debug)]
pub struct GeometryCache {
    keeper: CacheKeeperHandle,
    entries: BTreeMap<CacheKey, DataObject>,
}

impl GeometryCache {
    /// 創建新的快取，用量回報到 `keeper`
    pub fn new(keeper: CacheKeeperHandle) -> Self {
        Self {
            keeper,
            entries: BTreeMap::new(),
        }
    }

    pub fn is_cached(&self, key: f64) -> bool {
        self.entries.contains_key(&CacheKey::new(key))
    }

    pub fn get(&self, key: f64) -> Option<&DataObject> {
        self.entries.get(&CacheKey::new(key))
    }

    /// 存入結果
    ///
    /// 記帳器已滿時不存入並回傳 `Ok(false)`。
    pub fn store(&mut self, key: f64, data: DataObject) -> Result<bool> {
        if self.keeper.is_full() {
            tracing::debug!("快取已滿，鍵 {} 的結果不存入", key);
            return Ok(false);
        }

        let cache_key = CacheKey::new(key);
        if let Some(previous) = self.entries.remove(&cache_key) {
            self.keeper.free_size(previous.memory_kb);
        }

        self.keeper.add_size(data.memory_kb)?;
        tracing::trace!("快取鍵 {} 存入 {} KB", key, data.memory_kb);
        self.entries.insert(cache_key, data);
        Ok(true)
    }

    /// 移除單一鍵
    pub fn remove(&mut self, key: f64) -> Option<DataObject> {
        let removed = self.entries.remove(&CacheKey::new(key))?;
        self.keeper.free_size(removed.memory_kb);
        Some(removed)
    }

    /// 清除所有快取並歸還用量
    pub fn clear(&mut self) {
        let freed: u64 = self.entries.values().map(|d| d.memory_kb).sum();
        self.entries.clear();
        if freed > 0 {
            self.keeper.free_size(freed);
            tracing::debug!("清除幾何快取，釋放 {} KB", freed);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 本快取佔用的總量（KB）
    pub fn size_kb(&self) -> u64 {
        self.entries.values().map(|d| d.memory_kb).sum()
    }

    /// 已快取的鍵（遞增排序）
    pub fn keys(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.keys().map(CacheKey::value)
    }
}

impl Drop for GeometryCache {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viewsync_core::CacheConfig;

    fn data(kb: u64) -> DataObject {
        DataObject::empty().with_memory_kb(kb)
    }

    #[test]
    fn test_store_reports_to_keeper() {
        let keeper = CacheKeeperHandle::new(&CacheConfig::default());
        let mut cache = GeometryCache::new(keeper.clone());

        assert!(cache.store(1.0, data(10)).unwrap());
        assert!(cache.store(2.0, data(5)).unwrap());

        assert!(cache.is_cached(1.0));
        assert!(!cache.is_cached(3.0));
        assert_eq!(keeper.cache_size_kb(), 15);
        assert_eq!(cache.keys().collect::<Vec<_>>(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_replace_frees_previous_entry() {
        let keeper = CacheKeeperHandle::new(&CacheConfig::default());
        let mut cache = GeometryCache::new(keeper.clone());

        cache.store(1.0, data(10)).unwrap();
        cache.store(1.0, data(4)).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(keeper.cache_size_kb(), 4);
    }

    #[test]
    fn test_full_keeper_skips_store() {
        let keeper = CacheKeeperHandle::new(&CacheConfig::default());
        keeper.set_cache_full(true);
        let mut cache = GeometryCache::new(keeper.clone());

        assert!(!cache.store(1.0, data(10)).unwrap());
        assert!(cache.is_empty());
        assert_eq!(keeper.cache_size_kb(), 0);
    }

    #[test]
    fn test_drop_releases_usage() {
        let keeper = CacheKeeperHandle::new(&CacheConfig::default());
        {
            let mut cache = GeometryCache::new(keeper.clone());
            cache.store(0.5, data(7)).unwrap();
            cache.store(1.5, data(3)).unwrap();
            assert_eq!(keeper.cache_size_kb(), 10);
        }
        assert_eq!(keeper.cache_size_kb(), 0);
    }

    #[test]
    fn test_negative_zero_key() {
        assert_eq!(CacheKey::new(-0.0), CacheKey::new(0.0));

        let keeper = CacheKeeperHandle::default();
        let mut cache = GeometryCache::new(keeper);
        cache.store(0.0, data(1)).unwrap();
        assert!(cache.is_cached(-0.0));
        assert!(cache.remove(-0.0).is_some());
        assert!(cache.is_empty());
    }
}
