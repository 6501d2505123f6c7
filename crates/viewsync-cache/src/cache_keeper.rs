//! 進程層級的快取記帳

use std::cell::RefCell;
use std::rc::Rc;

use viewsync_core::{CacheConfig, Result, ViewSyncError};

/// 快取記帳器
///
/// 追蹤本進程內所有表示物件的幾何快取總量（KB）。
/// `cache_full` 由視圖在跨進程同步後每幀設置一次，記帳器本身從不計算它。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeeper {
    cache_size_kb: u64,
    cache_limit_kb: u64,
    cache_full: bool,
}

impl CacheKeeper {
    /// 創建新的記帳器
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            cache_size_kb: 0,
            cache_limit_kb: config.cache_limit_kb,
            cache_full: false,
        }
    }

    /// 增加快取用量
    ///
    /// 已滿時回報錯誤且不修改用量；呼叫者應先檢查 [`CacheKeeper::is_full`]。
    pub fn add_size(&mut self, kb: u64) -> Result<()> {
        if self.cache_full {
            tracing::error!(
                "快取已滿，拒絕加入 {} KB（目前 {} KB，上限 {} KB）",
                kb,
                self.cache_size_kb,
                self.cache_limit_kb
            );
            return Err(ViewSyncError::CacheFull {
                requested_kb: kb,
                cache_size_kb: self.cache_size_kb,
            });
        }

        self.cache_size_kb = self.cache_size_kb.saturating_add(kb);
        Ok(())
    }

    /// 釋放快取用量，最低為 0
    pub fn free_size(&mut self, kb: u64) {
        self.cache_size_kb = self.cache_size_kb.saturating_sub(kb);
    }

    pub fn cache_size_kb(&self) -> u64 {
        self.cache_size_kb
    }

    pub fn cache_limit_kb(&self) -> u64 {
        self.cache_limit_kb
    }

    pub fn set_cache_limit_kb(&mut self, limit_kb: u64) {
        self.cache_limit_kb = limit_kb;
    }

    /// 本地用量是否超過上限（僅供視圖做跨進程歸約前的本地判斷）
    pub fn exceeds_limit(&self) -> bool {
        self.cache_size_kb > self.cache_limit_kb
    }

    pub fn is_full(&self) -> bool {
        self.cache_full
    }

    pub fn set_cache_full(&mut self, full: bool) {
        self.cache_full = full;
    }
}

impl Default for CacheKeeper {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

/// 快取記帳器句柄
///
/// 每個進程上下文一個實例，注入到視圖與每個表示物件。
/// 只在本進程的渲染執行緒上使用，因此不是 `Send`。
#[derive(Debug, Clone, Default)]
pub struct CacheKeeperHandle {
    inner: Rc<RefCell<CacheKeeper>>,
}

impl CacheKeeperHandle {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CacheKeeper::new(config))),
        }
    }

    pub fn add_size(&self, kb: u64) -> Result<()> {
        self.inner.borrow_mut().add_size(kb)
    }

    pub fn free_size(&self, kb: u64) {
        self.inner.borrow_mut().free_size(kb);
    }

    pub fn is_full(&self) -> bool {
        self.inner.borrow().is_full()
    }

    pub fn set_cache_full(&self, full: bool) {
        self.inner.borrow_mut().set_cache_full(full);
    }

    pub fn cache_size_kb(&self) -> u64 {
        self.inner.borrow().cache_size_kb()
    }

    pub fn cache_limit_kb(&self) -> u64 {
        self.inner.borrow().cache_limit_kb()
    }

    pub fn set_cache_limit_kb(&self, limit_kb: u64) {
        self.inner.borrow_mut().set_cache_limit_kb(limit_kb);
    }

    pub fn exceeds_limit(&self) -> bool {
        self.inner.borrow().exceeds_limit()
    }

    /// 兩個句柄是否指向同一個記帳器
    pub fn same_keeper(&self, other: &CacheKeeperHandle) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}
