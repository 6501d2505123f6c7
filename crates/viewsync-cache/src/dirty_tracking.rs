//! 髒標記追蹤

/// 更新狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    /// 需要重新執行管線
    Dirty,
    /// 上次真正執行之後沒有任何修改
    Clean,
}

/// 表示物件的 `need_update` 髒標記
///
/// 初始為 `Dirty`（尚未產生任何幾何資料）。
/// `Dirty → Clean` 只在真正執行完成後發生；`Clean → Dirty` 只由 `mark_dirty` 觸發。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyFlag {
    state: UpdateState,
    /// 已進入過的髒週期數（含初始週期）
    dirty_periods: u64,
}

impl DirtyFlag {
    /// 創建新的髒標記（初始為髒）
    pub fn new() -> Self {
        Self {
            state: UpdateState::Dirty,
            dirty_periods: 1,
        }
    }

    /// 標記為髒，回傳是否發生了狀態轉換
    pub fn mark_dirty(&mut self) -> bool {
        if self.state == UpdateState::Dirty {
            return false;
        }
        self.state = UpdateState::Dirty;
        self.dirty_periods += 1;
        true
    }

    /// 真正執行完成後清除
    pub fn mark_clean(&mut self) {
        self.state = UpdateState::Clean;
    }

    /// 檢查是否為髒
    pub fn is_dirty(&self) -> bool {
        self.state == UpdateState::Dirty
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn dirty_periods(&self) -> u64 {
        self.dirty_periods
    }
}

impl Default for DirtyFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_dirty() {
        let flag = DirtyFlag::new();
        assert!(flag.is_dirty());
        assert_eq!(flag.state(), UpdateState::Dirty);
        assert_eq!(flag.dirty_periods(), 1);
    }

    #[test]
    fn test_transitions() {
        let mut flag = DirtyFlag::new();

        // 已經是髒，不算新週期
        assert!(!flag.mark_dirty());
        assert_eq!(flag.dirty_periods(), 1);

        flag.mark_clean();
        assert!(!flag.is_dirty());

        assert!(flag.mark_dirty());
        assert!(flag.is_dirty());
        assert_eq!(flag.dirty_periods(), 2);
    }
}
