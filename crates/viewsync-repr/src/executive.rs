//! 更新抑制執行器
//!
//! 一般的需求驅動管線比較修改時間戳來決定是否重新執行。在分散式會話中，
//! 上游階段可能只存在於部分進程，時間戳比較無法保證在整個會話中一致；
//! 因此表示物件改用由代理層廣播到每個進程的明確 `need_update` 旗標。

use viewsync_core::{DataObject, Result};

use crate::pipeline::{
    DemandDrivenExecutive, ExecutionOutcome, ExecutionRequest, SharedStage, Timestamp, Upstream,
};

/// 可抑制更新的擁有者能力介面
pub trait Suppressible {
    /// 擁有者是否為髒
    fn needs_update(&self) -> bool;

    /// 擁有者本幀是否使用有效的快取
    fn using_cache(&self) -> bool;
}

/// 非表示物件的擁有者：永遠交給預設的需求驅動行為
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysExecute;

impl Suppressible for AlwaysExecute {
    fn needs_update(&self) -> bool {
        true
    }

    fn using_cache(&self) -> bool {
        false
    }
}

/// 表示物件在分派前擷取的抑制狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuppressionGate {
    pub needs_update: bool,
    pub using_cache: bool,
}

impl Suppressible for SuppressionGate {
    fn needs_update(&self) -> bool {
        self.needs_update
    }

    fn using_cache(&self) -> bool {
        self.using_cache
    }
}

/// 更新抑制執行器
///
/// 在上游轉發與主分派兩個掛鉤上，若擁有者使用快取或不是髒的，
/// 就直接回報「沒有需要做的事」。此執行器只讀取 `need_update`，從不清除它。
#[derive(Debug, Clone, Default)]
pub struct SuppressingExecutive {
    inner: DemandDrivenExecutive,
    owner_mtime: Timestamp,
    suppressed_count: u64,
}

impl SuppressingExecutive {
    pub fn new() -> Self {
        Self {
            inner: DemandDrivenExecutive::new(),
            owner_mtime: Timestamp::now(),
            suppressed_count: 0,
        }
    }

    /// 擁有者呼叫 `mark_modified` 時的通知
    pub fn signal_modified(&mut self) {
        self.owner_mtime = Timestamp::now();
    }

    /// 上次真正執行的時間戳
    pub fn data_time(&self) -> Timestamp {
        self.inner.data_time()
    }

    /// 被抑制的呼叫次數（上游轉發與主分派各算一次）
    pub fn suppressed_count(&self) -> u64 {
        self.suppressed_count
    }

    fn should_suppress(&mut self, owner: &dyn Suppressible) -> bool {
        let suppress = owner.using_cache() || !owner.needs_update();
        if suppress {
            self.suppressed_count += 1;
        }
        suppress
    }

    /// 上游轉發掛鉤；被抑制時回傳 `None`，不會觸碰上游
    pub fn forward_upstream(
        &mut self,
        owner: &dyn Suppressible,
        input: Option<&SharedStage>,
        request: &ExecutionRequest,
    ) -> Result<Option<Upstream>> {
        if self.should_suppress(owner) {
            tracing::trace!("抑制上游轉發");
            return Ok(None);
        }
        self.inner.forward_upstream(input, request).map(Some)
    }

    /// 主分派掛鉤
    pub fn execute<F>(
        &mut self,
        owner: &dyn Suppressible,
        upstream: &Upstream,
        request: &ExecutionRequest,
        produce: F,
    ) -> Result<ExecutionOutcome>
    where
        F: FnOnce(Option<&DataObject>) -> Result<DataObject>,
    {
        if self.should_suppress(owner) {
            tracing::trace!("抑制主分派");
            return Ok(ExecutionOutcome::NothingToDo);
        }
        self.inner
            .execute(self.owner_mtime, upstream, request, produce)
    }

    /// 依序執行上游轉發與主分派
    pub fn update<F>(
        &mut self,
        owner: &dyn Suppressible,
        input: Option<&SharedStage>,
        request: &ExecutionRequest,
        produce: F,
    ) -> Result<ExecutionOutcome>
    where
        F: FnOnce(Option<&DataObject>) -> Result<DataObject>,
    {
        match self.forward_upstream(owner, input, request)? {
            Some(upstream) => self.execute(owner, &upstream, request, produce),
            None => Ok(ExecutionOutcome::NothingToDo),
        }
    }
}
