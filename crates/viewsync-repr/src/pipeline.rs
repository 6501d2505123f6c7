//! 通用需求驅動資料流
//!
//! 這是表示物件所包裝的外部資料流引擎的最小模型：每個階段在修改時間
//! 晚於上次執行時間、上游較新、或請求時間改變時才重新執行。

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use viewsync_core::{DataObject, Result};

static NEXT_TIMESTAMP: AtomicU64 = AtomicU64::new(1);

/// 單調遞增的修改時間戳
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// 從未修改／從未執行
    pub const ZERO: Timestamp = Timestamp(0);

    /// 取得新的時間戳，必定晚於之前取得的所有時間戳
    pub fn now() -> Self {
        Self(NEXT_TIMESTAMP.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// 執行請求
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExecutionRequest {
    /// 請求的時間（None 表示未指定）
    pub time: Option<f64>,
}

impl ExecutionRequest {
    pub fn new(time: Option<f64>) -> Self {
        Self { time }
    }
}

/// 資料處理演算法
pub trait Algorithm {
    /// 由上游輸入產生輸出
    fn request_data(&mut self, input: Option<&DataObject>, request: &ExecutionRequest) -> Result<DataObject>;
}

/// 執行結果
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// 真正執行並產生新資料
    Executed(DataObject),
    /// 沒有需要做的事
    NothingToDo,
}

impl ExecutionOutcome {
    pub fn executed(&self) -> bool {
        matches!(self, ExecutionOutcome::Executed(_))
    }
}

/// 上游轉發的結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Upstream {
    /// 上游輸出
    pub data: Option<DataObject>,
    /// 上游最後一次真正執行的時間
    pub data_time: Option<Timestamp>,
}

/// 需求驅動執行器（時間戳規則）
#[derive(Debug, Clone, Default)]
pub struct DemandDrivenExecutive {
    data_time: Timestamp,
    last_request_time: Option<f64>,
}

impl DemandDrivenExecutive {
    pub fn new() -> Self {
        Self::default()
    }

    /// 上次真正執行的時間戳
    pub fn data_time(&self) -> Timestamp {
        self.data_time
    }

    /// 時間戳規則：是否需要重新執行
    pub fn needs_execution(
        &self,
        owner_mtime: Timestamp,
        upstream: &Upstream,
        request: &ExecutionRequest,
    ) -> bool {
        if self.data_time.is_zero() {
            return true;
        }

        owner_mtime > self.data_time
            || upstream.data_time.is_some_and(|t| t > self.data_time)
            || request.time != self.last_request_time
    }

    /// 向上游轉發：先更新輸入階段
    pub fn forward_upstream(
        &mut self,
        input: Option<&SharedStage>,
        request: &ExecutionRequest,
    ) -> Result<Upstream> {
        match input {
            Some(stage) => {
                let mut stage = stage.borrow_mut();
                let data = stage.update(request)?;
                Ok(Upstream {
                    data: Some(data),
                    data_time: Some(stage.data_time()),
                })
            }
            None => Ok(Upstream::default()),
        }
    }

    /// 主分派：需要時呼叫 `produce` 並記錄執行時間
    pub fn execute<F>(
        &mut self,
        owner_mtime: Timestamp,
        upstream: &Upstream,
        request: &ExecutionRequest,
        produce: F,
    ) -> Result<ExecutionOutcome>
    where
        F: FnOnce(Option<&DataObject>) -> Result<DataObject>,
    {
        if !self.needs_execution(owner_mtime, upstream, request) {
            return Ok(ExecutionOutcome::NothingToDo);
        }

        let data = produce(upstream.data.as_ref())?;
        self.data_time = Timestamp::now();
        self.last_request_time = request.time;
        Ok(ExecutionOutcome::Executed(data))
    }
}

/// 共享的管線階段
pub type SharedStage = Rc<RefCell<PipelineStage>>;

/// 管線階段（表示物件的上游，例如讀取器或過濾器）
pub struct PipelineStage {
    algorithm: Box<dyn Algorithm>,
    input: Option<SharedStage>,
    mtime: Timestamp,
    executive: DemandDrivenExecutive,
    output: Option<DataObject>,
    execution_count: u64,
}

impl PipelineStage {
    /// 創建新的管線階段
    pub fn new(algorithm: Box<dyn Algorithm>) -> Self {
        Self {
            algorithm,
            input: None,
            mtime: Timestamp::now(),
            executive: DemandDrivenExecutive::new(),
            output: None,
            execution_count: 0,
        }
    }

    /// 創建可共享的管線階段
    pub fn shared(algorithm: Box<dyn Algorithm>) -> SharedStage {
        Rc::new(RefCell::new(Self::new(algorithm)))
    }

    /// 設置上游輸入
    pub fn set_input(&mut self, input: Option<SharedStage>) {
        self.input = input;
        self.modified();
    }

    /// 參數改變時呼叫
    pub fn modified(&mut self) {
        self.mtime = Timestamp::now();
    }

    pub fn mtime(&self) -> Timestamp {
        self.mtime
    }

    pub fn data_time(&self) -> Timestamp {
        self.executive.data_time()
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    pub fn output(&self) -> Option<&DataObject> {
        self.output.as_ref()
    }

    /// 需求驅動更新，回傳目前輸出
    pub fn update(&mut self, request: &ExecutionRequest) -> Result<DataObject> {
        let upstream = self
            .executive
            .forward_upstream(self.input.as_ref(), request)?;

        let algorithm = &mut self.algorithm;
        let outcome = self
            .executive
            .execute(self.mtime, &upstream, request, |input| {
                algorithm.request_data(input, request)
            })?;

        if let ExecutionOutcome::Executed(data) = outcome {
            self.execution_count += 1;
            self.output = Some(data);
        }

        Ok(self.output.clone().unwrap_or_else(DataObject::empty))
    }
}

impl std::fmt::Debug for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineStage")
            .field("mtime", &self.mtime)
            .field("data_time", &self.executive.data_time())
            .field("has_input", &self.input.is_some())
            .field("execution_count", &self.execution_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 產生 n 個點的來源
    struct PointSource {
        count: usize,
    }

    impl Algorithm for PointSource {
        fn request_data(&mut self, _input: Option<&DataObject>, request: &ExecutionRequest) -> Result<DataObject> {
            let offset = request.time.unwrap_or(0.0);
            let points = (0..self.count).map(|i| [i as f64 + offset, 0.0, 0.0]).collect();
            Ok(DataObject::from_points(points, request.time))
        }
    }

    /// 把輸入平移的過濾器
    struct Shift(f64);

    impl Algorithm for Shift {
        fn request_data(&mut self, input: Option<&DataObject>, request: &ExecutionRequest) -> Result<DataObject> {
            let points = input
                .map(|d| d.points.iter().map(|p| [p[0] + self.0, p[1], p[2]]).collect())
                .unwrap_or_default();
            Ok(DataObject::from_points(points, request.time))
        }
    }

    #[test]
    fn test_timestamps_increase() {
        let a = Timestamp::now();
        let b = Timestamp::now();
        assert!(b > a);
        assert!(Timestamp::ZERO.is_zero());
    }

    #[test]
    fn test_stage_executes_once_until_modified() {
        let mut stage = PipelineStage::new(Box::new(PointSource { count: 3 }));
        let request = ExecutionRequest::default();

        stage.update(&request).unwrap();
        stage.update(&request).unwrap();
        assert_eq!(stage.execution_count(), 1);

        stage.modified();
        stage.update(&request).unwrap();
        assert_eq!(stage.execution_count(), 2);
    }

    #[test]
    fn test_request_time_change_reexecutes() {
        let mut stage = PipelineStage::new(Box::new(PointSource { count: 1 }));

        let data = stage.update(&ExecutionRequest::new(Some(1.0))).unwrap();
        assert_eq!(data.points[0][0], 1.0);

        let data = stage.update(&ExecutionRequest::new(Some(2.0))).unwrap();
        assert_eq!(data.points[0][0], 2.0);
        assert_eq!(stage.execution_count(), 2);
    }

    #[test]
    fn test_upstream_change_propagates_downstream() {
        let source = PipelineStage::shared(Box::new(PointSource { count: 2 }));
        let mut filter = PipelineStage::new(Box::new(Shift(10.0)));
        filter.set_input(Some(source.clone()));
        let request = ExecutionRequest::default();

        let data = filter.update(&request).unwrap();
        assert_eq!(data.points[1][0], 11.0);

        filter.update(&request).unwrap();
        assert_eq!(filter.execution_count(), 1);

        // 上游修改後，下游應重新執行
        source.borrow_mut().modified();
        filter.update(&request).unwrap();
        assert_eq!(source.borrow().execution_count(), 2);
        assert_eq!(filter.execution_count(), 2);
    }
}
