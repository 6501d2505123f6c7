//! 表示物件
//!
//! 表示物件包裝一條產生資料的管線，並決定何時真正重新推導輸出。

use std::cell::RefCell;
use std::rc::Rc;

use viewsync_cache::{CacheKeeperHandle, DirtyFlag, GeometryCache};
use viewsync_core::{CachePolicy, DataObject, PassType, ReplyInfo, Result, ViewContext};

use crate::events::{DataUpdatedEmitter, DataUpdatedObserver};
use crate::executive::{SuppressingExecutive, SuppressionGate};
use crate::pipeline::{ExecutionOutcome, ExecutionRequest, SharedStage};

/// 共享的表示物件
///
/// 視圖與組合表示物件都持有同一個實例，只在本進程的渲染執行緒上使用。
pub type SharedRepresentation = Rc<RefCell<dyn Representation>>;

/// 表示物件介面
pub trait Representation {
    /// 唯一識別碼（0 表示尚未分配）
    fn unique_identifier(&self) -> u32;

    /// 需要保留的識別碼數量
    fn identifiers_needed(&self) -> u32 {
        1
    }

    /// 一次性分配識別碼，回傳下一個可用的識別碼
    ///
    /// 已分配過時不做任何事並回傳 `min_id`。
    ///
    /// # Panics
    /// 保留範圍 `[min_id, max_id]` 不足以容納 [`Representation::identifiers_needed`] 時。
    fn initialize(&mut self, min_id: u32, max_id: u32) -> u32;

    fn visibility(&self) -> bool;
    fn set_visibility(&mut self, visible: bool);

    /// 任何可配置參數或上游連接改變時呼叫，使狀態回到 `Dirty`
    fn mark_modified(&mut self);

    /// `need_update` 是否為髒
    fn needs_update(&self) -> bool;

    fn update_time(&self) -> Option<f64>;

    /// 設置更新時間，時間改變時標記為已修改
    fn set_update_time(&mut self, time: f64);

    fn force_use_cache(&self) -> bool;
    fn set_force_use_cache(&mut self, force: bool);
    fn forced_cache_key(&self) -> f64;
    fn set_forced_cache_key(&mut self, key: f64);

    /// 連接上游管線階段
    fn set_input_connection(&mut self, input: Option<SharedStage>);

    /// 指定快取鍵是否已有結果
    fn is_cached(&self, cache_key: f64) -> bool;

    /// 丟棄所有快取結果
    fn clear_cache(&mut self);

    /// 處理視圖的通道請求
    ///
    /// 回傳 `Ok(false)` 表示呼叫者本幀應停止處理此表示物件（例如不可見）。
    ///
    /// # Panics
    /// 尚未分配識別碼時。
    fn process_view_request(
        &mut self,
        pass: PassType,
        view: &ViewContext,
        reply: &mut ReplyInfo,
    ) -> Result<bool>;

    /// 訂閱資料更新事件
    fn subscribe_data_updated(&mut self, observer: DataUpdatedObserver);

    /// 目前交付給渲染的資料
    fn rendered_data(&self) -> Option<DataObject>;

    /// 需要由視圖個別加入的子表示物件
    fn children(&self) -> Vec<SharedRepresentation> {
        Vec::new()
    }

    /// 有效快取策略
    fn cache_policy(&self, view: Option<&ViewContext>) -> CachePolicy {
        CachePolicy::resolve(self.force_use_cache(), self.forced_cache_key(), view)
    }

    /// 本幀是否改用快取：有效 `use_cache` 為真且該鍵已快取
    fn using_cache_for_this_frame(&self, view: Option<&ViewContext>) -> bool {
        let policy = self.cache_policy(view);
        policy.use_cache && self.is_cached(policy.cache_key)
    }
}

/// 所有表示物件共有的狀態
#[derive(Debug)]
pub struct RepresentationState {
    emitter: DataUpdatedEmitter,
    visibility: bool,
    update_time: Option<f64>,
    force_use_cache: bool,
    forced_cache_key: f64,
}

impl RepresentationState {
    /// 創建新的狀態（可見、未分配識別碼）
    pub fn new() -> Self {
        Self {
            emitter: DataUpdatedEmitter::new(),
            visibility: true,
            update_time: None,
            force_use_cache: false,
            forced_cache_key: 0.0,
        }
    }

    pub fn unique_identifier(&self) -> u32 {
        self.emitter.identifier()
    }

    pub fn is_initialized(&self) -> bool {
        self.unique_identifier() != 0
    }

    /// 一次性識別碼分配
    pub fn initialize(&mut self, min_id: u32, max_id: u32, needed: u32) -> u32 {
        if self.is_initialized() {
            tracing::debug!(
                "表示物件已有識別碼 {}，略過分配",
                self.unique_identifier()
            );
            return min_id;
        }

        assert!(min_id != 0, "識別碼 0 保留為「未分配」");
        assert!(needed >= 1, "表示物件至少需要一個識別碼");
        assert!(
            u64::from(min_id) + u64::from(needed) - 1 <= u64::from(max_id),
            "保留的識別碼範圍 [{}, {}] 不足，需要 {} 個",
            min_id,
            max_id,
            needed
        );

        // 下一個可用識別碼也必須可表示，否則後續分配會與本範圍重疊
        let Some(next) = min_id.checked_add(needed) else {
            panic!(
                "識別碼空間已耗盡：[{}, {}] 之後沒有可分配的識別碼",
                min_id, max_id
            );
        };

        self.emitter.set_identifier(min_id);
        tracing::debug!("分配識別碼 {}（保留 {} 個）", min_id, needed);
        next
    }

    pub fn visibility(&self) -> bool {
        self.visibility
    }

    pub fn set_visibility(&mut self, visible: bool) {
        self.visibility = visible;
    }

    pub fn update_time(&self) -> Option<f64> {
        self.update_time
    }

    /// 設置更新時間，回傳是否改變
    pub fn set_update_time(&mut self, time: f64) -> bool {
        if self.update_time == Some(time) {
            return false;
        }
        self.update_time = Some(time);
        true
    }

    pub fn force_use_cache(&self) -> bool {
        self.force_use_cache
    }

    pub fn set_force_use_cache(&mut self, force: bool) {
        self.force_use_cache = force;
    }

    pub fn forced_cache_key(&self) -> f64 {
        self.forced_cache_key
    }

    pub fn set_forced_cache_key(&mut self, key: f64) {
        self.forced_cache_key = key;
    }

    pub fn emitter(&self) -> &DataUpdatedEmitter {
        &self.emitter
    }
}

impl Default for RepresentationState {
    fn default() -> Self {
        Self::new()
    }
}

/// 表示物件自身的「真正執行」邏輯（例如幾何提取器）
pub trait RepresentationAlgorithm {
    /// 需要保留的識別碼數量
    fn identifiers_needed(&self) -> u32 {
        1
    }

    /// 由上游輸入產生要渲染的資料
    fn request_data(&mut self, input: Option<&DataObject>, request: &ExecutionRequest) -> Result<DataObject>;

    /// 產生低解析度資料
    fn prepare_lod(&mut self, _data: &DataObject) -> Option<DataObject> {
        None
    }

    /// 渲染通道
    fn render(&mut self, _data: &DataObject, _lod: Option<&DataObject>) {}
}

/// 資料表示物件
pub struct DataRepresentation<A> {
    state: RepresentationState,
    need_update: DirtyFlag,
    executive: SuppressingExecutive,
    input: Option<SharedStage>,
    algorithm: A,
    cache: GeometryCache,
    current: Option<DataObject>,
    lod: Option<DataObject>,
    last_policy: CachePolicy,
    execution_count: u64,
}

impl<A: RepresentationAlgorithm> DataRepresentation<A> {
    /// 創建新的表示物件，快取用量回報到 `keeper`
    pub fn new(algorithm: A, keeper: CacheKeeperHandle) -> Self {
        Self {
            state: RepresentationState::new(),
            need_update: DirtyFlag::new(),
            executive: SuppressingExecutive::new(),
            input: None,
            algorithm,
            cache: GeometryCache::new(keeper),
            current: None,
            lod: None,
            last_policy: CachePolicy::DISABLED,
            execution_count: 0,
        }
    }

    /// 包裝成可共享的實例
    pub fn shared(algorithm: A, keeper: CacheKeeperHandle) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new(algorithm, keeper)))
    }

    /// 真正執行的次數
    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    pub fn algorithm(&self) -> &A {
        &self.algorithm
    }

    pub fn algorithm_mut(&mut self) -> &mut A {
        &mut self.algorithm
    }

    pub fn executive(&self) -> &SuppressingExecutive {
        &self.executive
    }

    pub fn geometry_cache(&self) -> &GeometryCache {
        &self.cache
    }

    /// `Update` 通道
    fn request_update(&mut self, view: &ViewContext, reply: &mut ReplyInfo) -> Result<()> {
        let policy = self.cache_policy(Some(view));
        self.last_policy = policy;

        let gate = SuppressionGate {
            needs_update: self.need_update.is_dirty(),
            using_cache: policy.use_cache && self.cache.is_cached(policy.cache_key),
        };
        let request = ExecutionRequest::new(self.state.update_time());

        let algorithm = &mut self.algorithm;
        let outcome = self
            .executive
            .update(&gate, self.input.as_ref(), &request, |input| {
                algorithm.request_data(input, &request)
            })?;

        match outcome {
            ExecutionOutcome::Executed(data) => {
                self.need_update.mark_clean();
                self.execution_count += 1;
                // 每個髒週期最多執行一次
                debug_assert!(self.execution_count <= self.need_update.dirty_periods());
                tracing::debug!(
                    "表示物件 {} 真正執行（第 {} 次，髒週期 {}）",
                    self.state.unique_identifier(),
                    self.execution_count,
                    self.need_update.dirty_periods()
                );

                if policy.use_cache {
                    self.cache.store(policy.cache_key, data.clone())?;
                }
                self.current = Some(data);
                self.lod = None;
                reply.executed = true;
                self.state.emitter().emit(false);
            }
            ExecutionOutcome::NothingToDo if gate.using_cache => {
                tracing::debug!(
                    "表示物件 {} 使用快取鍵 {}",
                    self.state.unique_identifier(),
                    policy.cache_key
                );
                self.current = self.cache.get(policy.cache_key).cloned();
                self.lod = None;
                reply.used_cache = true;
                self.state.emitter().emit(true);
            }
            ExecutionOutcome::NothingToDo => {}
        }

        if let Some(data) = &self.current {
            reply.bounds = data.bounds;
            reply.data_size_kb = data.memory_kb;
        }
        Ok(())
    }
}

impl<A: RepresentationAlgorithm> Representation for DataRepresentation<A> {
    fn unique_identifier(&self) -> u32 {
        self.state.unique_identifier()
    }

    fn identifiers_needed(&self) -> u32 {
        self.algorithm.identifiers_needed()
    }

    fn initialize(&mut self, min_id: u32, max_id: u32) -> u32 {
        let needed = self.identifiers_needed();
        self.state.initialize(min_id, max_id, needed)
    }

    fn visibility(&self) -> bool {
        self.state.visibility()
    }

    fn set_visibility(&mut self, visible: bool) {
        self.state.set_visibility(visible);
    }

    fn mark_modified(&mut self) {
        // 上一幀沒有使用快取時，已快取的結果已經過時
        if !self.last_policy.use_cache && !self.state.force_use_cache() {
            self.cache.clear();
        }
        self.need_update.mark_dirty();
        self.executive.signal_modified();
    }

    fn needs_update(&self) -> bool {
        self.need_update.is_dirty()
    }

    fn update_time(&self) -> Option<f64> {
        self.state.update_time()
    }

    fn set_update_time(&mut self, time: f64) {
        if self.state.set_update_time(time) {
            self.mark_modified();
        }
    }

    fn force_use_cache(&self) -> bool {
        self.state.force_use_cache()
    }

    fn set_force_use_cache(&mut self, force: bool) {
        self.state.set_force_use_cache(force);
    }

    fn forced_cache_key(&self) -> f64 {
        self.state.forced_cache_key()
    }

    fn set_forced_cache_key(&mut self, key: f64) {
        self.state.set_forced_cache_key(key);
    }

    fn set_input_connection(&mut self, input: Option<SharedStage>) {
        self.input = input;
        self.mark_modified();
    }

    fn is_cached(&self, cache_key: f64) -> bool {
        self.cache.is_cached(cache_key)
    }

    fn clear_cache(&mut self) {
        self.cache.clear();
    }

    fn process_view_request(
        &mut self,
        pass: PassType,
        view: &ViewContext,
        reply: &mut ReplyInfo,
    ) -> Result<bool> {
        assert!(
            self.state.is_initialized(),
            "表示物件在處理視圖請求前必須先分配識別碼"
        );

        if !self.state.visibility() {
            return Ok(false);
        }

        match pass {
            PassType::Update => self.request_update(view, reply)?,
            PassType::UpdateLod => {
                if let Some(data) = &self.current {
                    self.lod = self.algorithm.prepare_lod(data);
                }
            }
            PassType::Render => {
                if let Some(data) = &self.current {
                    self.algorithm.render(data, self.lod.as_ref());
                }
            }
        }

        reply.handled = true;
        Ok(true)
    }

    fn subscribe_data_updated(&mut self, observer: DataUpdatedObserver) {
        self.state.emitter().subscribe(observer);
    }

    fn rendered_data(&self) -> Option<DataObject> {
        self.current.clone()
    }
}

impl<A> std::fmt::Debug for DataRepresentation<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataRepresentation")
            .field("state", &self.state)
            .field("need_update", &self.need_update)
            .field("cached_keys", &self.cache.len())
            .field("execution_count", &self.execution_count)
            .finish()
    }
}
