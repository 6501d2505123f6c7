//! 視圖協調器
//!
//! 視圖在每個協作進程上以相同順序驅動 `Update → UpdateLod → Render`
//! 三個通道。所有集體操作都是阻塞的，每個進程每幀必須以相同次數、
//! 相同順序呼叫，否則整個會話會死鎖。

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use viewsync_cache::CacheKeeperHandle;
use viewsync_core::{
    Bounds, FrameSummary, PassType, ReduceOp, ReplyInfo, Result, ViewConfig, ViewContext,
    ViewSyncError,
};
use viewsync_repr::{Representation, SharedRepresentation};

use crate::session::Session;

/// 視圖層級的快取擴充點
pub trait ViewCachePolicy {
    /// 表示物件本幀是否可由快取提供
    fn is_cached(&self, view: &ViewContext, representation: &dyn Representation) -> bool;

    /// 丟棄表示物件的快取
    fn clear_cache(&mut self, representation: &mut dyn Representation);
}

/// 預設策略：拒絕快取
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyCaching;

impl ViewCachePolicy for DenyCaching {
    fn is_cached(&self, _view: &ViewContext, _representation: &dyn Representation) -> bool {
        false
    }

    fn clear_cache(&mut self, _representation: &mut dyn Representation) {}
}

/// 交給表示物件自己的幾何快取判斷
#[derive(Debug, Clone, Copy, Default)]
pub struct RepresentationCache;

impl ViewCachePolicy for RepresentationCache {
    fn is_cached(&self, view: &ViewContext, representation: &dyn Representation) -> bool {
        representation.using_cache_for_this_frame(Some(view))
    }

    fn clear_cache(&mut self, representation: &mut dyn Representation) {
        representation.clear_cache();
    }
}

/// 識別碼協商時每個進程提出的請求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IdProposal {
    key: String,
    ids_needed: u32,
    initialized: bool,
}

fn representation_key(representation: &SharedRepresentation) -> *const () {
    Rc::as_ptr(representation) as *const ()
}

fn same_representation(a: &SharedRepresentation, b: &SharedRepresentation) -> bool {
    representation_key(a) == representation_key(b)
}

/// 視圖
pub struct View {
    identifier: u32,
    session: Session,
    keeper: CacheKeeperHandle,
    config: ViewConfig,
    view_time: Option<f64>,
    representations: Vec<SharedRepresentation>,
    /// 每個表示物件上次同步時的子物件
    children_of: HashMap<*const (), Vec<SharedRepresentation>>,
    replies: Vec<ReplyInfo>,
    next_id: u32,
    cache_policy: Box<dyn ViewCachePolicy>,
}

impl View {
    /// 創建新的視圖
    ///
    /// # Panics
    /// 會話未啟用時；視圖不能脫離多進程會話單獨存在。
    pub fn new(session: &Session, config: ViewConfig) -> Self {
        assert!(
            session.is_active(),
            "視圖必須在啟用的多進程會話中建立"
        );

        let identifier = session.next_view_identifier();
        tracing::debug!("建立視圖 {}（rank {}）", identifier, session.rank());

        Self {
            identifier,
            session: session.clone(),
            keeper: session.cache_keeper(),
            config,
            view_time: None,
            representations: Vec::new(),
            children_of: HashMap::new(),
            replies: Vec::new(),
            next_id: 1,
            cache_policy: Box::new(DenyCaching),
        }
    }

    pub fn identifier(&self) -> u32 {
        self.identifier
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn cache_keeper(&self) -> &CacheKeeperHandle {
        &self.keeper
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    pub fn use_cache(&self) -> bool {
        self.config.use_cache
    }

    pub fn set_use_cache(&mut self, use_cache: bool) {
        self.config.use_cache = use_cache;
    }

    pub fn cache_key(&self) -> f64 {
        self.config.cache_key
    }

    pub fn set_cache_key(&mut self, cache_key: f64) {
        self.config.cache_key = cache_key;
    }

    pub fn view_time(&self) -> Option<f64> {
        self.view_time
    }

    pub fn set_view_time(&mut self, time: f64) {
        self.view_time = Some(time);
    }

    /// 使視圖時間無效；之後的 `Update` 不再推送時間
    pub fn invalidate_view_time(&mut self) {
        self.view_time = None;
    }

    /// 替換視圖層級的快取策略
    pub fn set_cache_policy(&mut self, policy: Box<dyn ViewCachePolicy>) {
        self.cache_policy = policy;
    }

    /// 本幀傳給每個表示物件的上下文
    pub fn context(&self) -> ViewContext {
        ViewContext {
            view_id: self.identifier,
            view_time: self.view_time,
            use_cache: self.config.use_cache,
            cache_key: self.config.cache_key,
        }
    }

    pub fn representations(&self) -> &[SharedRepresentation] {
        &self.representations
    }

    /// 上一個通道的回覆，與 [`View::representations`] 一一對應
    pub fn replies(&self) -> &[ReplyInfo] {
        &self.replies
    }

    /// 下一個可分配的識別碼
    pub fn next_identifier(&self) -> u32 {
        self.next_id
    }

    /// 為表示物件保留識別碼範圍但不加入視圖
    ///
    /// 組合表示物件的子物件必須在 `add_child` 之前以此分配識別碼。
    pub fn initialize_representation(&mut self, representation: &SharedRepresentation) -> u32 {
        let next = representation
            .borrow_mut()
            .initialize(self.next_id, self.config.max_representation_id);
        self.next_id = self.next_id.max(next);
        representation.borrow().unique_identifier()
    }

    /// 加入表示物件（以及它的子物件）
    ///
    /// 每個進程必須以相同順序呼叫；此處不做跨進程驗證。
    /// 需要驗證時使用 [`View::add_representations_negotiated`]。
    pub fn add_representation(&mut self, representation: SharedRepresentation) {
        if self.contains(&representation) {
            tracing::warn!(
                "表示物件 {} 已在視圖 {} 中",
                representation.borrow().unique_identifier(),
                self.identifier
            );
            return;
        }

        self.initialize_representation(&representation);
        self.attach(representation);
    }

    fn attach(&mut self, representation: SharedRepresentation) {
        let children = representation.borrow().children();
        tracing::debug!(
            "視圖 {} 加入表示物件 {}（{} 個子物件）",
            self.identifier,
            representation.borrow().unique_identifier(),
            children.len()
        );
        self.children_of
            .insert(representation_key(&representation), children.clone());
        self.representations.push(representation);

        // 子物件可能已經由協商加入
        for child in children {
            if !self.contains(&child) {
                self.add_representation(child);
            }
        }
    }

    /// 移除表示物件（以及它的子物件），回傳是否找到
    pub fn remove_representation(&mut self, representation: &SharedRepresentation) -> bool {
        let Some(index) = self
            .representations
            .iter()
            .position(|r| same_representation(r, representation))
        else {
            return false;
        };

        let removed = self.representations.remove(index);
        let children = self
            .children_of
            .remove(&representation_key(&removed))
            .unwrap_or_default();
        for child in &children {
            self.remove_representation(child);
        }
        true
    }

    /// 讓視圖中的子物件與每個表示物件目前的 [`Representation::children`] 一致
    ///
    /// 已不屬於父物件的子物件被移出視圖，新的子物件依序加入。
    /// `update` 在分派前會自動呼叫；這是純本地操作。
    pub fn sync_children(&mut self) {
        let parents = self.representations.clone();
        for parent in parents {
            if !self.contains(&parent) {
                continue;
            }

            let current = parent.borrow().children();
            let previous = self
                .children_of
                .get(&representation_key(&parent))
                .cloned()
                .unwrap_or_default();

            for stale in &previous {
                if !current.iter().any(|c| same_representation(c, stale)) {
                    tracing::debug!(
                        "視圖 {} 移除已脫離的子物件 {}",
                        self.identifier,
                        stale.borrow().unique_identifier()
                    );
                    self.remove_representation(stale);
                }
            }
            for fresh in &current {
                if !self.contains(fresh) {
                    self.add_representation(fresh.clone());
                }
            }

            self.children_of.insert(representation_key(&parent), current);
        }
    }

    pub fn contains(&self, representation: &SharedRepresentation) -> bool {
        self.representations
            .iter()
            .any(|r| same_representation(r, representation))
    }

    /// 以協商方式加入一批表示物件
    ///
    /// 每個進程提出 `{key, ids_needed}`，收集後驗證所有進程一致，
    /// 依鍵排序分配識別碼範圍，並以相同順序加入視圖。
    /// 即使各進程的本地順序不同，結果也完全一致。
    pub fn add_representations_negotiated(
        &mut self,
        batch: Vec<(String, SharedRepresentation)>,
    ) -> Result<()> {
        let proposals: Vec<IdProposal> = batch
            .iter()
            .map(|(key, repr)| {
                let repr = repr.borrow();
                IdProposal {
                    key: key.clone(),
                    ids_needed: repr.identifiers_needed(),
                    initialized: repr.unique_identifier() != 0,
                }
            })
            .collect();

        let payload = serde_json::to_vec(&proposals)
            .map_err(|e| ViewSyncError::IdentifierHandshake(e.to_string()))?;
        let gathered = self.session.communicator().all_gather(payload)?;

        // 所有進程看到相同的收集結果，因此下面的驗證在每個進程上結論一致
        let mut agreed: Option<BTreeMap<String, u32>> = None;
        for (rank, bytes) in gathered.iter().enumerate() {
            let remote: Vec<IdProposal> = serde_json::from_slice(bytes)
                .map_err(|e| ViewSyncError::IdentifierHandshake(e.to_string()))?;

            if let Some(p) = remote.iter().find(|p| p.initialized) {
                return Err(ViewSyncError::IdentifierHandshake(format!(
                    "rank {} 的表示物件 {} 已分配識別碼",
                    rank, p.key
                )));
            }

            let map: BTreeMap<String, u32> = remote
                .iter()
                .map(|p| (p.key.clone(), p.ids_needed))
                .collect();
            if map.len() != remote.len() {
                return Err(ViewSyncError::IdentifierHandshake(format!(
                    "rank {} 提出了重複的鍵",
                    rank
                )));
            }

            match &agreed {
                None => agreed = Some(map),
                Some(expected) if *expected != map => {
                    return Err(ViewSyncError::IdentifierHandshake(format!(
                        "rank {} 的提案與 rank 0 不一致",
                        rank
                    )));
                }
                Some(_) => {}
            }
        }

        let agreed = agreed.unwrap_or_default();
        let mut local: BTreeMap<String, SharedRepresentation> = batch.into_iter().collect();

        for (key, ids_needed) in &agreed {
            let Some(repr) = local.remove(key) else {
                continue;
            };
            let first = self.initialize_representation(&repr);
            tracing::debug!(
                "協商分配：{} → {} 起共 {} 個",
                key,
                first,
                ids_needed
            );
            self.attach(repr);
        }

        Ok(())
    }

    /// 視圖層級：表示物件本幀是否由快取提供
    pub fn is_cached(&self, representation: &SharedRepresentation) -> bool {
        self.cache_policy
            .is_cached(&self.context(), &*representation.borrow())
    }

    /// 視圖層級：丟棄表示物件的快取
    pub fn clear_cache(&mut self, representation: &SharedRepresentation) {
        self.cache_policy
            .clear_cache(&mut *representation.borrow_mut());
    }

    /// `Update` 通道
    ///
    /// 啟用快取時先以邏輯或歸約同步「快取已滿」旗標，再分派通道；
    /// 之後歸約可見資料的邊界盒與資料大小。
    ///
    /// 本地管線失敗時仍完成所有歸約，最後同步失敗旗標：
    /// 只要任一進程失敗，所有進程都回傳錯誤。
    pub fn update(&mut self) -> Result<FrameSummary> {
        self.sync_children();
        let communicator = self.session.communicator();

        if self.config.use_cache {
            let local_full = self.keeper.exceeds_limit();
            let cache_full = communicator.all_reduce_bool(local_full, ReduceOp::LogicalOr)?;
            if cache_full != local_full {
                tracing::debug!("其他進程回報快取已滿");
            }
            self.keeper.set_cache_full(cache_full);
        }

        let dispatched = self.dispatch_pass(PassType::Update);

        let handled = self.replies.iter().filter(|r| r.handled);
        let local_bounds = handled
            .clone()
            .fold(None, |acc, r| Bounds::merge(acc, r.bounds));
        let local_size: u64 = handled.clone().map(|r| r.data_size_kb).sum();
        let executed_locally = handled.filter(|r| r.executed).count();

        let bounds = self.reduce_bounds(local_bounds)?;
        let total_data_size_kb = self
            .session
            .communicator()
            .all_reduce_u64(local_size, ReduceOp::Sum)?;
        self.agree_on_failure(PassType::Update, dispatched)?;

        let summary = FrameSummary {
            cache_full: self.keeper.is_full(),
            bounds,
            total_data_size_kb,
            executed_locally,
        };

        tracing::info!(
            "視圖 {} 更新完成：本地執行 {} 個，全域資料 {} KB，快取已滿 {}",
            self.identifier,
            summary.executed_locally,
            summary.total_data_size_kb,
            summary.cache_full
        );

        Ok(summary)
    }

    /// `UpdateLod` 通道
    pub fn update_lod(&mut self) -> Result<()> {
        let dispatched = self.dispatch_pass(PassType::UpdateLod);
        self.agree_on_failure(PassType::UpdateLod, dispatched)
    }

    /// `Render` 通道
    pub fn render(&mut self) -> Result<()> {
        let dispatched = self.dispatch_pass(PassType::Render);
        self.agree_on_failure(PassType::Render, dispatched)
    }

    /// 以邏輯或同步本地通道結果
    ///
    /// 本地失敗時回傳原本的錯誤；只有其他進程失敗時回傳 [`ViewSyncError::PeerFailure`]。
    fn agree_on_failure(&self, pass: PassType, dispatched: Result<usize>) -> Result<()> {
        let local_failed = dispatched.is_err();
        let any_failed = self
            .session
            .communicator()
            .all_reduce_bool(local_failed, ReduceOp::LogicalOr)?;

        match dispatched {
            Err(e) => Err(e),
            Ok(_) if any_failed => {
                tracing::warn!("視圖 {} 的 {:?} 通道在其他進程失敗", self.identifier, pass);
                Err(ViewSyncError::PeerFailure(format!("{:?}", pass)))
            }
            Ok(_) => Ok(()),
        }
    }

    /// 完整的一幀：`Update → UpdateLod → Render`
    pub fn still_render(&mut self) -> Result<FrameSummary> {
        let summary = self.update()?;
        self.update_lod()?;
        self.render()?;
        Ok(summary)
    }

    /// 依加入順序對每個表示物件分派通道，回傳處理了此通道的數量
    ///
    /// 某個表示物件失敗時仍分派給其餘的表示物件，最後回傳第一個錯誤。
    /// 這是純本地操作，不做跨進程同步。
    pub fn dispatch_pass(&mut self, pass: PassType) -> Result<usize> {
        // 表示物件在自己的通道中會讀取更新時間，因此要先全部推送
        if pass == PassType::Update {
            if let Some(time) = self.view_time {
                for representation in &self.representations {
                    representation.borrow_mut().set_update_time(time);
                }
            }
        }

        let context = self.context();
        self.replies
            .resize_with(self.representations.len(), ReplyInfo::default);

        let mut handled = 0;
        let mut first_error = None;
        for (representation, reply) in self.representations.iter().zip(self.replies.iter_mut()) {
            reply.reset();
            let outcome = representation
                .borrow_mut()
                .process_view_request(pass, &context, reply);
            match outcome {
                Ok(true) => handled += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        "表示物件 {} 的 {:?} 通道失敗: {}",
                        representation.borrow().unique_identifier(),
                        pass,
                        e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        tracing::trace!(
            "視圖 {} 通道 {:?}：{} / {} 個表示物件處理",
            self.identifier,
            pass,
            handled,
            self.representations.len()
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(handled),
        }
    }

    fn reduce_bounds(&self, local: Option<Bounds>) -> Result<Option<Bounds>> {
        let (min, max) = match local {
            Some(b) => (b.min, b.max),
            None => ([f64::INFINITY; 3], [f64::NEG_INFINITY; 3]),
        };

        let communicator = self.session.communicator();
        let min = communicator.all_reduce_f64(&min, ReduceOp::Min)?;
        let max = communicator.all_reduce_f64(&max, ReduceOp::Max)?;

        if min[0] > max[0] {
            return Ok(None);
        }
        Ok(Some(Bounds::new(
            [min[0], min[1], min[2]],
            [max[0], max[1], max[2]],
        )))
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("identifier", &self.identifier)
            .field("config", &self.config)
            .field("view_time", &self.view_time)
            .field("representations", &self.representations.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
