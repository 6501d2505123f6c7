//! 組合表示物件
//!
//! 多個可互換的子表示物件共享同一個邏輯身分，同一時間只有一個是作用中（可見）的。
//! 資料管線相關的呼叫（輸入連接、`mark_modified`、更新時間、強制快取設定）
//! 會轉發給所有子物件，因此切換作用中子物件不需要重新接線。

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use viewsync_core::{DataObject, PassType, ReplyInfo, Result, ViewContext};
use viewsync_repr::{
    DataUpdatedObserver, Representation, RepresentationState, SharedRepresentation, SharedStage,
};

struct CompositeChild {
    representation: SharedRepresentation,
    /// 移除後子物件的事件不再轉發
    attached: Rc<Cell<bool>>,
}

/// 組合表示物件
///
/// 視圖加入組合表示物件時，會經由 [`Representation::children`] 把每個子物件
/// 個別加入；子物件直接收到 `Update` 通道，組合本身則跳過它。
/// 加入視圖之後再增減子物件，視圖會在下一次 `update` 前同步
/// （見 `View::sync_children`）。
pub struct CompositeRepresentation {
    state: RepresentationState,
    children: BTreeMap<String, CompositeChild>,
    active_key: Option<String>,
}

impl CompositeRepresentation {
    pub fn new() -> Self {
        Self {
            state: RepresentationState::new(),
            children: BTreeMap::new(),
            active_key: None,
        }
    }

    /// 加入子表示物件
    ///
    /// 子物件預設為不可見；它的資料更新事件會以組合的身分重新發出。
    /// 鍵已存在時會發出警告並替換。
    ///
    /// # Panics
    /// 子物件尚未分配識別碼時（識別碼由視圖統一分配，見 `View::initialize_representation`）。
    pub fn add_child(&mut self, key: impl Into<String>, representation: SharedRepresentation) {
        let key = key.into();
        assert!(
            representation.borrow().unique_identifier() != 0,
            "子表示物件 {} 必須先由視圖分配識別碼",
            key
        );

        if self.children.contains_key(&key) {
            tracing::warn!("組合表示物件已有子物件 {}，將被替換", key);
            self.remove_child(&key);
        }

        let attached = Rc::new(Cell::new(true));
        {
            let mut child = representation.borrow_mut();
            child.set_visibility(false);

            let emitter = self.state.emitter().clone();
            let forwarding = attached.clone();
            child.subscribe_data_updated(Box::new(move |event| {
                if forwarding.get() {
                    emitter.emit(event.from_cache);
                }
            }));
        }

        tracing::debug!(
            "組合表示物件 {} 加入子物件 {}",
            self.state.unique_identifier(),
            key
        );
        self.children.insert(
            key,
            CompositeChild {
                representation,
                attached,
            },
        );
    }

    /// 移除子表示物件並將它隱藏
    pub fn remove_child(&mut self, key: &str) -> Option<SharedRepresentation> {
        let child = self.children.remove(key)?;
        child.attached.set(false);
        child.representation.borrow_mut().set_visibility(false);
        if self.active_key.as_deref() == Some(key) {
            self.active_key = None;
        }
        Some(child.representation)
    }

    /// 切換作用中的子物件
    ///
    /// 舊的作用中子物件被隱藏，新的跟隨組合本身的可見性。
    /// 未知的鍵會回報錯誤並使組合沒有作用中子物件。
    pub fn set_active(&mut self, key: &str) {
        if self.active_key.as_deref() == Some(key) {
            return;
        }

        if let Some(previous) = self.active_child() {
            previous.borrow_mut().set_visibility(false);
        }

        match self.children.get(key) {
            Some(child) => {
                child
                    .representation
                    .borrow_mut()
                    .set_visibility(self.state.visibility());
                self.active_key = Some(key.to_string());
            }
            None => {
                tracing::error!("組合表示物件沒有子物件 {}", key);
                self.active_key = None;
            }
        }
    }

    /// 取消作用中的子物件
    pub fn clear_active(&mut self) {
        if let Some(previous) = self.active_child() {
            previous.borrow_mut().set_visibility(false);
        }
        self.active_key = None;
    }

    pub fn active_key(&self) -> Option<&str> {
        self.active_key.as_deref()
    }

    pub fn active_child(&self) -> Option<SharedRepresentation> {
        let key = self.active_key.as_ref()?;
        self.child(key)
    }

    pub fn child(&self, key: &str) -> Option<SharedRepresentation> {
        self.children.get(key).map(|c| c.representation.clone())
    }

    pub fn child_keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.children.keys().map(String::as_str)
    }

    fn for_each_child(&self, mut f: impl FnMut(&mut dyn Representation)) {
        for child in self.children.values() {
            f(&mut *child.representation.borrow_mut());
        }
    }
}

impl Default for CompositeRepresentation {
    fn default() -> Self {
        Self::new()
    }
}

impl Representation for CompositeRepresentation {
    fn unique_identifier(&self) -> u32 {
        self.state.unique_identifier()
    }

    fn initialize(&mut self, min_id: u32, max_id: u32) -> u32 {
        self.state.initialize(min_id, max_id, 1)
    }

    fn visibility(&self) -> bool {
        self.state.visibility()
    }

    fn set_visibility(&mut self, visible: bool) {
        self.state.set_visibility(visible);
        if let Some(active) = self.active_child() {
            active.borrow_mut().set_visibility(visible);
        }
    }

    fn mark_modified(&mut self) {
        self.for_each_child(|child| child.mark_modified());
    }

    fn needs_update(&self) -> bool {
        self.children
            .values()
            .any(|c| c.representation.borrow().needs_update())
    }

    fn update_time(&self) -> Option<f64> {
        self.state.update_time()
    }

    fn set_update_time(&mut self, time: f64) {
        self.state.set_update_time(time);
        self.for_each_child(|child| child.set_update_time(time));
    }

    fn force_use_cache(&self) -> bool {
        self.state.force_use_cache()
    }

    fn set_force_use_cache(&mut self, force: bool) {
        self.state.set_force_use_cache(force);
        self.for_each_child(|child| child.set_force_use_cache(force));
    }

    fn forced_cache_key(&self) -> f64 {
        self.state.forced_cache_key()
    }

    fn set_forced_cache_key(&mut self, key: f64) {
        self.state.set_forced_cache_key(key);
        self.for_each_child(|child| child.set_forced_cache_key(key));
    }

    fn set_input_connection(&mut self, input: Option<SharedStage>) {
        self.for_each_child(|child| child.set_input_connection(input.clone()));
    }

    fn is_cached(&self, cache_key: f64) -> bool {
        self.active_child()
            .map(|c| c.borrow().is_cached(cache_key))
            .unwrap_or(false)
    }

    fn clear_cache(&mut self) {
        self.for_each_child(|child| child.clear_cache());
    }

    fn process_view_request(
        &mut self,
        pass: PassType,
        _view: &ViewContext,
        reply: &mut ReplyInfo,
    ) -> Result<bool> {
        assert!(
            self.state.is_initialized(),
            "表示物件在處理視圖請求前必須先分配識別碼"
        );

        // 子物件已直接收到 Update
        if !self.state.visibility() || pass == PassType::Update {
            return Ok(false);
        }

        reply.handled = true;
        Ok(true)
    }

    fn subscribe_data_updated(&mut self, observer: DataUpdatedObserver) {
        self.state.emitter().subscribe(observer);
    }

    fn rendered_data(&self) -> Option<DataObject> {
        self.active_child()?.borrow().rendered_data()
    }

    fn children(&self) -> Vec<SharedRepresentation> {
        self.children
            .values()
            .map(|c| c.representation.clone())
            .collect()
    }
}

impl std::fmt::Debug for CompositeRepresentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeRepresentation")
            .field("state", &self.state)
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .field("active_key", &self.active_key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::RefCell;
    use viewsync_cache::CacheKeeperHandle;
    use viewsync_core::{CacheConfig, ViewConfig};
    use viewsync_repr::{DataRepresentation, DataUpdated, ExecutionRequest, RepresentationAlgorithm};

    use crate::{Session, View};

    struct Surface;

    impl RepresentationAlgorithm for Surface {
        fn request_data(&mut self, _input: Option<&DataObject>, request: &ExecutionRequest) -> Result<DataObject> {
            Ok(DataObject::from_points(vec![[1.0, 1.0, 1.0]], request.time).with_memory_kb(2))
        }
    }

    fn child(keeper: &CacheKeeperHandle, id: u32) -> SharedRepresentation {
        let repr: SharedRepresentation = DataRepresentation::shared(Surface, keeper.clone());
        repr.borrow_mut().initialize(id, u32::MAX);
        repr
    }

    fn composite(keys: &[&str]) -> CompositeRepresentation {
        let keeper = CacheKeeperHandle::default();
        let mut composite = CompositeRepresentation::new();
        composite.initialize(100, u32::MAX);
        for (i, key) in keys.iter().enumerate() {
            composite.add_child(*key, child(&keeper, i as u32 + 1));
        }
        composite
    }

    fn visible(composite: &CompositeRepresentation, key: &str) -> bool {
        composite.child(key).unwrap().borrow().visibility()
    }

    #[test]
    fn test_children_start_hidden() {
        let composite = composite(&["A", "B"]);
        assert!(!visible(&composite, "A"));
        assert!(!visible(&composite, "B"));
        assert_eq!(composite.active_key(), None);
        assert_eq!(composite.child_keys().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn test_switch_active_child() {
        let mut composite = composite(&["A", "B"]);

        composite.set_active("B");
        assert!(visible(&composite, "B"));

        composite.set_active("A");
        assert!(visible(&composite, "A"));
        assert!(!visible(&composite, "B"));

        // 未知的鍵：隱藏原本的子物件，且沒有作用中子物件
        composite.set_active("missing");
        assert!(!visible(&composite, "A"));
        assert!(!visible(&composite, "B"));
        assert_eq!(composite.active_key(), None);
    }

    #[test]
    fn test_active_child_mirrors_composite_visibility() {
        let mut composite = composite(&["A", "B"]);
        composite.set_visibility(false);
        composite.set_active("A");
        assert!(!visible(&composite, "A"));

        composite.set_visibility(true);
        assert!(visible(&composite, "A"));
        assert!(!visible(&composite, "B"));
    }

    #[test]
    #[should_panic(expected = "必須先由視圖分配識別碼")]
    fn test_uninitialized_child_panics() {
        let mut composite = composite(&[]);
        let repr: SharedRepresentation =
            DataRepresentation::shared(Surface, CacheKeeperHandle::default());
        composite.add_child("A", repr);
    }

    #[test]
    fn test_replacing_child_detaches_old_one() {
        let keeper = CacheKeeperHandle::default();
        let mut composite = composite(&["A"]);
        let old = composite.child("A").unwrap();
        composite.set_active("A");

        composite.add_child("A", child(&keeper, 7));
        assert_eq!(composite.active_key(), None);
        assert_eq!(composite.child("A").unwrap().borrow().unique_identifier(), 7);
        assert!(!old.borrow().visibility());

        let events = Rc::new(RefCell::new(0));
        let sink = events.clone();
        composite.subscribe_data_updated(Box::new(move |_| *sink.borrow_mut() += 1));

        // 即使有人重新顯示舊的子物件，它的執行也不再轉發
        let mut reply = ReplyInfo::default();
        old.borrow_mut().set_visibility(true);
        old.borrow_mut()
            .process_view_request(PassType::Update, &ctx(), &mut reply)
            .unwrap();
        assert!(reply.executed);
        assert_eq!(*events.borrow(), 0);
    }

    fn ctx() -> ViewContext {
        ViewContext {
            view_id: 1,
            view_time: None,
            use_cache: false,
            cache_key: 0.0,
        }
    }

    #[test]
    fn test_data_updated_reemitted_under_composite_identity() {
        let mut composite = composite(&["A", "B"]);
        composite.set_active("B");

        let events = Rc::new(RefCell::new(Vec::<DataUpdated>::new()));
        let sink = events.clone();
        composite.subscribe_data_updated(Box::new(move |e| sink.borrow_mut().push(*e)));

        let b = composite.child("B").unwrap();
        let mut reply = ReplyInfo::default();
        b.borrow_mut()
            .process_view_request(PassType::Update, &ctx(), &mut reply)
            .unwrap();

        assert_eq!(
            *events.borrow(),
            vec![DataUpdated {
                source_id: 100,
                from_cache: false
            }]
        );
    }

    #[test]
    fn test_plumbing_forwarded_to_all_children() {
        let mut composite = composite(&["A", "B"]);
        composite.set_active("A");

        composite.set_force_use_cache(true);
        composite.set_forced_cache_key(2.5);
        composite.set_update_time(3.0);

        for key in ["A", "B"] {
            let child = composite.child(key).unwrap();
            let child = child.borrow();
            assert!(child.force_use_cache());
            assert_eq!(child.forced_cache_key(), 2.5);
            assert_eq!(child.update_time(), Some(3.0));
            assert!(child.needs_update());
        }
        assert!(composite.needs_update());
    }

    #[test]
    fn test_composite_skips_update_pass() {
        let mut composite = composite(&["A"]);
        let mut reply = ReplyInfo::default();

        assert!(!composite
            .process_view_request(PassType::Update, &ctx(), &mut reply)
            .unwrap());
        assert!(composite
            .process_view_request(PassType::Render, &ctx(), &mut reply)
            .unwrap());
        assert!(reply.handled);
    }

    #[test]
    fn test_composite_in_view_executes_only_active_child() {
        let session = Session::serial(&CacheConfig::default()).unwrap();
        let mut view = View::new(&session, ViewConfig::new());

        let a: SharedRepresentation = DataRepresentation::shared(Surface, session.cache_keeper());
        let b: SharedRepresentation = DataRepresentation::shared(Surface, session.cache_keeper());
        view.initialize_representation(&a);
        view.initialize_representation(&b);

        let composite = Rc::new(RefCell::new(CompositeRepresentation::new()));
        composite.borrow_mut().add_child("A", a.clone());
        composite.borrow_mut().add_child("B", b.clone());
        composite.borrow_mut().set_active("A");

        view.add_representation(composite.clone());
        assert_eq!(view.representations().len(), 3);
        assert_eq!(composite.borrow().unique_identifier(), 3);

        let summary = view.still_render().unwrap();
        assert_eq!(summary.executed_locally, 1);
        assert!(!a.borrow().needs_update());
        assert!(b.borrow().needs_update());
        assert_eq!(composite.borrow().rendered_data().unwrap().number_of_points(), 1);

        // 切換後 B 才真正執行，A 的結果保留
        composite.borrow_mut().set_active("B");
        let summary = view.update().unwrap();
        assert_eq!(summary.executed_locally, 1);
        assert!(!b.borrow().needs_update());
    }

    #[test]
    fn test_removed_child_hidden() {
        let mut composite = composite(&["A", "B"]);
        composite.set_active("A");

        let removed = composite.remove_child("A").unwrap();
        assert!(!removed.borrow().visibility());
        assert_eq!(composite.active_key(), None);
        assert!(composite.remove_child("A").is_none());
    }

    #[test]
    fn test_view_follows_children_replaced_after_attach() {
        let session = Session::serial(&CacheConfig::default()).unwrap();
        let mut view = View::new(&session, ViewConfig::new());

        let old: SharedRepresentation =
            DataRepresentation::shared(Bulky(7), session.cache_keeper());
        view.initialize_representation(&old);
        let composite = Rc::new(RefCell::new(CompositeRepresentation::new()));
        composite.borrow_mut().add_child("A", old.clone());
        composite.borrow_mut().set_active("A");
        view.add_representation(composite.clone());
        assert_eq!(view.still_render().unwrap().total_data_size_kb, 7);

        // 替換作用中的子物件，然後取消作用中
        let new: SharedRepresentation =
            DataRepresentation::shared(Bulky(3), session.cache_keeper());
        view.initialize_representation(&new);
        composite.borrow_mut().add_child("A", new.clone());
        composite.borrow_mut().clear_active();

        let summary = view.still_render().unwrap();
        assert!(!old.borrow().visibility());
        assert!(!view.contains(&old));
        assert!(view.contains(&new));
        assert_eq!(summary.total_data_size_kb, 0);

        // 新的子物件確實收到 Update
        composite.borrow_mut().set_active("A");
        let summary = view.still_render().unwrap();
        assert_eq!(summary.total_data_size_kb, 3);
        assert_eq!(summary.executed_locally, 1);

        // 從組合移除後也離開視圖
        composite.borrow_mut().remove_child("A");
        view.update().unwrap();
        assert!(!view.contains(&new));
        assert_eq!(view.representations().len(), 1);
    }

    struct Bulky(u64);

    impl RepresentationAlgorithm for Bulky {
        fn request_data(&mut self, _input: Option<&DataObject>, request: &ExecutionRequest) -> Result<DataObject> {
            Ok(DataObject::from_points(vec![[0.0; 3]], request.time).with_memory_kb(self.0))
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Activate(usize),
        Missing,
        Clear,
        Visibility(bool),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..3).prop_map(Op::Activate),
            Just(Op::Missing),
            Just(Op::Clear),
            any::<bool>().prop_map(Op::Visibility),
        ]
    }

    proptest! {
        #[test]
        fn prop_at_most_one_visible_child(ops in proptest::collection::vec(op(), 1..30)) {
            let keys = ["A", "B", "C"];
            let mut composite = composite(&keys);

            for op in ops {
                match op {
                    Op::Activate(i) => composite.set_active(keys[i]),
                    Op::Missing => composite.set_active("missing"),
                    Op::Clear => composite.clear_active(),
                    Op::Visibility(v) => composite.set_visibility(v),
                }

                let shown: Vec<&str> = keys.iter().copied().filter(|k| visible(&composite, k)).collect();
                prop_assert!(shown.len() <= 1);
                if let Some(key) = shown.first() {
                    prop_assert_eq!(composite.active_key(), Some(*key));
                    prop_assert!(composite.visibility());
                }
            }
        }
    }
}
