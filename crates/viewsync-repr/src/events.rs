//! 資料更新通知

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// 資料更新事件
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataUpdated {
    /// 發出事件的表示物件識別碼
    pub source_id: u32,
    /// 資料來自快取而非真正執行
    pub from_cache: bool,
}

/// 資料更新觀察者
pub type DataUpdatedObserver = Box<dyn FnMut(&DataUpdated)>;

/// 事件發送器
///
/// 識別碼與觀察者清單都是共享的，因此組合表示物件可以在子物件的
/// 回呼中以自己的身分轉發事件，即使訂閱發生在分配識別碼之前。
#[derive(Clone, Default)]
pub struct DataUpdatedEmitter {
    identifier: Rc<Cell<u32>>,
    observers: Rc<RefCell<Vec<DataUpdatedObserver>>>,
}

impl DataUpdatedEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identifier(&self) -> u32 {
        self.identifier.get()
    }

    pub(crate) fn set_identifier(&self, id: u32) {
        self.identifier.set(id);
    }

    /// 訂閱
    pub fn subscribe(&self, observer: DataUpdatedObserver) {
        self.observers.borrow_mut().push(observer);
    }

    /// 以本身的識別碼發出事件
    pub fn emit(&self, from_cache: bool) {
        let event = DataUpdated {
            source_id: self.identifier(),
            from_cache,
        };
        for observer in self.observers.borrow_mut().iter_mut() {
            observer(&event);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.borrow().len()
    }
}

impl std::fmt::Debug for DataUpdatedEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataUpdatedEmitter")
            .field("identifier", &self.identifier.get())
            .field("observers", &self.observer_count())
            .finish()
    }
}
