//! 多進程會話上下文

use std::cell::Cell;
use std::rc::Rc;

use uuid::Uuid;
use viewsync_cache::CacheKeeperHandle;
use viewsync_core::{CacheConfig, Communicator, Result, SerialCommunicator, ViewSyncError};

struct SessionInner {
    session_id: Uuid,
    communicator: Box<dyn Communicator>,
    keeper: CacheKeeperHandle,
    active: Cell<bool>,
    next_view_id: Cell<u32>,
}

/// 多進程會話
///
/// 每個進程一個，擁有集體通訊器與本進程唯一的快取記帳器。
/// 視圖與表示物件從這裡取得注入的 [`CacheKeeperHandle`]。
#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionInner>,
}

impl Session {
    /// 建立會話
    ///
    /// 這是一個集體操作：rank 0 產生的會話 ID 會廣播給所有進程。
    pub fn new(communicator: Box<dyn Communicator>, cache_config: &CacheConfig) -> Result<Self> {
        let proposed = Uuid::new_v4();
        let gathered = communicator.all_gather(proposed.as_bytes().to_vec())?;
        let root = gathered
            .first()
            .ok_or_else(|| ViewSyncError::Collective("會話沒有任何進程".to_string()))?;
        let session_id = Uuid::from_slice(root)
            .map_err(|e| ViewSyncError::Collective(format!("無效的會話 ID: {}", e)))?;

        tracing::info!(
            "建立會話 {}：rank {} / {}，快取上限 {} KB",
            session_id,
            communicator.rank(),
            communicator.size(),
            cache_config.cache_limit_kb
        );

        Ok(Self {
            inner: Rc::new(SessionInner {
                session_id,
                communicator,
                keeper: CacheKeeperHandle::new(cache_config),
                active: Cell::new(true),
                next_view_id: Cell::new(1),
            }),
        })
    }

    /// 單進程會話
    pub fn serial(cache_config: &CacheConfig) -> Result<Self> {
        Self::new(Box::new(SerialCommunicator), cache_config)
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn rank(&self) -> usize {
        self.inner.communicator.rank()
    }

    pub fn size(&self) -> usize {
        self.inner.communicator.size()
    }

    pub fn communicator(&self) -> &dyn Communicator {
        self.inner.communicator.as_ref()
    }

    /// 本進程的快取記帳器
    pub fn cache_keeper(&self) -> CacheKeeperHandle {
        self.inner.keeper.clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// 結束會話；之後不能再建立視圖
    pub fn finalize(&self) {
        if self.inner.active.replace(false) {
            tracing::info!("會話 {} 已結束", self.inner.session_id);
        }
    }

    /// 分配進程內唯一的視圖識別碼
    pub(crate) fn next_view_identifier(&self) -> u32 {
        let id = self.inner.next_view_id.get();
        self.inner.next_view_id.set(id + 1);
        id
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.inner.session_id)
            .field("rank", &self.rank())
            .field("size", &self.size())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viewsync_core::ThreadCommunicator;

    #[test]
    fn test_serial_session() {
        let session = Session::serial(&CacheConfig::default()).unwrap();

        assert!(session.is_active());
        assert_eq!(session.rank(), 0);
        assert_eq!(session.size(), 1);
        assert_eq!(session.cache_keeper().cache_limit_kb(), 102_400);

        session.finalize();
        assert!(!session.is_active());
    }

    #[test]
    fn test_cache_keeper_is_shared_per_session() {
        let session = Session::serial(&CacheConfig::default()).unwrap();
        assert!(session.cache_keeper().same_keeper(&session.cache_keeper()));

        let other = Session::serial(&CacheConfig::default()).unwrap();
        assert!(!session.cache_keeper().same_keeper(&other.cache_keeper()));
    }

    #[test]
    fn test_view_identifiers_are_unique() {
        let session = Session::serial(&CacheConfig::default()).unwrap();
        let a = session.next_view_identifier();
        let b = session.next_view_identifier();
        assert_ne!(a, b);
    }

    #[test]
    fn test_session_id_agrees_across_ranks() {
        let comms = ThreadCommunicator::group(3);
        let ids: Vec<Uuid> = std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    scope.spawn(move || {
                        Session::new(Box::new(comm), &CacheConfig::default())
                            .unwrap()
                            .session_id()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(ids.iter().all(|id| *id == ids[0]));
    }
}
