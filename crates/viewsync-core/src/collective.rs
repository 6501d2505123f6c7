//! 跨進程集體通訊
//!
//! 所有集體操作都是阻塞的：每個進程必須以相同次數、相同順序呼叫，
//! 否則整個會話會死鎖。

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::{Result, ViewSyncError};

/// 歸約運算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// 邏輯或
    LogicalOr,
    /// 最小值
    Min,
    /// 最大值
    Max,
    /// 加總
    Sum,
}

impl ReduceOp {
    /// 合併兩個浮點值
    pub fn combine_f64(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            ReduceOp::LogicalOr => f64::from(u8::from(lhs != 0.0 || rhs != 0.0)),
            ReduceOp::Min => lhs.min(rhs),
            ReduceOp::Max => lhs.max(rhs),
            ReduceOp::Sum => lhs + rhs,
        }
    }

    /// 合併兩個整數值
    pub fn combine_u64(self, lhs: u64, rhs: u64) -> u64 {
        match self {
            ReduceOp::LogicalOr => u64::from(lhs != 0 || rhs != 0),
            ReduceOp::Min => lhs.min(rhs),
            ReduceOp::Max => lhs.max(rhs),
            ReduceOp::Sum => lhs.saturating_add(rhs),
        }
    }
}

/// 集體通訊介面
///
/// 傳輸層本身不在此 crate 的範圍內；實作只需提供 `all_gather`，
/// 歸約操作皆以它為基礎。
pub trait Communicator {
    /// 本進程編號
    fn rank(&self) -> usize;

    /// 參與進程數量
    fn size(&self) -> usize;

    /// 收集每個進程的位元組負載，依進程編號排序回傳
    fn all_gather(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>>;

    /// 逐元素歸約浮點陣列
    fn all_reduce_f64(&self, values: &[f64], op: ReduceOp) -> Result<Vec<f64>> {
        let payload = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let gathered = self.all_gather(payload)?;

        let mut reduced: Option<Vec<f64>> = None;
        for (rank, bytes) in gathered.iter().enumerate() {
            let contribution = decode_words(bytes, values.len(), rank)?
                .into_iter()
                .map(f64::from_le_bytes)
                .collect::<Vec<_>>();
            reduced = Some(match reduced {
                None => contribution,
                Some(acc) => acc
                    .into_iter()
                    .zip(contribution)
                    .map(|(a, b)| op.combine_f64(a, b))
                    .collect(),
            });
        }

        reduced.ok_or_else(|| ViewSyncError::Collective("沒有任何進程參與歸約".to_string()))
    }

    /// 歸約單一整數
    fn all_reduce_u64(&self, value: u64, op: ReduceOp) -> Result<u64> {
        let gathered = self.all_gather(value.to_le_bytes().to_vec())?;

        let mut reduced: Option<u64> = None;
        for (rank, bytes) in gathered.iter().enumerate() {
            let word = decode_words(bytes, 1, rank)?[0];
            let contribution = u64::from_le_bytes(word);
            reduced = Some(match reduced {
                None => contribution,
                Some(acc) => op.combine_u64(acc, contribution),
            });
        }

        reduced.ok_or_else(|| ViewSyncError::Collective("沒有任何進程參與歸約".to_string()))
    }

    /// 歸約布林值（通常搭配 `LogicalOr`）
    fn all_reduce_bool(&self, value: bool, op: ReduceOp) -> Result<bool> {
        Ok(self.all_reduce_u64(u64::from(value), op)? != 0)
    }
}

/// 把負載切成 8 位元組字組，長度不符時回報錯誤
fn decode_words(bytes: &[u8], expected: usize, rank: usize) -> Result<Vec<[u8; 8]>> {
    if bytes.len() != expected * 8 {
        return Err(ViewSyncError::Collective(format!(
            "進程 {} 的負載長度為 {} bytes，預期 {} bytes",
            rank,
            bytes.len(),
            expected * 8
        )));
    }

    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

/// 單進程通訊器：所有集體操作都是恆等運算
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        Ok(vec![payload])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Collecting,
    Draining,
}

#[derive(Debug)]
struct RendezvousState {
    phase: Phase,
    arrived: usize,
    departed: usize,
    slots: Vec<Option<Vec<u8>>>,
    result: Option<Arc<Vec<Vec<u8>>>>,
}

#[derive(Debug)]
struct Rendezvous {
    size: usize,
    state: Mutex<RendezvousState>,
    turnstile: Condvar,
}

/// 進程內多執行緒通訊器
///
/// 每個執行緒扮演一個進程（rank），用於在單一程式中模擬 SPMD 會話。
#[derive(Debug, Clone)]
pub struct ThreadCommunicator {
    rank: usize,
    shared: Arc<Rendezvous>,
}

impl ThreadCommunicator {
    /// 創建 `size` 個互相連接的通訊器，第 i 個的編號為 i
    pub fn group(size: usize) -> Vec<ThreadCommunicator> {
        assert!(size > 0, "通訊群組至少需要一個進程");

        let shared = Arc::new(Rendezvous {
            size,
            state: Mutex::new(RendezvousState {
                phase: Phase::Collecting,
                arrived: 0,
                departed: 0,
                slots: vec![None; size],
                result: None,
            }),
            turnstile: Condvar::new(),
        });

        (0..size)
            .map(|rank| ThreadCommunicator {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn all_gather(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        let shared = &self.shared;
        let mut state = shared.state.lock();

        // 等待上一輪全部離開
        while state.phase == Phase::Draining {
            shared.turnstile.wait(&mut state);
        }

        state.slots[self.rank] = Some(payload);
        state.arrived += 1;

        if state.arrived == shared.size {
            let collected = state
                .slots
                .iter_mut()
                .map(|slot| slot.take().unwrap_or_default())
                .collect();
            state.result = Some(Arc::new(collected));
            state.phase = Phase::Draining;
            shared.turnstile.notify_all();
        } else {
            while state.phase == Phase::Collecting {
                shared.turnstile.wait(&mut state);
            }
        }

        let result = state
            .result
            .clone()
            .ok_or_else(|| ViewSyncError::Collective("會合結果遺失".to_string()))?;

        state.departed += 1;
        if state.departed == shared.size {
            state.phase = Phase::Collecting;
            state.arrived = 0;
            state.departed = 0;
            state.result = None;
            shared.turnstile.notify_all();
        }

        Ok(result.as_ref().clone())
    }
}
