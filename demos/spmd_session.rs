//! SPMD 會話示例
//!
//! 以執行緒模擬多個協作進程。每個進程以不同的本地順序建立表示物件，
//! 經由協商取得一致的識別碼，並在每幀同步快取已滿旗標與邊界盒。

use std::thread;

use viewsync::{
    CacheConfig, Communicator, CompositeRepresentation, DataObject, DataRepresentation, ExecutionRequest,
    Representation, RepresentationAlgorithm, Result, Session, SharedRepresentation,
    ThreadCommunicator, View, ViewConfig,
};

const RANKS: usize = 4;

/// 每個進程負責的資料分塊
struct Partition {
    rank: usize,
    kb: u64,
}

impl RepresentationAlgorithm for Partition {
    fn request_data(&mut self, _input: Option<&DataObject>, request: &ExecutionRequest) -> Result<DataObject> {
        let x = self.rank as f64;
        let t = request.time.unwrap_or(0.0);
        Ok(DataObject::from_points(vec![[x, 0.0, t], [x + 1.0, 1.0, t]], request.time)
            .with_memory_kb(self.kb))
    }
}

fn run_rank(comm: ThreadCommunicator) -> Result<()> {
    let rank = comm.rank();
    let session = Session::new(Box::new(comm), &CacheConfig::new().with_cache_limit_kb(64))?;
    let mut view = View::new(&session, ViewConfig::new().with_use_cache(true));

    let keeper = session.cache_keeper();
    let mut batch: Vec<(String, SharedRepresentation)> = vec![
        (
            "outline".to_string(),
            DataRepresentation::shared(Partition { rank, kb: 1 }, keeper.clone()),
        ),
        (
            "surface".to_string(),
            DataRepresentation::shared(Partition { rank, kb: 8 * (rank as u64 + 1) }, keeper.clone()),
        ),
    ];
    batch.rotate_left(rank % 2);
    let children = batch.clone();
    view.add_representations_negotiated(batch)?;

    let composite = std::rc::Rc::new(std::cell::RefCell::new(CompositeRepresentation::new()));
    for (key, child) in children {
        composite.borrow_mut().add_child(key, child);
    }
    composite.borrow_mut().set_active("surface");
    view.add_representation(composite.clone());

    for step in 0..6 {
        let t = step as f64;
        view.set_view_time(t);
        view.set_cache_key(t);
        let summary = view.still_render()?;

        if rank == 0 {
            tracing::info!(
                "t = {}: 全域資料 {} KB，邊界盒 {:?}，快取已滿 {}",
                t,
                summary.total_data_size_kb,
                summary.bounds,
                summary.cache_full
            );
        }
    }

    tracing::info!(
        "rank {} 結束，本地快取 {} KB",
        rank,
        session.cache_keeper().cache_size_kb()
    );
    session.finalize();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_thread_names(true).init();

    println!("=== SPMD 會話示例（{} 個進程）===\n", RANKS);

    let handles: Vec<_> = ThreadCommunicator::group(RANKS)
        .into_iter()
        .enumerate()
        .map(|(rank, comm)| {
            thread::Builder::new()
                .name(format!("rank-{}", rank))
                .spawn(move || run_rank(comm))
        })
        .collect::<std::io::Result<_>>()?;

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("進程執行緒崩潰"))??;
    }

    Ok(())
}
