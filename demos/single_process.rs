//! 單進程動畫播放示例
//!
//! 第一輪播放時每個時間步真正執行一次並存入快取，第二輪全部由快取提供。

use viewsync::{
    CacheConfig, DataObject, DataRepresentation, ExecutionRequest, Representation,
    RepresentationAlgorithm, Result, Session, View, ViewConfig,
};

/// 依時間擺動的點雲
struct Oscillator {
    points: usize,
}

impl RepresentationAlgorithm for Oscillator {
    fn request_data(&mut self, _input: Option<&DataObject>, request: &ExecutionRequest) -> Result<DataObject> {
        let t = request.time.unwrap_or(0.0);
        let points = (0..self.points)
            .map(|i| {
                let x = i as f64;
                [x, (x + t).sin(), t]
            })
            .collect();
        Ok(DataObject::from_points(points, request.time))
    }

    fn prepare_lod(&mut self, data: &DataObject) -> Option<DataObject> {
        let decimated = data.points.iter().step_by(4).copied().collect();
        Some(DataObject::from_points(decimated, data.time))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== 單進程動畫播放示例 ===\n");

    let session = Session::serial(&CacheConfig::new().with_cache_limit_kb(1024))?;
    let mut view = View::new(&session, ViewConfig::new().with_use_cache(true));
    let repr = DataRepresentation::shared(Oscillator { points: 2000 }, session.cache_keeper());
    view.add_representation(repr.clone());

    let timesteps = [0.0, 0.5, 1.0, 1.5];
    for round in 1..=2 {
        println!("第 {} 輪播放:", round);
        for &t in &timesteps {
            view.set_view_time(t);
            view.set_cache_key(t);
            let summary = view.still_render()?;
            println!(
                "  t = {:.1}: 執行 {} 個，資料 {} KB，快取 {} KB",
                t,
                summary.executed_locally,
                summary.total_data_size_kb,
                session.cache_keeper().cache_size_kb()
            );
        }
    }

    println!("\n真正執行次數: {}", repr.borrow().execution_count());

    // 修改參數使所有時間步重新執行
    repr.borrow_mut().mark_modified();
    println!("修改後需要更新: {}", repr.borrow().needs_update());

    session.finalize();
    Ok(())
}
