use anyhow::Result;
use hdbscan::{DistanceMetric as SolverMetric, Hdbscan, HdbscanHyperParams};

/// 密度ベースクラスタリングのソルバー境界。
///
/// ラベルは0始まりのクラスタ番号、-1はノイズ。テストでは失敗する実装や
/// 固定ラベルを返す実装を注入する。
pub trait ClusterSolver: Send + Sync {
    fn fit(
        &self,
        data: &[Vec<f32>],
        min_cluster_size: usize,
        min_samples: usize,
    ) -> Result<Vec<i32>>;
}

/// HDBSCANによる実装。入力は呼び出し側で正規化済みとする。
pub struct HdbscanSolver;

impl ClusterSolver for HdbscanSolver {
    fn fit(
        &self,
        data: &[Vec<f32>],
        min_cluster_size: usize,
        min_samples: usize,
    ) -> Result<Vec<i32>> {
        let params = HdbscanHyperParams::builder()
            .min_cluster_size(min_cluster_size)
            .min_samples(min_samples)
            .dist_metric(SolverMetric::Euclidean)
            .build();

        let data = data.to_vec();
        let clusterer = Hdbscan::new(&data, params);
        let labels = clusterer
            .cluster()
            .map_err(|err| anyhow::anyhow!("hdbscan fit failed: {err:?}"))?;

        Ok(labels)
    }
}
