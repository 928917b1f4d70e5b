//! クラスタリングパラメータのグリッドサーチ。
//!
//! スコア = クラスタ数 × (1 − ノイズ率)。クラスタ数が1以下の候補は
//! 失格（スコア −1）、フィットに失敗した候補はスキップする。

use tracing::debug;

use super::solver::ClusterSolver;
use super::{ClusterParams, DistanceMetric};

const GRID_MIN_CLUSTER_SIZES: [usize; 3] = [2, 5, 10];
const GRID_MIN_SAMPLES: [usize; 2] = [2, 5];

/// 正規化済みデータに対して全候補を評価し、最良のパラメータを返す。
///
/// どの候補も資格を得られなかった場合は `None`。
pub(crate) fn grid_search(solver: &dyn ClusterSolver, data: &[Vec<f32>]) -> Option<ClusterParams> {
    let mut best: Option<(f64, ClusterParams)> = None;

    for &min_cluster_size in &GRID_MIN_CLUSTER_SIZES {
        for &min_samples in &GRID_MIN_SAMPLES {
            if min_samples > min_cluster_size {
                continue;
            }

            let labels = match solver.fit(data, min_cluster_size, min_samples) {
                Ok(labels) => labels,
                Err(err) => {
                    debug!(
                        min_cluster_size,
                        min_samples,
                        error = %err,
                        "grid candidate failed, skipping"
                    );
                    continue;
                }
            };

            let score = score_labels(&labels);
            debug!(min_cluster_size, min_samples, score, "grid candidate scored");

            if score <= 0.0 {
                continue;
            }

            let candidate = ClusterParams {
                min_cluster_size,
                min_samples,
                metric: DistanceMetric::Cosine,
                auto_optimized: true,
            };

            match best {
                Some((best_score, _)) if best_score >= score => {}
                _ => best = Some((score, candidate)),
            }
        }
    }

    best.map(|(_, params)| params)
}

/// ラベル列を採点する。クラスタ数1以下は失格として −1。
fn score_labels(labels: &[i32]) -> f64 {
    if labels.is_empty() {
        return -1.0;
    }

    let cluster_count = labels
        .iter()
        .copied()
        .filter(|&l| l >= 0)
        .collect::<std::collections::BTreeSet<i32>>()
        .len();

    if cluster_count <= 1 {
        return -1.0;
    }

    let noise = labels.iter().filter(|&&l| l < 0).count();
    #[allow(clippy::cast_precision_loss)]
    let noise_fraction = noise as f64 / labels.len() as f64;

    #[allow(clippy::cast_precision_loss)]
    let clusters = cluster_count as f64;
    clusters * (1.0 - noise_fraction)
}
