use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

pub(crate) mod memory;
pub(crate) mod optimize;
pub mod solver;

use solver::ClusterSolver;

/// 埋め込み済みドキュメント。ベクトルストアから取得した形のまま保持する。
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedDocument {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
}

impl DistanceMetric {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
        }
    }
}

/// クラスタリングに実際に使用されたパラメータ。
///
/// `auto_optimized` はグリッドサーチが候補を選んだ場合のみ true になる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterParams {
    pub min_cluster_size: usize,
    pub min_samples: usize,
    pub metric: DistanceMetric,
    pub auto_optimized: bool,
}

impl ClusterParams {
    /// グリッドサーチが候補を見つけられなかった場合の安全なデフォルト。
    #[must_use]
    pub const fn safe_default() -> Self {
        Self {
            min_cluster_size: 5,
            min_samples: 5,
            metric: DistanceMetric::Cosine,
            auto_optimized: false,
        }
    }
}

/// クラスタの代表ドキュメント。所属確率が最大のメンバー。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreDocument {
    pub id: String,
    pub probability: f64,
    pub metadata: Value,
}

/// 1回のクラスタリング実行の結果。
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterOutcome {
    pub num_documents: usize,
    pub num_clusters: usize,
    /// どのクラスタにも割り当てられなかったドキュメント数。
    pub num_noise: usize,
    pub params: ClusterParams,
    pub core_docs: Vec<CoreDocument>,
    /// 最終フィットが失敗し、縮退出力に切り替えたかどうか。
    pub degraded: bool,
}

/// エンジンの判定結果。空入力は失敗ではなく警告として区別する。
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterDecision {
    /// 入力ドキュメントが0件。クラッシュせず警告として返す。
    NoData,
    Completed(ClusterOutcome),
}

/// エンジンの動作しきい値。
#[derive(Debug, Clone, Copy)]
pub struct ClusterSettings {
    /// この件数未満はクラスタリングを迂回し、1ドキュメント1クラスタにする
    pub bypass_threshold: usize,
    /// 縮退出力の最大コアドキュメント数
    pub degraded_cap: usize,
    /// この常駐メモリ(MB)を超えたらグリッドサーチを省略する
    pub memory_ceiling_mb: u64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            bypass_threshold: 5,
            degraded_cap: 10,
            memory_ceiling_mb: 1000,
        }
    }
}

/// 密度ベースクラスタリングエンジン。
///
/// ソルバーは [`ClusterSolver`] トレイト越しに注入されるため、テストでは
/// 失敗するソルバーや台本どおりのラベルを返すソルバーを差し込める。
pub struct ClusterEngine {
    solver: Arc<dyn ClusterSolver>,
    settings: ClusterSettings,
}

impl ClusterEngine {
    pub fn new(solver: Arc<dyn ClusterSolver>, settings: ClusterSettings) -> Self {
        Self { solver, settings }
    }

    /// ドキュメント群をクラスタリングする。
    ///
    /// どのような入力・ソルバー障害でもパニックせず、縮退した結果か
    /// [`ClusterDecision::NoData`] を返す。
    pub fn cluster(
        &self,
        documents: &[EmbeddedDocument],
        auto_optimize: bool,
        fallback_params: ClusterParams,
    ) -> ClusterDecision {
        if documents.is_empty() {
            warn!("no documents to cluster");
            return ClusterDecision::NoData;
        }

        if documents.len() < self.settings.bypass_threshold {
            info!(
                count = documents.len(),
                threshold = self.settings.bypass_threshold,
                "too few documents, bypassing clustering"
            );
            return ClusterDecision::Completed(self.bypass_outcome(documents));
        }

        let params = self.choose_params(documents, auto_optimize, fallback_params);

        // コサイン距離はL2正規化+ユークリッドフィットで実現する
        let data = match params.metric {
            DistanceMetric::Cosine => documents.iter().map(|d| normalize(&d.vector)).collect(),
            DistanceMetric::Euclidean => {
                documents.iter().map(|d| d.vector.clone()).collect::<Vec<_>>()
            }
        };

        let labels = match self
            .solver
            .fit(&data, params.min_cluster_size, params.min_samples)
        {
            Ok(labels) => labels,
            Err(err) => {
                warn!(error = %err, "final fit failed, degrading to singleton core docs");
                return ClusterDecision::Completed(self.degraded_outcome(documents, params));
            }
        };

        let (num_clusters, core_docs) = extract_core_docs(documents, &data, &labels);
        let num_noise = labels.iter().filter(|&&l| l < 0).count();

        info!(
            num_documents = documents.len(),
            num_clusters,
            num_noise,
            min_cluster_size = params.min_cluster_size,
            min_samples = params.min_samples,
            metric = params.metric.as_str(),
            auto_optimized = params.auto_optimized,
            "clustering completed"
        );

        ClusterDecision::Completed(ClusterOutcome {
            num_documents: documents.len(),
            num_clusters,
            num_noise,
            params,
            core_docs,
            degraded: false,
        })
    }

    /// しきい値未満の入力。1ドキュメント1クラスタで確率1.0。
    fn bypass_outcome(&self, documents: &[EmbeddedDocument]) -> ClusterOutcome {
        let core_docs = documents
            .iter()
            .map(|doc| CoreDocument {
                id: doc.id.clone(),
                probability: 1.0,
                metadata: doc.metadata.clone(),
            })
            .collect::<Vec<_>>();

        ClusterOutcome {
            num_documents: documents.len(),
            num_clusters: documents.len(),
            num_noise: 0,
            params: ClusterParams {
                min_cluster_size: 1,
                min_samples: documents.len(),
                metric: DistanceMetric::Cosine,
                auto_optimized: false,
            },
            core_docs,
            degraded: false,
        }
    }

    /// 最終フィット失敗時の縮退出力。先頭 min(cap, n) 件を単独クラスタ扱いにする。
    fn degraded_outcome(
        &self,
        documents: &[EmbeddedDocument],
        params: ClusterParams,
    ) -> ClusterOutcome {
        let take = documents.len().min(self.settings.degraded_cap);
        let core_docs = documents
            .iter()
            .take(take)
            .map(|doc| CoreDocument {
                id: doc.id.clone(),
                probability: 1.0,
                metadata: doc.metadata.clone(),
            })
            .collect::<Vec<_>>();

        ClusterOutcome {
            num_documents: documents.len(),
            num_clusters: take,
            num_noise: 0,
            params,
            core_docs,
            degraded: true,
        }
    }

    fn choose_params(
        &self,
        documents: &[EmbeddedDocument],
        auto_optimize: bool,
        fallback_params: ClusterParams,
    ) -> ClusterParams {
        if !auto_optimize {
            return fallback_params;
        }

        if let Some(rss_mb) = memory::rss_mb() {
            if rss_mb > self.settings.memory_ceiling_mb {
                warn!(
                    rss_mb,
                    ceiling_mb = self.settings.memory_ceiling_mb,
                    "memory pressure, skipping parameter search"
                );
                return ClusterParams::safe_default();
            }
        }

        let normalized: Vec<Vec<f32>> = documents.iter().map(|d| normalize(&d.vector)).collect();
        match optimize::grid_search(self.solver.as_ref(), &normalized) {
            Some(params) => params,
            None => {
                info!("no qualifying grid candidate, using safe default");
                ClusterParams::safe_default()
            }
        }
    }
}

/// L2正規化したコピーを返す。ゼロベクトルはそのまま返す。
pub(crate) fn normalize(vector: &[f32]) -> Vec<f32> {
    let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        vector.iter().map(|x| x / magnitude).collect()
    } else {
        vector.to_vec()
    }
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = f64::from(x - y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// 非ノイズラベルごとに重心距離から所属確率を導出し、確率最大の
/// メンバーを代表ドキュメントとして返す。重心に最も近いメンバーが1.0。
fn extract_core_docs(
    documents: &[EmbeddedDocument],
    data: &[Vec<f32>],
    labels: &[i32],
) -> (usize, Vec<CoreDocument>) {
    use std::collections::BTreeMap;

    let mut members: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (idx, &label) in labels.iter().enumerate() {
        if label >= 0 {
            members.entry(label).or_default().push(idx);
        }
    }

    let num_clusters = members.len();
    let mut core_docs = Vec::with_capacity(num_clusters);

    for indices in members.values() {
        let centroid = centroid_of(data, indices);
        let distances: Vec<f64> = indices
            .iter()
            .map(|&i| euclidean_distance(&data[i], &centroid))
            .collect();
        let min_distance = distances.iter().copied().fold(f64::INFINITY, f64::min);

        // 最近傍メンバーが確率1.0、遠ざかるほど単調に減衰する
        let mut best: Option<(usize, f64)> = None;
        for (&idx, &distance) in indices.iter().zip(distances.iter()) {
            let probability = 1.0 / (1.0 + (distance - min_distance));
            match best {
                Some((_, best_p)) if best_p >= probability => {}
                _ => best = Some((idx, probability)),
            }
        }

        if let Some((idx, probability)) = best {
            core_docs.push(CoreDocument {
                id: documents[idx].id.clone(),
                probability,
                metadata: documents[idx].metadata.clone(),
            });
        }
    }

    (num_clusters, core_docs)
}

fn centroid_of(data: &[Vec<f32>], indices: &[usize]) -> Vec<f32> {
    let dim = indices.first().map_or(0, |&i| data[i].len());
    let mut centroid = vec![0.0f32; dim];
    for &i in indices {
        for (slot, value) in centroid.iter_mut().zip(data[i].iter()) {
            *slot += value;
        }
    }
    #[allow(clippy::cast_precision_loss)]
    let count = indices.len() as f32;
    if count > 0.0 {
        for slot in &mut centroid {
            *slot /= count;
        }
    }
    centroid
}
