//! 実HDBSCANソルバーを通したクラスタリングエンジンの結合テスト。

use std::sync::Arc;

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::json;

use unit_insight_worker::clustering::{
    ClusterDecision, ClusterEngine, ClusterParams, ClusterSettings, DistanceMetric,
    EmbeddedDocument, solver::HdbscanSolver,
};

fn engine() -> ClusterEngine {
    ClusterEngine::new(Arc::new(HdbscanSolver), ClusterSettings::default())
}

fn doc(id: &str, vector: Vec<f32>) -> EmbeddedDocument {
    EmbeddedDocument {
        id: id.to_string(),
        vector,
        metadata: json!({ "thread": id }),
    }
}

/// 4つの離れた中心の周りに密なブロブを生成する。
fn blob_documents(per_blob: usize, seed: u64) -> Vec<EmbeddedDocument> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut centers = vec![vec![0.0_f32; 8]; 4];
    for (i, center) in centers.iter_mut().enumerate() {
        center[i * 2] = 10.0;
    }

    let mut documents = Vec::new();
    for (blob, center) in centers.iter().enumerate() {
        for n in 0..per_blob {
            let vector = center
                .iter()
                .map(|c| c + rng.random_range(-0.1_f32..0.1_f32))
                .collect();
            documents.push(doc(&format!("b{blob}-d{n}"), vector));
        }
    }
    documents
}

#[test]
fn empty_input_yields_no_data() {
    let decision = engine().cluster(&[], true, ClusterParams::safe_default());
    assert_eq!(decision, ClusterDecision::NoData);
}

#[test]
fn tiny_input_bypasses_clustering() {
    let documents = vec![
        doc("a", vec![1.0, 0.0, 0.0]),
        doc("b", vec![0.0, 1.0, 0.0]),
        doc("c", vec![0.0, 0.0, 1.0]),
    ];

    let ClusterDecision::Completed(outcome) =
        engine().cluster(&documents, true, ClusterParams::safe_default())
    else {
        panic!("expected a completed outcome");
    };

    assert_eq!(outcome.num_documents, 3);
    assert_eq!(outcome.num_clusters, 3);
    assert!(!outcome.degraded);
    assert_eq!(outcome.params.min_cluster_size, 1);
    assert_eq!(outcome.params.min_samples, 3);
    assert_eq!(outcome.params.metric, DistanceMetric::Cosine);
    assert!(!outcome.params.auto_optimized);
    for core in &outcome.core_docs {
        assert!((core.probability - 1.0).abs() < f64::EPSILON);
    }
}

#[test]
fn well_separated_blobs_form_multiple_clusters() {
    let documents = blob_documents(13, 42);
    assert_eq!(documents.len(), 52);

    let ClusterDecision::Completed(outcome) =
        engine().cluster(&documents, true, ClusterParams::safe_default())
    else {
        panic!("expected a completed outcome");
    };

    assert_eq!(outcome.num_documents, 52);
    assert!(!outcome.degraded);
    assert!(
        outcome.num_clusters >= 2,
        "expected separated blobs to form clusters, got {}",
        outcome.num_clusters
    );
    assert_eq!(outcome.core_docs.len(), outcome.num_clusters);
    assert!(
        outcome.num_noise * 2 < outcome.num_documents,
        "noise fraction too high: {} of {}",
        outcome.num_noise,
        outcome.num_documents
    );

    // 代表ドキュメントはクラスタ内で確率最大、かつ (0, 1] に収まる
    for core in &outcome.core_docs {
        assert!(core.probability > 0.0 && core.probability <= 1.0);
        assert_eq!(core.metadata["thread"], core.id.as_str());
    }
}

#[test]
fn manual_params_skip_grid_search() {
    let documents = blob_documents(13, 7);
    let fallback = ClusterParams {
        min_cluster_size: 5,
        min_samples: 2,
        metric: DistanceMetric::Cosine,
        auto_optimized: false,
    };

    let ClusterDecision::Completed(outcome) = engine().cluster(&documents, false, fallback) else {
        panic!("expected a completed outcome");
    };

    assert_eq!(outcome.params.min_cluster_size, 5);
    assert_eq!(outcome.params.min_samples, 2);
    assert!(!outcome.params.auto_optimized);
}
