/// Prometheusメトリクス定義。
use prometheus::{
    Counter, Gauge, Histogram, Registry, register_counter_with_registry,
    register_gauge_with_registry, register_histogram_with_registry,
};
use std::sync::Arc;

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    pub runs_started: Counter,
    pub runs_completed: Counter,
    pub runs_failed: Counter,
    pub runs_cancelled: Counter,
    pub clustering_bypassed: Counter,
    pub clustering_degraded: Counter,
    pub retries_total: Counter,

    // ヒストグラム
    pub stage_duration: Histogram,
    pub clustering_duration: Histogram,
    pub run_duration: Histogram,

    // ゲージ
    pub active_runs: Gauge,
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成する。
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            runs_started: register_counter_with_registry!(
                "insight_runs_started_total",
                "Total number of pipeline runs started",
                registry
            )?,
            runs_completed: register_counter_with_registry!(
                "insight_runs_completed_total",
                "Total number of pipeline runs completed",
                registry
            )?,
            runs_failed: register_counter_with_registry!(
                "insight_runs_failed_total",
                "Total number of pipeline runs failed",
                registry
            )?,
            runs_cancelled: register_counter_with_registry!(
                "insight_runs_cancelled_total",
                "Total number of pipeline runs cancelled",
                registry
            )?,
            clustering_bypassed: register_counter_with_registry!(
                "insight_clustering_bypassed_total",
                "Clustering runs bypassed due to too few documents",
                registry
            )?,
            clustering_degraded: register_counter_with_registry!(
                "insight_clustering_degraded_total",
                "Clustering runs degraded after a final fit failure",
                registry
            )?,
            retries_total: register_counter_with_registry!(
                "insight_retries_total",
                "Total number of stage retries",
                registry
            )?,
            stage_duration: register_histogram_with_registry!(
                "insight_stage_duration_seconds",
                "Duration of individual pipeline stages",
                registry
            )?,
            clustering_duration: register_histogram_with_registry!(
                "insight_clustering_duration_seconds",
                "Duration of the clustering engine including parameter search",
                registry
            )?,
            run_duration: register_histogram_with_registry!(
                "insight_run_duration_seconds",
                "End-to-end duration of pipeline runs",
                registry
            )?,
            active_runs: register_gauge_with_registry!(
                "insight_active_runs",
                "Number of currently executing pipeline runs",
                registry
            )?,
        })
    }
}
