use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use super::stage::{ClusteredUnit, PipelineStage, StageContext, StageData, StagePayload};
use crate::clients::EmbeddingProvider;
use crate::clustering::{ClusterDecision, ClusterEngine};
use crate::observability::metrics::Metrics;
use crate::store::cluster_store::ClusterStore;
use crate::store::types::ClusterRunRecord;

/// 取り込んだスレッドの埋め込みを取得し、クラスタリングして永続化するステージ。
pub(crate) struct ClusterStage {
    provider: Arc<dyn EmbeddingProvider>,
    engine: Arc<ClusterEngine>,
    cluster_store: Arc<dyn ClusterStore>,
    metrics: Arc<Metrics>,
}

impl ClusterStage {
    pub(crate) fn new(
        provider: Arc<dyn EmbeddingProvider>,
        engine: Arc<ClusterEngine>,
        cluster_store: Arc<dyn ClusterStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            provider,
            engine,
            cluster_store,
            metrics,
        }
    }
}

#[async_trait]
impl PipelineStage for ClusterStage {
    fn name(&self) -> &'static str {
        "cluster"
    }

    fn running_status(&self) -> crate::store::types::RunStatus {
        crate::store::types::RunStatus::RunningCluster
    }

    fn completed_status(&self) -> crate::store::types::RunStatus {
        crate::store::types::RunStatus::ClusterDone
    }

    async fn execute(&self, ctx: &StageContext, input: StageData) -> Result<StageData> {
        if !input.is_success() {
            return Ok(input);
        }

        let StagePayload::Ingested(ingested) = input.payload else {
            bail!("cluster stage requires ingested thread ids");
        };

        let documents = self
            .provider
            .fetch_embedded(
                &ctx.unit_id,
                &ingested.thread_ids,
                ctx.input.start_date,
                ctx.input.end_date,
            )
            .await?;

        let started = Instant::now();
        let decision = self.engine.cluster(
            &documents,
            ctx.input.auto_optimize,
            ctx.input.fallback.to_cluster_params(),
        );
        self.metrics
            .clustering_duration
            .observe(started.elapsed().as_secs_f64());

        let outcome = match decision {
            ClusterDecision::NoData => {
                return Ok(StageData::warning(format!(
                    "no documents to cluster for unit {}",
                    ctx.unit_id
                )));
            }
            ClusterDecision::Completed(outcome) => outcome,
        };

        if outcome.degraded {
            self.metrics.clustering_degraded.inc();
        }
        if outcome.params.min_cluster_size == 1 {
            self.metrics.clustering_bypassed.inc();
        }

        let record = ClusterRunRecord {
            run_id: ctx.run_id,
            unit_id: ctx.unit_id.clone(),
            num_documents: outcome.num_documents,
            num_clusters: outcome.num_clusters,
            min_cluster_size: outcome.params.min_cluster_size,
            min_samples: outcome.params.min_samples,
            metric: outcome.params.metric.as_str().to_string(),
            auto_optimized: outcome.params.auto_optimized,
            core_docs: serde_json::to_value(&outcome.core_docs)
                .context("failed to serialize core documents")?,
            created_at: Utc::now(),
        };
        self.cluster_store.insert(&record).await?;

        info!(
            run_id = %ctx.run_id,
            unit_id = %ctx.unit_id,
            num_documents = outcome.num_documents,
            num_clusters = outcome.num_clusters,
            degraded = outcome.degraded,
            "cluster run persisted"
        );

        Ok(StageData::success(StagePayload::Clustered(ClusteredUnit {
            outcome,
        })))
    }
}
