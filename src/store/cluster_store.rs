use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::types::ClusterRunRecord;

/// クラスタリング結果の永続化。
#[async_trait]
pub(crate) trait ClusterStore: Send + Sync {
    /// run_id をキーに挿入または上書きする。ステージの再実行で安全に呼べる。
    async fn insert(&self, record: &ClusterRunRecord) -> Result<()>;

    /// 所有するパイプライン実行IDで結果を引く。
    async fn get_by_run(&self, run_id: Uuid) -> Result<Option<ClusterRunRecord>>;
}

#[derive(Debug, Clone)]
pub(crate) struct PgClusterStore {
    pool: PgPool,
}

impl PgClusterStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &PgRow) -> Result<ClusterRunRecord> {
    let num_documents: i32 = row.try_get("num_documents")?;
    let num_clusters: i32 = row.try_get("num_clusters")?;
    let min_cluster_size: i32 = row.try_get("min_cluster_size")?;
    let min_samples: i32 = row.try_get("min_samples")?;

    Ok(ClusterRunRecord {
        run_id: row.try_get("run_id")?,
        unit_id: row.try_get("unit_id")?,
        num_documents: usize::try_from(num_documents).unwrap_or(0),
        num_clusters: usize::try_from(num_clusters).unwrap_or(0),
        min_cluster_size: usize::try_from(min_cluster_size).unwrap_or(0),
        min_samples: usize::try_from(min_samples).unwrap_or(0),
        metric: row.try_get("metric")?,
        auto_optimized: row.try_get("auto_optimized")?,
        core_docs: row.try_get("core_docs")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ClusterStore for PgClusterStore {
    async fn insert(&self, record: &ClusterRunRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO insight_cluster_runs
                (run_id, unit_id, num_documents, num_clusters,
                 min_cluster_size, min_samples, metric, auto_optimized, core_docs, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (run_id) DO UPDATE SET
                unit_id = EXCLUDED.unit_id,
                num_documents = EXCLUDED.num_documents,
                num_clusters = EXCLUDED.num_clusters,
                min_cluster_size = EXCLUDED.min_cluster_size,
                min_samples = EXCLUDED.min_samples,
                metric = EXCLUDED.metric,
                auto_optimized = EXCLUDED.auto_optimized,
                core_docs = EXCLUDED.core_docs,
                created_at = NOW()
            ",
        )
        .bind(record.run_id)
        .bind(&record.unit_id)
        .bind(i32::try_from(record.num_documents).unwrap_or(i32::MAX))
        .bind(i32::try_from(record.num_clusters).unwrap_or(i32::MAX))
        .bind(i32::try_from(record.min_cluster_size).unwrap_or(i32::MAX))
        .bind(i32::try_from(record.min_samples).unwrap_or(i32::MAX))
        .bind(&record.metric)
        .bind(record.auto_optimized)
        .bind(&record.core_docs)
        .execute(&self.pool)
        .await
        .context("failed to insert insight_cluster_runs record")?;

        Ok(())
    }

    async fn get_by_run(&self, run_id: Uuid) -> Result<Option<ClusterRunRecord>> {
        let row = sqlx::query(
            r"
            SELECT run_id, unit_id, num_documents, num_clusters,
                   min_cluster_size, min_samples, metric, auto_optimized, core_docs, created_at
            FROM insight_cluster_runs
            WHERE run_id = $1
            ",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch insight_cluster_runs record")?;

        row.as_ref().map(row_to_record).transpose()
    }
}
