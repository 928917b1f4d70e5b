use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::types::{NewRunRecord, RunRecord, RunStatus};

/// 実行レコードストア。
///
/// ステータスと進捗は常に同じUPDATEで書く（進捗はステータスの純関数）。
/// 楽観ロックは行わない。後勝ちで上書きされる。
#[async_trait]
pub(crate) trait RunStore: Send + Sync {
    /// ストアへの到達性を確認する。readinessプローブで使う。
    async fn ping(&self) -> Result<()>;

    /// 新しい実行レコードをRECEIVEDで作成する。
    async fn create(&self, new: NewRunRecord) -> Result<RunRecord>;

    async fn get(&self, run_id: Uuid) -> Result<Option<RunRecord>>;

    /// ステータスを遷移させる。進捗は導出値を同時に書き、
    /// 終端ステータスなら completed_at も同じUPDATEで設定する。
    async fn transition(&self, run_id: Uuid, status: RunStatus) -> Result<()>;

    /// FAILUREへ遷移させ、人間可読なメッセージを記録する。
    async fn mark_failed(&self, run_id: Uuid, message: &str) -> Result<()>;

    /// COMPLETEDへ遷移させ、最終ステージの成果物を記録する。
    async fn mark_completed(&self, run_id: Uuid, result: Value) -> Result<()>;

    /// 実行基盤のハンドルを関連付ける。キャンセルでのみ使う。
    async fn set_correlation_id(&self, run_id: Uuid, correlation_id: Uuid) -> Result<()>;

    async fn list_by_unit(&self, unit_id: &str) -> Result<Vec<RunRecord>>;

    async fn list_by_requester(&self, requester_id: &str) -> Result<Vec<RunRecord>>;

    async fn list_by_unit_and_category(
        &self,
        unit_id: &str,
        run_category: &str,
    ) -> Result<Vec<RunRecord>>;
}

#[derive(Debug, Clone)]
pub(crate) struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r"
    run_id, status, unit_id, requester_id, run_category,
    input, result, error_message, correlation_id, created_at, completed_at
";

fn row_to_record(row: &PgRow) -> Result<RunRecord> {
    let status_str: String = row.try_get("status").context("failed to read status")?;
    let status = RunStatus::from_str(&status_str)
        .with_context(|| format!("unknown run status in storage: {status_str}"))?;

    Ok(RunRecord {
        run_id: row.try_get("run_id")?,
        status,
        unit_id: row.try_get("unit_id")?,
        requester_id: row.try_get("requester_id")?,
        run_category: row.try_get("run_category")?,
        input: row.try_get("input")?,
        result: row.try_get("result")?,
        error_message: row.try_get("error_message")?,
        correlation_id: row.try_get("correlation_id")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("run store ping failed")?;
        Ok(())
    }

    async fn create(&self, new: NewRunRecord) -> Result<RunRecord> {
        let status = RunStatus::Received;
        let query = format!(
            r"
            INSERT INTO insight_runs
                (run_id, status, progress, unit_id, requester_id, run_category, input, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            RETURNING {SELECT_COLUMNS}
            "
        );

        let row = sqlx::query(&query)
            .bind(new.run_id)
            .bind(status.as_str())
            .bind(i16::from(status.progress()))
            .bind(&new.unit_id)
            .bind(&new.requester_id)
            .bind(&new.run_category)
            .bind(&new.input)
            .fetch_one(&self.pool)
            .await
            .context("failed to insert insight_runs record")?;

        row_to_record(&row)
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM insight_runs WHERE run_id = $1");
        let row = sqlx::query(&query)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch insight_runs record")?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn transition(&self, run_id: Uuid, status: RunStatus) -> Result<()> {
        // 終端遷移だけ completed_at を埋める。1文のUPDATEで原子的に行う
        sqlx::query(
            r"
            UPDATE insight_runs
            SET status = $2,
                progress = $3,
                completed_at = CASE WHEN $4 THEN NOW() ELSE completed_at END
            WHERE run_id = $1
            ",
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(i16::from(status.progress()))
        .bind(status.is_terminal())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to transition run {run_id} to {}", status.as_str()))?;

        Ok(())
    }

    async fn mark_failed(&self, run_id: Uuid, message: &str) -> Result<()> {
        let status = RunStatus::Failure;
        sqlx::query(
            r"
            UPDATE insight_runs
            SET status = $2, progress = $3, error_message = $4, completed_at = NOW()
            WHERE run_id = $1
            ",
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(i16::from(status.progress()))
        .bind(message)
        .execute(&self.pool)
        .await
        .context("failed to mark run as failed")?;

        Ok(())
    }

    async fn mark_completed(&self, run_id: Uuid, result: Value) -> Result<()> {
        let status = RunStatus::Completed;
        sqlx::query(
            r"
            UPDATE insight_runs
            SET status = $2, progress = $3, result = $4, completed_at = NOW()
            WHERE run_id = $1
            ",
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(i16::from(status.progress()))
        .bind(&result)
        .execute(&self.pool)
        .await
        .context("failed to mark run as completed")?;

        Ok(())
    }

    async fn set_correlation_id(&self, run_id: Uuid, correlation_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE insight_runs SET correlation_id = $2 WHERE run_id = $1")
            .bind(run_id)
            .bind(correlation_id)
            .execute(&self.pool)
            .await
            .context("failed to associate correlation id")?;

        Ok(())
    }

    async fn list_by_unit(&self, unit_id: &str) -> Result<Vec<RunRecord>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM insight_runs WHERE unit_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query)
            .bind(unit_id)
            .fetch_all(&self.pool)
            .await
            .context("failed to list runs by unit")?;

        rows.iter().map(row_to_record).collect()
    }

    async fn list_by_requester(&self, requester_id: &str) -> Result<Vec<RunRecord>> {
        let query = format!(
            r"
            SELECT {SELECT_COLUMNS} FROM insight_runs
            WHERE requester_id = $1
            ORDER BY created_at DESC
            "
        );
        let rows = sqlx::query(&query)
            .bind(requester_id)
            .fetch_all(&self.pool)
            .await
            .context("failed to list runs by requester")?;

        rows.iter().map(row_to_record).collect()
    }

    async fn list_by_unit_and_category(
        &self,
        unit_id: &str,
        run_category: &str,
    ) -> Result<Vec<RunRecord>> {
        let query = format!(
            r"
            SELECT {SELECT_COLUMNS} FROM insight_runs
            WHERE unit_id = $1 AND run_category = $2
            ORDER BY created_at DESC
            "
        );
        let rows = sqlx::query(&query)
            .bind(unit_id)
            .bind(run_category)
            .fetch_all(&self.pool)
            .await
            .context("failed to list runs by unit and category")?;

        rows.iter().map(row_to_record).collect()
    }
}
