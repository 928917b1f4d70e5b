use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

pub(crate) mod analyze;
pub(crate) mod cluster;
pub(crate) mod executor;
pub(crate) mod ingest;
pub(crate) mod stage;

use executor::{CancelToken, RunExecutor};
use stage::{PipelineStage, RunInput, StageContext, StageData, StagePayload, StageStatus};

use crate::observability::metrics::Metrics;
use crate::store::cluster_store::ClusterStore;
use crate::store::run_store::RunStore;
use crate::store::types::{ClusterRunRecord, NewRunRecord, RunRecord, RunStatus};
use crate::util::error::is_retryable;
use crate::util::retry::RetryConfig;

/// オーケストレータ操作のエラー。APIレイヤーで404へ写像するため
/// NotFoundだけ型で区別する。
#[derive(Debug, thiserror::Error)]
pub(crate) enum PipelineError {
    #[error("run {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// 実行開始リクエスト。
#[derive(Debug, Clone)]
pub(crate) struct StartRun {
    pub(crate) unit_id: String,
    pub(crate) requester_id: String,
    pub(crate) run_category: String,
    pub(crate) input: Value,
}

/// ステージ連鎖を駆動するオーケストレータ。
///
/// 実行レコードはステージ境界ごとに1回だけ更新される。ステージの
/// 例外はここで捕捉され、再試行されるかerrorエンベロープに変換される。
pub(crate) struct PipelineOrchestrator {
    run_store: Arc<dyn RunStore>,
    cluster_store: Arc<dyn ClusterStore>,
    stages: Vec<Arc<dyn PipelineStage>>,
    executor: Arc<RunExecutor>,
    retry_config: RetryConfig,
    metrics: Arc<Metrics>,
}

impl PipelineOrchestrator {
    pub(crate) fn new(
        run_store: Arc<dyn RunStore>,
        cluster_store: Arc<dyn ClusterStore>,
        stages: Vec<Arc<dyn PipelineStage>>,
        executor: Arc<RunExecutor>,
        retry_config: RetryConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            run_store,
            cluster_store,
            stages,
            executor,
            retry_config,
            metrics,
        }
    }

    /// 新しい実行を開始する。レコードを作成し、実行基盤にチェーンを
    /// 投入して即座に戻る。以降の観測はポーリングで行う。
    pub(crate) async fn start(self: &Arc<Self>, request: StartRun) -> Result<RunRecord, PipelineError> {
        let input: RunInput = serde_json::from_value(request.input.clone())
            .context("invalid run input parameters")?;

        let run_id = Uuid::new_v4();
        let mut record = self
            .run_store
            .create(NewRunRecord {
                run_id,
                unit_id: request.unit_id.clone(),
                requester_id: request.requester_id,
                run_category: request.run_category,
                input: request.input,
            })
            .await?;

        self.run_store.transition(run_id, RunStatus::Pending).await?;
        record.status = RunStatus::Pending;

        let correlation_id = Uuid::new_v4();
        self.run_store
            .set_correlation_id(run_id, correlation_id)
            .await?;
        record.correlation_id = Some(correlation_id);

        self.metrics.runs_started.inc();
        info!(%run_id, %correlation_id, unit_id = %record.unit_id, "run accepted");

        let ctx = StageContext {
            run_id,
            unit_id: request.unit_id,
            input,
        };
        let this = Arc::clone(self);
        self.executor.submit(correlation_id, move |token| async move {
            this.drive(ctx, token).await;
        });

        Ok(record)
    }

    /// 実行レコードを取得する。ポーリング用。
    pub(crate) async fn get_status(&self, run_id: Uuid) -> Result<Option<RunRecord>, PipelineError> {
        Ok(self.run_store.get(run_id).await?)
    }

    /// 実行をキャンセルする。冪等で、繰り返し呼んでもエラーにならない。
    ///
    /// すでに終端状態の実行には何もしない。
    pub(crate) async fn cancel(&self, run_id: Uuid) -> Result<(), PipelineError> {
        let record = self
            .run_store
            .get(run_id)
            .await?
            .ok_or(PipelineError::NotFound(run_id))?;

        if record.status.is_terminal() {
            return Ok(());
        }

        if let Some(correlation_id) = record.correlation_id {
            self.executor.cancel(correlation_id);
        }

        self.run_store
            .transition(run_id, RunStatus::Cancelled)
            .await?;
        self.metrics.runs_cancelled.inc();
        info!(%run_id, "run cancelled");

        Ok(())
    }

    /// 実行に紐づくクラスタリング結果を取得する。
    pub(crate) async fn get_cluster_run(
        &self,
        run_id: Uuid,
    ) -> Result<Option<ClusterRunRecord>, PipelineError> {
        Ok(self.cluster_store.get_by_run(run_id).await?)
    }

    /// ユニット配下の実行を新しい順に列挙する。カテゴリで絞り込める。
    pub(crate) async fn list_runs_by_unit(
        &self,
        unit_id: &str,
        run_category: Option<&str>,
    ) -> Result<Vec<RunRecord>, PipelineError> {
        let runs = match run_category {
            Some(category) => {
                self.run_store
                    .list_by_unit_and_category(unit_id, category)
                    .await?
            }
            None => self.run_store.list_by_unit(unit_id).await?,
        };
        Ok(runs)
    }

    /// 依頼者の実行を新しい順に列挙する。
    pub(crate) async fn list_runs_by_requester(
        &self,
        requester_id: &str,
    ) -> Result<Vec<RunRecord>, PipelineError> {
        Ok(self.run_store.list_by_requester(requester_id).await?)
    }

    /// ステージ連鎖を最後まで駆動する。
    ///
    /// キャンセルフラグは各ステージ境界で確認する。どの経路でも
    /// レコードは終端状態で終わる。
    async fn drive(&self, ctx: StageContext, token: CancelToken) {
        // abortでタスクごと落とされてもDropでゲージと実行時間が戻る
        let _guard = RunGuard::start(Arc::clone(&self.metrics));

        let mut data = StageData::initial();
        let last_index = self.stages.len().saturating_sub(1);

        for (index, stage) in self.stages.iter().enumerate() {
            if token.is_cancelled() {
                self.finish_cancelled(ctx.run_id).await;
                return;
            }

            if let Err(err) = self
                .run_store
                .transition(ctx.run_id, stage.running_status())
                .await
            {
                error!(run_id = %ctx.run_id, stage = stage.name(), error = %err, "failed to record stage start");
            }

            let stage_started = Instant::now();
            let envelope = self.run_stage_with_retry(stage.as_ref(), &ctx, data).await;
            self.metrics
                .stage_duration
                .observe(stage_started.elapsed().as_secs_f64());

            match envelope.status {
                StageStatus::Error => {
                    let message = envelope
                        .message
                        .unwrap_or_else(|| format!("stage {} failed", stage.name()));
                    warn!(run_id = %ctx.run_id, stage = stage.name(), %message, "run failed");
                    if let Err(err) = self.run_store.mark_failed(ctx.run_id, &message).await {
                        error!(run_id = %ctx.run_id, error = %err, "failed to record failure");
                    }
                    self.metrics.runs_failed.inc();
                    return;
                }
                StageStatus::Warning => {
                    // 警告も実行を終端させる。非終端のまま残る実行を作らない
                    let message = envelope
                        .message
                        .unwrap_or_else(|| format!("stage {} reported a warning", stage.name()));
                    warn!(run_id = %ctx.run_id, stage = stage.name(), %message, "run ended with warning");
                    if let Err(err) = self.run_store.mark_failed(ctx.run_id, &message).await {
                        error!(run_id = %ctx.run_id, error = %err, "failed to record warning outcome");
                    }
                    self.metrics.runs_failed.inc();
                    return;
                }
                StageStatus::Success => {
                    if index == last_index {
                        let result = result_value(&envelope.payload);
                        if let Err(err) = self.run_store.mark_completed(ctx.run_id, result).await {
                            error!(run_id = %ctx.run_id, error = %err, "failed to record completion");
                        }
                        self.metrics.runs_completed.inc();
                        info!(run_id = %ctx.run_id, "run completed");
                    } else if let Err(err) = self
                        .run_store
                        .transition(ctx.run_id, stage.completed_status())
                        .await
                    {
                        error!(run_id = %ctx.run_id, stage = stage.name(), error = %err, "failed to record stage completion");
                    }
                    data = envelope;
                }
            }
        }
    }

    /// ステージを再試行ポリシーの下で実行する。
    ///
    /// 再試行可能と分類されたエラーだけがバックオフ付きで再試行され、
    /// それ以外と試行上限超過はerrorエンベロープになる。
    async fn run_stage_with_retry(
        &self,
        stage: &dyn PipelineStage,
        ctx: &StageContext,
        input: StageData,
    ) -> StageData {
        let mut attempt = 0;

        loop {
            match stage.execute(ctx, input.clone()).await {
                Ok(data) => return data,
                Err(err) => {
                    attempt += 1;

                    if is_retryable(&err) && self.retry_config.can_retry(attempt) {
                        let delay = self.retry_config.delay_for_attempt(attempt);
                        warn!(
                            run_id = %ctx.run_id,
                            stage = stage.name(),
                            attempt,
                            delay_ms = delay.as_millis(),
                            error = %err,
                            "stage failed, retrying after delay"
                        );
                        self.metrics.retries_total.inc();
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return StageData::error(format!("stage {} failed: {err:#}", stage.name()));
                }
            }
        }
    }

    async fn finish_cancelled(&self, run_id: Uuid) {
        if let Err(err) = self.run_store.transition(run_id, RunStatus::Cancelled).await {
            error!(%run_id, error = %err, "failed to record cancellation");
        }
        self.metrics.runs_cancelled.inc();
        info!(%run_id, "run stopped at stage boundary after cancellation");
    }
}

/// 実行中ゲージと実行時間の記録。
///
/// driveの先頭で生成し、正常終了・失敗・abortのいずれでもDropで解放する。
struct RunGuard {
    metrics: Arc<Metrics>,
    started: Instant,
}

impl RunGuard {
    fn start(metrics: Arc<Metrics>) -> Self {
        metrics.active_runs.inc();
        Self {
            metrics,
            started: Instant::now(),
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.metrics.active_runs.dec();
        self.metrics
            .run_duration
            .observe(self.started.elapsed().as_secs_f64());
    }
}

/// 最終ステージの成果物を保存可能なJSONへ落とす。
fn result_value(payload: &StagePayload) -> Value {
    match payload {
        StagePayload::Report(value) => value.clone(),
        _ => Value::Null,
    }
}
