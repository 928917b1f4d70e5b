use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::clustering::{ClusterOutcome, ClusterParams, DistanceMetric};
use crate::store::types::RunStatus;

/// ステージ境界のタグ付きエンベロープ。
///
/// 例外がそのまま境界を越えることはない。各ステージは入力のstatusを
/// 最初に確認し、errorなら入力を変更せずそのまま転送する。
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StageData {
    pub(crate) status: StageStatus,
    pub(crate) message: Option<String>,
    pub(crate) payload: StagePayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StageStatus {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StagePayload {
    Empty,
    Ingested(IngestedThreads),
    Clustered(ClusteredUnit),
    Report(Value),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IngestedThreads {
    pub(crate) thread_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ClusteredUnit {
    pub(crate) outcome: ClusterOutcome,
}

impl StageData {
    pub(crate) fn initial() -> Self {
        Self::success(StagePayload::Empty)
    }

    pub(crate) fn success(payload: StagePayload) -> Self {
        Self {
            status: StageStatus::Success,
            message: None,
            payload,
        }
    }

    pub(crate) fn warning(message: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Warning,
            message: Some(message.into()),
            payload: StagePayload::Empty,
        }
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Error,
            message: Some(message.into()),
            payload: StagePayload::Empty,
        }
    }

    pub(crate) fn is_success(&self) -> bool {
        self.status == StageStatus::Success
    }
}

/// クラスタリングの代替パラメータ。グリッドサーチを使わない実行で適用される。
#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct FallbackParams {
    pub(crate) min_cluster_size: usize,
    pub(crate) min_samples: usize,
    pub(crate) metric: DistanceMetric,
}

impl Default for FallbackParams {
    fn default() -> Self {
        Self {
            min_cluster_size: 5,
            min_samples: 5,
            metric: DistanceMetric::Cosine,
        }
    }
}

impl FallbackParams {
    pub(crate) fn to_cluster_params(self) -> ClusterParams {
        ClusterParams {
            min_cluster_size: self.min_cluster_size,
            min_samples: self.min_samples,
            metric: self.metric,
            auto_optimized: false,
        }
    }
}

/// 実行開始時に受け取る不透明なパラメータ入れ。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct RunInput {
    pub(crate) start_date: Option<DateTime<Utc>>,
    pub(crate) end_date: Option<DateTime<Utc>>,
    pub(crate) auto_optimize: bool,
    pub(crate) fallback: FallbackParams,
}

impl Default for RunInput {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            auto_optimize: true,
            fallback: FallbackParams::default(),
        }
    }
}

/// ステージに引き渡す実行コンテキスト。
#[derive(Debug, Clone)]
pub(crate) struct StageContext {
    pub(crate) run_id: Uuid,
    pub(crate) unit_id: String,
    pub(crate) input: RunInput,
}

/// パイプラインの1ステージ。
///
/// `execute` の `Err` はオーケストレータで捕捉され、再試行の対象に
/// なるか、errorエンベロープへ変換される。
#[async_trait]
pub(crate) trait PipelineStage: Send + Sync {
    fn name(&self) -> &'static str;

    /// このステージの実行中を表すステータス。
    fn running_status(&self) -> RunStatus;

    /// このステージの完了を表すステータス。
    fn completed_status(&self) -> RunStatus;

    async fn execute(&self, ctx: &StageContext, input: StageData) -> anyhow::Result<StageData>;
}
