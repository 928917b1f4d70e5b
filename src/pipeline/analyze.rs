use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tracing::info;

use super::stage::{PipelineStage, StageContext, StageData, StagePayload};
use crate::clients::ReportClient;
use crate::store::types::RunStatus;

/// 代表ドキュメントをレポート生成サービスへ引き渡すステージ。
pub(crate) struct AnalyzeStage {
    report: Arc<ReportClient>,
}

impl AnalyzeStage {
    pub(crate) fn new(report: Arc<ReportClient>) -> Self {
        Self { report }
    }
}

#[async_trait]
impl PipelineStage for AnalyzeStage {
    fn name(&self) -> &'static str {
        "analyze"
    }

    fn running_status(&self) -> RunStatus {
        RunStatus::RunningAnalyze
    }

    fn completed_status(&self) -> RunStatus {
        RunStatus::Completed
    }

    async fn execute(&self, ctx: &StageContext, input: StageData) -> Result<StageData> {
        if !input.is_success() {
            return Ok(input);
        }

        let StagePayload::Clustered(clustered) = input.payload else {
            bail!("analyze stage requires clustering output");
        };

        let payload = self
            .report
            .generate_report(&ctx.unit_id, &clustered.outcome.core_docs)
            .await?;

        info!(
            run_id = %ctx.run_id,
            unit_id = %ctx.unit_id,
            core_docs = clustered.outcome.core_docs.len(),
            "report generated"
        );

        Ok(StageData::success(StagePayload::Report(payload)))
    }
}
