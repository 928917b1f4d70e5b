use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::stage::{IngestedThreads, PipelineStage, StageContext, StageData, StagePayload};
use crate::clients::ForumClient;
use crate::store::types::RunStatus;

/// フォーラムAPIからユニット配下のスレッドIDを取り込むステージ。
pub(crate) struct ThreadIngestStage {
    forum: Arc<ForumClient>,
}

impl ThreadIngestStage {
    pub(crate) fn new(forum: Arc<ForumClient>) -> Self {
        Self { forum }
    }
}

#[async_trait]
impl PipelineStage for ThreadIngestStage {
    fn name(&self) -> &'static str {
        "ingest"
    }

    fn running_status(&self) -> RunStatus {
        RunStatus::RunningIngest
    }

    fn completed_status(&self) -> RunStatus {
        RunStatus::IngestDone
    }

    async fn execute(&self, ctx: &StageContext, input: StageData) -> Result<StageData> {
        if !input.is_success() {
            return Ok(input);
        }

        let thread_ids = self
            .forum
            .fetch_thread_ids(&ctx.unit_id, ctx.input.start_date, ctx.input.end_date)
            .await?;

        info!(
            run_id = %ctx.run_id,
            unit_id = %ctx.unit_id,
            count = thread_ids.len(),
            "ingested thread ids"
        );

        Ok(StageData::success(StagePayload::Ingested(
            IngestedThreads { thread_ids },
        )))
    }
}
