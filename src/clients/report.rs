/// レポート生成サービスへコアドキュメントを渡す薄いアダプタ。
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::clustering::CoreDocument;

#[derive(Debug, Serialize)]
struct ReportRequest<'a> {
    unit_id: &'a str,
    core_documents: &'a [CoreDocument],
}

/// レポート生成クライアントの設定。
#[derive(Debug, Clone)]
pub(crate) struct ReportConfig {
    pub(crate) base_url: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) total_timeout: Duration,
}

#[derive(Debug, Clone)]
pub(crate) struct ReportClient {
    client: Client,
    base_url: Url,
}

impl ReportClient {
    /// 新しいレポート生成クライアントを作成する。
    ///
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返します。
    pub(crate) fn new(config: ReportConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .build()
            .context("failed to build report HTTP client")?;

        let base_url = Url::parse(&config.base_url).context("invalid report base URL")?;

        Ok(Self { client, base_url })
    }

    /// コアドキュメントからレポートを生成させ、本文ペイロードを返す。
    ///
    /// # Errors
    /// HTTPリクエストまたはレスポンスのパースに失敗した場合はエラーを返します。
    pub(crate) async fn generate_report(
        &self,
        unit_id: &str,
        core_documents: &[CoreDocument],
    ) -> Result<Value> {
        let url = self
            .base_url
            .join("v1/reports")
            .context("failed to build reports URL")?;

        debug!(unit_id, docs = core_documents.len(), "requesting report");

        let response = self
            .client
            .post(url)
            .json(&ReportRequest {
                unit_id,
                core_documents,
            })
            .send()
            .await
            .context("report request failed")?;

        let response = response
            .error_for_status()
            .context("report service returned error status")?;

        let payload: Value = response
            .json()
            .await
            .context("failed to parse report response")?;

        Ok(payload)
    }
}
