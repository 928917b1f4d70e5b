/// フォーラムAPIからユニット配下のスレッドIDを取得するクライアント。
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::debug;

/// フォーラムAPIの応答。
#[derive(Debug, Deserialize)]
struct ThreadIdsResponse {
    thread_ids: Vec<String>,
}

/// フォーラムAPIクライアントの設定。
#[derive(Debug, Clone)]
pub(crate) struct ForumConfig {
    pub(crate) base_url: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) total_timeout: Duration,
}

/// フォーラムAPIとの通信を管理するクライアント。
#[derive(Debug, Clone)]
pub(crate) struct ForumClient {
    client: Client,
    base_url: Url,
}

impl ForumClient {
    /// 新しいフォーラムAPIクライアントを作成する。
    ///
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返します。
    pub(crate) fn new(config: ForumConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .build()
            .context("failed to build forum HTTP client")?;

        let base_url = Url::parse(&config.base_url).context("invalid forum base URL")?;

        Ok(Self { client, base_url })
    }

    /// 指定ユニットのスレッドIDを日付窓で絞って取得する。
    ///
    /// # Errors
    /// HTTPリクエストまたはレスポンスのパースに失敗した場合はエラーを返します。
    pub(crate) async fn fetch_thread_ids(
        &self,
        unit_id: &str,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>> {
        let mut url = self
            .base_url
            .join(&format!("v1/units/{unit_id}/threads"))
            .context("failed to build threads URL")?;

        {
            let mut query_pairs = url.query_pairs_mut();
            if let Some(start) = start_date {
                query_pairs.append_pair("start_date", &start.to_rfc3339());
            }
            if let Some(end) = end_date {
                query_pairs.append_pair("end_date", &end.to_rfc3339());
            }
        }

        debug!(unit_id, url = %url, "fetching thread ids");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("forum threads request failed")?;

        let response = response
            .error_for_status()
            .context("forum returned error status")?;

        let body: ThreadIdsResponse = response
            .json()
            .await
            .context("failed to parse forum threads response")?;

        Ok(body.thread_ids)
    }
}
