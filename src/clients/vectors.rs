/// 埋め込みストアからベクトルとメタデータを取得するクライアント。
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::clustering::EmbeddedDocument;

/// 埋め込み取得の境界。クラスタリングステージはこの背後しか見ない。
#[async_trait]
pub(crate) trait EmbeddingProvider: Send + Sync {
    /// 名前空間とID集合に対応する埋め込み済みドキュメントを返す。
    async fn fetch_embedded(
        &self,
        namespace: &str,
        ids: &[String],
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<Vec<EmbeddedDocument>>;
}

#[derive(Debug, Serialize)]
struct VectorQuery<'a> {
    namespace: &'a str,
    ids: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct VectorDocument {
    id: String,
    vector: Vec<f32>,
    #[serde(default)]
    metadata: Value,
}

#[derive(Debug, Deserialize)]
struct VectorQueryResponse {
    documents: Vec<VectorDocument>,
}

/// 埋め込みストアクライアントの設定。
#[derive(Debug, Clone)]
pub(crate) struct VectorStoreConfig {
    pub(crate) base_url: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) total_timeout: Duration,
}

/// 埋め込みストアとの通信を管理するクライアント。
#[derive(Debug, Clone)]
pub(crate) struct VectorStoreClient {
    client: Client,
    base_url: Url,
}

impl VectorStoreClient {
    /// 新しい埋め込みストアクライアントを作成する。
    ///
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返します。
    pub(crate) fn new(config: VectorStoreConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .build()
            .context("failed to build vector store HTTP client")?;

        let base_url = Url::parse(&config.base_url).context("invalid vector store base URL")?;

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl EmbeddingProvider for VectorStoreClient {
    async fn fetch_embedded(
        &self,
        namespace: &str,
        ids: &[String],
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<Vec<EmbeddedDocument>> {
        let url = self
            .base_url
            .join("v1/vectors/query")
            .context("failed to build vector query URL")?;

        debug!(namespace, ids = ids.len(), "querying vector store");

        let response = self
            .client
            .post(url)
            .json(&VectorQuery {
                namespace,
                ids,
                start_date,
                end_date,
            })
            .send()
            .await
            .context("vector store query request failed")?;

        let response = response
            .error_for_status()
            .context("vector store returned error status")?;

        let body: VectorQueryResponse = response
            .json()
            .await
            .context("failed to parse vector store response")?;

        Ok(body
            .documents
            .into_iter()
            .map(|doc| EmbeddedDocument {
                id: doc.id,
                vector: doc.vector,
                metadata: doc.metadata,
            })
            .collect())
    }
}
