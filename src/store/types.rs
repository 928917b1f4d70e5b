use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle of one pipeline run.
///
/// Progress is a pure function of this enumeration (see [`RunStatus::progress`]);
/// callers must never write progress independently of status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Received,
    Pending,
    RunningIngest,
    IngestDone,
    RunningCluster,
    ClusterDone,
    RunningAnalyze,
    Completed,
    Failure,
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Received => "RECEIVED",
            RunStatus::Pending => "PENDING",
            RunStatus::RunningIngest => "RUNNING_INGEST",
            RunStatus::IngestDone => "INGEST_DONE",
            RunStatus::RunningCluster => "RUNNING_CLUSTER",
            RunStatus::ClusterDone => "CLUSTER_DONE",
            RunStatus::RunningAnalyze => "RUNNING_ANALYZE",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failure => "FAILURE",
            RunStatus::Cancelled => "CANCELLED",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "RECEIVED" => Some(RunStatus::Received),
            "PENDING" => Some(RunStatus::Pending),
            "RUNNING_INGEST" => Some(RunStatus::RunningIngest),
            "INGEST_DONE" => Some(RunStatus::IngestDone),
            "RUNNING_CLUSTER" => Some(RunStatus::RunningCluster),
            "CLUSTER_DONE" => Some(RunStatus::ClusterDone),
            "RUNNING_ANALYZE" => Some(RunStatus::RunningAnalyze),
            "COMPLETED" => Some(RunStatus::Completed),
            "FAILURE" => Some(RunStatus::Failure),
            "CANCELLED" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    /// Fixed status-to-progress table. Total over the enumeration: terminal
    /// success maps to 100, terminal failure and cancellation to 0.
    #[must_use]
    pub fn progress(self) -> u8 {
        match self {
            RunStatus::Received | RunStatus::Pending => 0,
            RunStatus::RunningIngest => 10,
            RunStatus::IngestDone => 20,
            RunStatus::RunningCluster => 40,
            RunStatus::ClusterDone => 60,
            RunStatus::RunningAnalyze => 80,
            RunStatus::Completed => 100,
            RunStatus::Failure | RunStatus::Cancelled => 0,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failure | RunStatus::Cancelled
        )
    }
}

/// Durable record of one pipeline execution.
///
/// `completed_at` is set if and only if `status` is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub unit_id: String,
    pub requester_id: String,
    pub run_category: String,
    pub input: Value,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    /// Handle into the execution substrate; used only for cancellation.
    pub correlation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.status.progress()
    }
}

/// Persisted outcome of a clustering stage. Immutable after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRunRecord {
    pub run_id: Uuid,
    pub unit_id: String,
    pub num_documents: usize,
    pub num_clusters: usize,
    pub min_cluster_size: usize,
    pub min_samples: usize,
    pub metric: String,
    pub auto_optimized: bool,
    /// Representative documents, one per cluster, as stored JSON.
    pub core_docs: Value,
    pub created_at: DateTime<Utc>,
}

/// Fields required to create a run record; everything else starts empty.
#[derive(Debug, Clone)]
pub struct NewRunRecord {
    pub run_id: Uuid,
    pub unit_id: String,
    pub requester_id: String,
    pub run_category: String,
    pub input: Value,
}
