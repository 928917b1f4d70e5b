//! テスト用のインメモリストア実装。

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::cluster_store::ClusterStore;
use super::run_store::RunStore;
use super::types::{ClusterRunRecord, NewRunRecord, RunRecord, RunStatus};

#[derive(Default)]
pub(crate) struct InMemoryRunStore {
    records: Mutex<HashMap<Uuid, RunRecord>>,
}

impl InMemoryRunStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, run_id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut RunRecord),
    {
        let mut records = self.records.lock().expect("run store mutex poisoned");
        let record = records
            .get_mut(&run_id)
            .with_context(|| format!("run {run_id} not found"))?;
        apply(record);
        Ok(())
    }

    /// 現在のステータスを覗く。アサーション用。
    pub(crate) fn status_of(&self, run_id: Uuid) -> Option<RunStatus> {
        self.records
            .lock()
            .expect("run store mutex poisoned")
            .get(&run_id)
            .map(|r| r.status)
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create(&self, new: NewRunRecord) -> Result<RunRecord> {
        let record = RunRecord {
            run_id: new.run_id,
            status: RunStatus::Received,
            unit_id: new.unit_id,
            requester_id: new.requester_id,
            run_category: new.run_category,
            input: new.input,
            result: None,
            error_message: None,
            correlation_id: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.records
            .lock()
            .expect("run store mutex poisoned")
            .insert(record.run_id, record.clone());
        Ok(record)
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        Ok(self
            .records
            .lock()
            .expect("run store mutex poisoned")
            .get(&run_id)
            .cloned())
    }

    async fn transition(&self, run_id: Uuid, status: RunStatus) -> Result<()> {
        self.update(run_id, |record| {
            record.status = status;
            if status.is_terminal() && record.completed_at.is_none() {
                record.completed_at = Some(Utc::now());
            }
        })
    }

    async fn mark_failed(&self, run_id: Uuid, message: &str) -> Result<()> {
        self.update(run_id, |record| {
            record.status = RunStatus::Failure;
            record.error_message = Some(message.to_string());
            record.completed_at = Some(Utc::now());
        })
    }

    async fn mark_completed(&self, run_id: Uuid, result: Value) -> Result<()> {
        self.update(run_id, |record| {
            record.status = RunStatus::Completed;
            record.result = Some(result);
            record.completed_at = Some(Utc::now());
        })
    }

    async fn set_correlation_id(&self, run_id: Uuid, correlation_id: Uuid) -> Result<()> {
        self.update(run_id, |record| {
            record.correlation_id = Some(correlation_id);
        })
    }

    async fn list_by_unit(&self, unit_id: &str) -> Result<Vec<RunRecord>> {
        let records = self.records.lock().expect("run store mutex poisoned");
        let mut out: Vec<RunRecord> = records
            .values()
            .filter(|r| r.unit_id == unit_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_by_requester(&self, requester_id: &str) -> Result<Vec<RunRecord>> {
        let records = self.records.lock().expect("run store mutex poisoned");
        let mut out: Vec<RunRecord> = records
            .values()
            .filter(|r| r.requester_id == requester_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_by_unit_and_category(
        &self,
        unit_id: &str,
        run_category: &str,
    ) -> Result<Vec<RunRecord>> {
        let records = self.records.lock().expect("run store mutex poisoned");
        let mut out: Vec<RunRecord> = records
            .values()
            .filter(|r| r.unit_id == unit_id && r.run_category == run_category)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}

#[derive(Default)]
pub(crate) struct InMemoryClusterStore {
    records: Mutex<HashMap<Uuid, ClusterRunRecord>>,
}

impl InMemoryClusterStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.records
            .lock()
            .expect("cluster store mutex poisoned")
            .len()
    }
}

#[async_trait]
impl ClusterStore for InMemoryClusterStore {
    async fn insert(&self, record: &ClusterRunRecord) -> Result<()> {
        self.records
            .lock()
            .expect("cluster store mutex poisoned")
            .insert(record.run_id, record.clone());
        Ok(())
    }

    async fn get_by_run(&self, run_id: Uuid) -> Result<Option<ClusterRunRecord>> {
        Ok(self
            .records
            .lock()
            .expect("cluster store mutex poisoned")
            .get(&run_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn new_run(run_id: Uuid) -> NewRunRecord {
        NewRunRecord {
            run_id,
            unit_id: "unit-1".to_string(),
            requester_id: "user-1".to_string(),
            run_category: "unit_insight".to_string(),
            input: json!({}),
        }
    }

    #[tokio::test]
    async fn create_starts_in_received() {
        let store = InMemoryRunStore::new();
        let run_id = Uuid::new_v4();
        let record = store.create(new_run(run_id)).await.unwrap();

        assert_eq!(record.status, RunStatus::Received);
        assert_eq!(record.progress(), 0);
        assert!(record.completed_at.is_none());
    }

    #[tokio::test]
    async fn terminal_transition_sets_completed_at() {
        let store = InMemoryRunStore::new();
        let run_id = Uuid::new_v4();
        store.create(new_run(run_id)).await.unwrap();

        store
            .transition(run_id, RunStatus::RunningIngest)
            .await
            .unwrap();
        let record = store.get(run_id).await.unwrap().unwrap();
        assert!(record.completed_at.is_none());

        store
            .mark_failed(run_id, "upstream unavailable")
            .await
            .unwrap();
        let record = store.get(run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Failure);
        assert_eq!(record.progress(), 0);
        assert!(record.completed_at.is_some());
        assert_eq!(
            record.error_message.as_deref(),
            Some("upstream unavailable")
        );
    }

    #[tokio::test]
    async fn list_by_unit_filters_records() {
        let store = InMemoryRunStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.create(new_run(a)).await.unwrap();
        let mut other = new_run(b);
        other.unit_id = "unit-2".to_string();
        store.create(other).await.unwrap();

        let runs = store.list_by_unit("unit-1").await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, a);
    }

    #[tokio::test]
    async fn list_by_requester_filters_records() {
        let store = InMemoryRunStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.create(new_run(a)).await.unwrap();
        let mut other = new_run(b);
        other.requester_id = "user-2".to_string();
        store.create(other).await.unwrap();

        let runs = store.list_by_requester("user-1").await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, a);
    }
}
