use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// 協調的キャンセルのためのフラグ。ステージ境界ごとに確認される。
#[derive(Debug, Clone, Default)]
pub(crate) struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct RunHandle {
    token: CancelToken,
    join: JoinHandle<()>,
}

/// 実行基盤。パイプライン実行を相関IDで管理するtokioタスクとして走らせる。
#[derive(Default)]
pub(crate) struct RunExecutor {
    running: Mutex<HashMap<Uuid, RunHandle>>,
}

impl RunExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 実行チェーンをタスクとして起動し、相関IDに紐付ける。
    ///
    /// タスク完了時にはハンドル表から自動的に取り除かれる。
    pub(crate) fn submit<F, Fut>(self: &Arc<Self>, correlation_id: Uuid, make: F) -> CancelToken
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancelToken::new();
        let future = make(token.clone());

        // 起動直後に完了するタスクが登録前にremoveを呼ばないよう、
        // ロックを保持したままspawnして登録する
        let mut running = self.running.lock().expect("executor mutex poisoned");
        let executor = Arc::clone(self);
        let join = tokio::spawn(async move {
            future.await;
            executor.remove(correlation_id);
        });
        running.insert(
            correlation_id,
            RunHandle {
                token: token.clone(),
                join,
            },
        );

        token
    }

    /// ベストエフォートでキャンセルする。フラグを立てたうえでタスクを中断する。
    ///
    /// 相関IDが未知（すでに完了済みなど）の場合は false。
    pub(crate) fn cancel(&self, correlation_id: Uuid) -> bool {
        let handle = self
            .running
            .lock()
            .expect("executor mutex poisoned")
            .remove(&correlation_id);

        match handle {
            Some(handle) => {
                handle.token.cancel();
                handle.join.abort();
                debug!(%correlation_id, "run aborted");
                true
            }
            None => false,
        }
    }

    fn remove(&self, correlation_id: Uuid) {
        self.running
            .lock()
            .expect("executor mutex poisoned")
            .remove(&correlation_id);
    }

    #[cfg(test)]
    pub(crate) fn active_count(&self) -> usize {
        self.running.lock().expect("executor mutex poisoned").len()
    }
}
