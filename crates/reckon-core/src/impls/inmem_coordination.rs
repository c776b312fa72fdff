//! InMemoryCoordinationStore - 単一プロセス内のセマフォ行
//!
//! 行は 1 つの async Mutex の後ろの map に置くので、読んで判定して書く一連の処理は自明にアトミックです。
//! テストや、同じプロセス内のタスクだけを調停するツール向け。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::decision::{Acquisition, resolve};
use crate::domain::{AcquireMode, LockRow};
use crate::error::Result;
use crate::ports::CoordinationStore;

#[derive(Debug, Clone, Default)]
pub struct InMemoryCoordinationStore {
    rows: Arc<Mutex<HashMap<String, LockRow>>>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn try_acquire(
        &self,
        name: &str,
        mode: AcquireMode,
        now: DateTime<Utc>,
    ) -> Result<Acquisition> {
        let mut rows = self.rows.lock().await;
        let mut resolution = resolve(name, rows.get(name).cloned(), mode, now);
        if let Some(row) = resolution.write.take() {
            rows.insert(name.to_string(), row);
        }
        Ok(resolution.into_acquisition())
    }

    async fn release(&self, name: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut rows = self.rows.lock().await;
        Ok(rows.get_mut(name).is_some_and(|row| row.release(now)))
    }

    async fn find(&self, name: &str) -> Result<Option<LockRow>> {
        let rows = self.rows.lock().await;
        Ok(rows.get(name).cloned())
    }
}
