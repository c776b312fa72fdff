//! CoordinationStore port - セマフォ行を保持する共有データベース
//!
//! 調停に参加するプロセスはすべて同じストアに届きます。
//! アトミック性は実装の責務です。名前ごとに行の読み出しとそれに続く書き込みを 1 単位で行い、
//! 2 つの呼び出し元が同時に空きと判断して両方が取得することはありません。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::decision::Acquisition;
use crate::domain::{AcquireMode, LockRow};
use crate::error::Result;

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Atomically read the row for `name`, decide with
    /// [`crate::domain::decision::resolve`] and persist the outcome.
    async fn try_acquire(
        &self,
        name: &str,
        mode: AcquireMode,
        now: DateTime<Utc>,
    ) -> Result<Acquisition>;

    /// Clear the hold on `name`. Unknown or unheld names are left alone.
    /// Returns whether a hold was cleared.
    async fn release(&self, name: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Read-only view of the persisted row.
    async fn find(&self, name: &str) -> Result<Option<LockRow>>;
}

#[async_trait]
impl<T: CoordinationStore + ?Sized> CoordinationStore for Box<T> {
    async fn try_acquire(
        &self,
        name: &str,
        mode: AcquireMode,
        now: DateTime<Utc>,
    ) -> Result<Acquisition> {
        (**self).try_acquire(name, mode, now).await
    }

    async fn release(&self, name: &str, now: DateTime<Utc>) -> Result<bool> {
        (**self).release(name, now).await
    }

    async fn find(&self, name: &str) -> Result<Option<LockRow>> {
        (**self).find(name).await
    }
}
