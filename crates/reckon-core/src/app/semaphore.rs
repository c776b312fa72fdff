//! DatabaseSemaphore - 同じ調停データベースに届く全プロセスで共有する名前付きロック
//!
//! # 取得の 2 形式
//! - `acquire(name)`: 誰も保持していない時だけ取得。既存の保持はどれだけ古くても奪わない
//! - `acquire_for(name, max_duration_secs)`: 保持が `max_duration_secs` 以上古ければ
//!   保持者は死んだとみなして奪う。`0` は「常に取得」
//!
//! どちらも待ちません。競合は `Lock { acquired: false }` として返り、必要なら呼び出し側が
//! ポーリングします。古さは壁時計で判定します。奪われたくない保持者は `Lock::token` を
//! 書き込みに添え、書き込み先で古いトークンを拒否させてください。
//!
//! # 学習ポイント
//! - ジェネリクス + デフォルト型パラメータ（`C = SystemClock`）による時計の注入
//! - 判定結果（`Decision`）に応じたログレベルの使い分け

use tracing::{debug, info, warn};

use crate::domain::decision::Decision;
use crate::domain::{AcquireMode, Lock, LockRow};
use crate::error::{ReckonError, Result};
use crate::ports::{Clock, CoordinationStore, SystemClock};

/// DatabaseSemaphore は CoordinationStore 上の名前付きロック
///
/// # 使用例
/// ```ignore
/// let semaphore = DatabaseSemaphore::new(SqliteCoordinationStore::open(path, timeout)?);
/// let lock = semaphore.acquire_for("nightly-purge", 3600).await?;
/// if lock.acquired {
///     // 作業
///     semaphore.release("nightly-purge").await?;
/// }
/// ```
pub struct DatabaseSemaphore<S, C = SystemClock> {
    store: S,
    clock: C,
}

impl<S: CoordinationStore> DatabaseSemaphore<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: CoordinationStore, C: Clock> DatabaseSemaphore<S, C> {
    pub fn with_clock(store: S, clock: C) -> Self {
        Self { store, clock }
    }

    /// Take `name` only if nobody holds it.
    pub async fn acquire(&self, name: &str) -> Result<Lock> {
        self.request(name, AcquireMode::Exclusive).await
    }

    /// Take `name` if nobody holds it or the hold is at least
    /// `max_duration_secs` old (`0`: unconditionally).
    pub async fn acquire_for(&self, name: &str, max_duration_secs: u64) -> Result<Lock> {
        self.request(name, AcquireMode::expiring(max_duration_secs))
            .await
    }

    pub async fn request(&self, name: &str, mode: AcquireMode) -> Result<Lock> {
        validate_name(name)?;
        let acquisition = self.store.try_acquire(name, mode, self.clock.now()).await?;
        let lock = acquisition.lock;

        match acquisition.decision {
            Decision::Create | Decision::Take => {
                info!(name, token = lock.token, "semaphore acquired");
            }
            Decision::Override { held_for_secs } => {
                warn!(
                    name,
                    held_for_secs,
                    token = lock.token,
                    "semaphore reclaimed from a stale holder"
                );
            }
            Decision::Refuse { held_for_secs } => {
                debug!(name, held_for_secs, "semaphore busy");
            }
        }
        Ok(lock)
    }

    /// Clear the hold on `name`. Returns `false` when nothing was held:
    /// releasing an unknown or already released name changes nothing.
    pub async fn release(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let released = self.store.release(name, self.clock.now()).await?;
        if released {
            info!(name, "semaphore released");
        } else {
            debug!(name, "release of a semaphore nobody holds");
        }
        Ok(released)
    }

    pub async fn inspect(&self, name: &str) -> Result<Option<LockRow>> {
        validate_name(name)?;
        self.store.find(name).await
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ReckonError::InvalidArgument(
            "semaphore name must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};
    use rstest::rstest;

    use super::*;
    use crate::impls::{InMemoryCoordinationStore, SqliteCoordinationStore};
    use crate::ports::FixedClock;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[derive(Clone, Copy, Debug)]
    enum Backend {
        Memory,
        Sqlite,
    }

    type TestSemaphore = DatabaseSemaphore<Box<dyn CoordinationStore>, Arc<FixedClock>>;

    fn semaphore(backend: Backend) -> (TestSemaphore, Arc<FixedClock>) {
        let store: Box<dyn CoordinationStore> = match backend {
            Backend::Memory => Box::new(InMemoryCoordinationStore::new()),
            Backend::Sqlite => Box::new(SqliteCoordinationStore::in_memory().unwrap()),
        };
        let clock = Arc::new(FixedClock::new(t0()));
        (DatabaseSemaphore::with_clock(store, Arc::clone(&clock)), clock)
    }

    #[rstest]
    #[case::memory(Backend::Memory)]
    #[case::sqlite(Backend::Sqlite)]
    #[tokio::test]
    async fn fresh_hold_refuses_second_caller(#[case] backend: Backend) {
        let (sem, _clock) = semaphore(backend);

        let first = sem.acquire_for("X", 60).await.unwrap();
        assert!(first.acquired);
        assert_eq!(first.locked_at, Some(t0()));
        assert_eq!(first.duration_since_locked, None);

        let second = sem.acquire_for("X", 60).await.unwrap();
        assert!(!second.acquired);
        assert_eq!(second.duration_since_locked, Some(0));
        assert_eq!(second.locked_at, Some(t0()));
    }

    #[rstest]
    #[case::memory(Backend::Memory)]
    #[case::sqlite(Backend::Sqlite)]
    #[tokio::test]
    async fn stale_hold_is_overridden(#[case] backend: Backend) {
        let (sem, clock) = semaphore(backend);
        assert!(sem.acquire_for("X", 1).await.unwrap().acquired);

        clock.advance_secs(1);
        let lock = sem.acquire_for("X", 1).await.unwrap();
        assert!(lock.acquired);
        assert_eq!(lock.locked_at, Some(clock.now()));
        assert_eq!(lock.created_at, t0());

        let row = sem.inspect("X").await.unwrap().unwrap();
        assert_eq!(row.locked_at, Some(clock.now()));
        assert_eq!(row.updated_at, clock.now());
    }

    #[rstest]
    #[case::memory(Backend::Memory)]
    #[case::sqlite(Backend::Sqlite)]
    #[tokio::test]
    async fn zero_max_duration_always_acquires(#[case] backend: Backend) {
        let (sem, _clock) = semaphore(backend);
        for _ in 0..3 {
            assert!(sem.acquire_for("X", 0).await.unwrap().acquired);
        }
    }

    #[rstest]
    #[case::memory(Backend::Memory)]
    #[case::sqlite(Backend::Sqlite)]
    #[tokio::test]
    async fn strict_acquire_never_overrides(#[case] backend: Backend) {
        let (sem, clock) = semaphore(backend);
        assert!(sem.acquire("X").await.unwrap().acquired);

        clock.advance_secs(86_400 * 30);
        let lock = sem.acquire("X").await.unwrap();
        assert!(!lock.acquired);
        assert_eq!(lock.duration_since_locked, Some(86_400 * 30));
    }

    #[rstest]
    #[case::memory(Backend::Memory)]
    #[case::sqlite(Backend::Sqlite)]
    #[tokio::test]
    async fn release_makes_name_available_again(#[case] backend: Backend) {
        let (sem, clock) = semaphore(backend);
        assert!(sem.acquire("X").await.unwrap().acquired);

        clock.advance_secs(5);
        assert!(sem.release("X").await.unwrap());
        let row = sem.inspect("X").await.unwrap().unwrap();
        assert_eq!(row.locked_at, None);
        assert_eq!(row.updated_at, clock.now());

        assert!(sem.acquire("X").await.unwrap().acquired);
    }

    #[rstest]
    #[case::memory(Backend::Memory)]
    #[case::sqlite(Backend::Sqlite)]
    #[tokio::test]
    async fn second_release_reports_nothing_held(#[case] backend: Backend) {
        let (sem, _clock) = semaphore(backend);
        assert!(sem.acquire("X").await.unwrap().acquired);

        assert!(sem.release("X").await.unwrap());
        assert!(!sem.release("X").await.unwrap());
    }

    #[rstest]
    #[case::memory(Backend::Memory)]
    #[case::sqlite(Backend::Sqlite)]
    #[tokio::test]
    async fn releasing_unknown_name_is_a_noop(#[case] backend: Backend) {
        let (sem, _clock) = semaphore(backend);
        assert!(!sem.release("never-taken").await.unwrap());
        assert_eq!(sem.inspect("never-taken").await.unwrap(), None);
    }

    #[rstest]
    #[case::memory(Backend::Memory)]
    #[case::sqlite(Backend::Sqlite)]
    #[tokio::test]
    async fn tokens_increase_with_every_acquisition(#[case] backend: Backend) {
        let (sem, clock) = semaphore(backend);
        let mut tokens = vec![sem.acquire("X").await.unwrap().token];

        sem.release("X").await.unwrap();
        tokens.push(sem.acquire("X").await.unwrap().token);

        clock.advance_secs(120);
        tokens.push(sem.acquire_for("X", 60).await.unwrap().token);

        let refused = sem.acquire_for("X", 60).await.unwrap();
        assert!(!refused.acquired);
        assert_eq!(refused.token, tokens[2]);

        assert!(tokens.windows(2).all(|w| w[0] < w[1]), "{tokens:?}");
    }

    #[rstest]
    #[case::empty("")]
    #[case::blank("   ")]
    #[tokio::test]
    async fn blank_names_are_rejected(#[case] name: &str) {
        let (sem, _clock) = semaphore(Backend::Memory);
        assert!(matches!(
            sem.acquire(name).await,
            Err(ReckonError::InvalidArgument(_))
        ));
        assert!(matches!(
            sem.release(name).await,
            Err(ReckonError::InvalidArgument(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_in_one_process_get_one_winner() {
        let store = InMemoryCoordinationStore::new();
        let clock = Arc::new(FixedClock::new(t0()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let sem = DatabaseSemaphore::with_clock(store.clone(), Arc::clone(&clock));
            handles.push(tokio::spawn(async move {
                sem.acquire_for("Y", 60).await.unwrap().acquired
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_connections_to_one_file_get_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locks.db");
        let clock = Arc::new(FixedClock::new(t0()));

        // Schema migration runs at open; do it before the race starts.
        let semaphores: Vec<_> = (0..8)
            .map(|_| {
                let store = SqliteCoordinationStore::open(&path, Duration::from_secs(10)).unwrap();
                DatabaseSemaphore::with_clock(store, Arc::clone(&clock))
            })
            .collect();

        let handles: Vec<_> = semaphores
            .into_iter()
            .map(|sem| tokio::spawn(async move { sem.acquire_for("Y", 60).await.unwrap() }))
            .collect();

        let mut locks = Vec::new();
        for handle in handles {
            locks.push(handle.await.unwrap());
        }
        assert_eq!(locks.iter().filter(|l| l.acquired).count(), 1);
        assert!(
            locks
                .iter()
                .filter(|l| !l.acquired)
                .all(|l| l.duration_since_locked == Some(0))
        );
    }
}
