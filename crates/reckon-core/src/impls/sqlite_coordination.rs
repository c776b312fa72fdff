//! SqliteCoordinationStore - 共有データベースファイル上のセマフォ行
//!
//! 各プロセスは同じファイルを自分のコネクションで開きます。取得処理は `BEGIN IMMEDIATE`
//! トランザクションの中で行い、行を読む前に SQLite の書き込みロックを取ります。
//! 競合したプロセスは `busy_timeout` の間待ち、前の勝者が残した行を読みます。
//!
//! # 学習ポイント
//! - 同期 API の rusqlite を `spawn_blocking` で async trait に載せる
//! - `semaphore_schema_version` テーブルによる前進のみのマイグレーション

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::debug;

use super::sqlite::{format_timestamp, open_connection, open_in_memory, parse_timestamp};
use crate::domain::decision::{Acquisition, resolve};
use crate::domain::{AcquireMode, LockRow};
use crate::error::{ReckonError, Result};
use crate::ports::CoordinationStore;

/// Bump together with a new branch in `run_migrations`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

pub struct SqliteCoordinationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCoordinationStore {
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let conn = open_connection(path.as_ref(), busy_timeout)?;
        Self::from_connection(conn)
    }

    /// Private database visible to this instance only.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| ReckonError::poisoned(operation))?;
            f(&mut conn)
        })
        .await?
    }
}

fn run_migrations(conn: &mut Connection) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| ReckonError::storage("begin migration", e.to_string()))?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS semaphore_schema_version (
             id INTEGER PRIMARY KEY CHECK (id = 1),
             version INTEGER NOT NULL
         );",
    )
    .map_err(|e| ReckonError::storage("create schema_version table", e.to_string()))?;

    let current: i64 = tx
        .query_row(
            "SELECT version FROM semaphore_schema_version WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| ReckonError::storage("read schema version", e.to_string()))?
        .unwrap_or(0);

    if current > CURRENT_SCHEMA_VERSION {
        return Err(ReckonError::storage(
            "schema version",
            format!(
                "database schema version {current} is newer than supported version {CURRENT_SCHEMA_VERSION}"
            ),
        ));
    }

    if current < 1 {
        tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS semaphores (
                 name TEXT PRIMARY KEY,
                 locked_at TEXT,
                 created_at TEXT NOT NULL,
                 updated_at TEXT NOT NULL,
                 token INTEGER NOT NULL DEFAULT 0
             );",
        )
        .map_err(|e| ReckonError::storage("migration v1", e.to_string()))?;
    }

    tx.execute(
        "INSERT OR REPLACE INTO semaphore_schema_version (id, version) VALUES (1, ?1)",
        params![CURRENT_SCHEMA_VERSION],
    )
    .map_err(|e| ReckonError::storage("update schema version", e.to_string()))?;

    tx.commit()
        .map_err(|e| ReckonError::storage("commit migration", e.to_string()))
}

type RawRow = (String, Option<String>, String, String, i64);

fn read_row(conn: &Connection, name: &str) -> Result<Option<LockRow>> {
    let raw: Option<RawRow> = conn
        .query_row(
            "SELECT name, locked_at, created_at, updated_at, token
             FROM semaphores WHERE name = ?1",
            params![name],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .optional()
        .map_err(|e| ReckonError::storage("read semaphore", e.to_string()))?;

    raw.map(|(name, locked_at, created_at, updated_at, token)| -> Result<LockRow> {
        Ok(LockRow {
            name,
            locked_at: locked_at.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
            token: u64::try_from(token)
                .map_err(|_| ReckonError::corrupt("semaphore token", token.to_string()))?,
        })
    })
    .transpose()
}

fn write_row(conn: &Connection, row: &LockRow) -> Result<()> {
    conn.execute(
        "INSERT INTO semaphores (name, locked_at, created_at, updated_at, token)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(name) DO UPDATE SET
             locked_at = excluded.locked_at,
             updated_at = excluded.updated_at,
             token = excluded.token",
        params![
            row.name,
            row.locked_at.map(format_timestamp),
            format_timestamp(row.created_at),
            format_timestamp(row.updated_at),
            row.token as i64,
        ],
    )
    .map_err(|e| ReckonError::storage("write semaphore", e.to_string()))?;
    Ok(())
}

#[async_trait]
impl CoordinationStore for SqliteCoordinationStore {
    async fn try_acquire(
        &self,
        name: &str,
        mode: AcquireMode,
        now: DateTime<Utc>,
    ) -> Result<Acquisition> {
        let name = name.to_string();
        self.blocking("acquire", move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| ReckonError::storage("begin acquire", e.to_string()))?;

            let resolution = resolve(&name, read_row(&tx, &name)?, mode, now);
            if let Some(row) = &resolution.write {
                write_row(&tx, row)?;
            }
            tx.commit()
                .map_err(|e| ReckonError::storage("commit acquire", e.to_string()))?;

            debug!(name = %name, decision = ?resolution.decision, "semaphore request resolved");
            Ok(resolution.into_acquisition())
        })
        .await
    }

    async fn release(&self, name: &str, now: DateTime<Utc>) -> Result<bool> {
        let name = name.to_string();
        self.blocking("release", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE semaphores SET locked_at = NULL, updated_at = ?2
                     WHERE name = ?1 AND locked_at IS NOT NULL",
                    params![name, format_timestamp(now)],
                )
                .map_err(|e| ReckonError::storage("release semaphore", e.to_string()))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn find(&self, name: &str) -> Result<Option<LockRow>> {
        let name = name.to_string();
        self.blocking("find", move |conn| read_row(conn, &name)).await
    }
}
