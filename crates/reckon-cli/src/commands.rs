//! Commands - サブコマンドの実装
//!
//! 各ハンドラは stdout に出す JSON と終了ステータスを返します。
//!
//! # 実装詳細
//! - `issues load` は同期の rusqlite を使うので `spawn_blocking` 上で実行
//! - ロード前に古いランのテーブルを回収し、ドレインが失敗しても自ランのテーブルは必ず削除

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::info;

use reckon_core::domain::{ChangelogEntry, ComponentKey, IssueRecord};
use reckon_core::impls::{SqliteCoordinationStore, SqliteKvEngine};
use reckon_core::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use reckon_core::{ConfigError, DatabaseSemaphore, InitialIssueStore, ReckonConfig, ReckonError};

use crate::cli::{AcquireArgs, IssuesCommand, LockCommand};

pub const EXIT_OK: u8 = 0;
/// Exit status when the lock is held by someone else.
pub const EXIT_CONTENDED: u8 = 3;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid configuration")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Reckon(#[from] ReckonError),

    #[error("cannot read {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed snapshot {path}")]
    Snapshot {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("issue loader task failed")]
    Join(#[from] tokio::task::JoinError),
}

pub struct Outcome {
    pub output: Value,
    pub code: u8,
}

impl Outcome {
    fn ok(output: Value) -> Self {
        Self {
            output,
            code: EXIT_OK,
        }
    }
}

pub async fn run_lock(config: &ReckonConfig, command: LockCommand) -> Result<Outcome, CliError> {
    let store = SqliteCoordinationStore::open(&config.database_path, config.busy_timeout)?;
    let semaphore = DatabaseSemaphore::new(store);

    match command {
        LockCommand::Acquire(AcquireArgs { name, max_duration }) => {
            let lock = match max_duration {
                Some(secs) => semaphore.acquire_for(&name, secs).await?,
                None => semaphore.acquire(&name).await?,
            };
            let code = if lock.acquired { EXIT_OK } else { EXIT_CONTENDED };
            Ok(Outcome {
                output: serde_json::to_value(&lock).map_err(ReckonError::from)?,
                code,
            })
        }
        LockCommand::Release { name } => {
            let released = semaphore.release(&name).await?;
            Ok(Outcome::ok(json!({ "name": name, "released": released })))
        }
        LockCommand::Show { name } => {
            let row = semaphore.inspect(&name).await?;
            Ok(Outcome::ok(
                serde_json::to_value(&row).map_err(ReckonError::from)?,
            ))
        }
    }
}

pub async fn run_issues(
    config: &ReckonConfig,
    command: IssuesCommand,
) -> Result<Outcome, CliError> {
    match command {
        IssuesCommand::Load { file, page_size } => {
            let mut config = config.clone();
            if let Some(page_size) = page_size {
                config.scan_page_size = page_size.max(1);
            }
            let report = tokio::task::spawn_blocking(move || load_snapshot(&config, &file)).await??;
            Ok(Outcome::ok(serde_json::to_value(&report).map_err(ReckonError::from)?))
        }
    }
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(default)]
    issues: Vec<IssueRecord>,
    #[serde(default)]
    changelog: Vec<ChangelogEntry>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct LoadReport {
    pub run_id: String,
    pub issues: usize,
    pub changelog: usize,
    pub components: Map<String, Value>,
    /// Tables of earlier runs that never cleaned up after themselves.
    pub reclaimed_tables: usize,
}

/// Load the snapshot into a disk-backed store, drain it one component at a
/// time the way an analysis pass would, then drop the run's tables. The
/// tables are dropped even when draining fails.
fn load_snapshot(config: &ReckonConfig, file: &Path) -> Result<LoadReport, CliError> {
    let path = file.display().to_string();
    let raw = std::fs::read(file).map_err(|source| CliError::Read {
        path: path.clone(),
        source,
    })?;
    let snapshot: Snapshot =
        serde_json::from_slice(&raw).map_err(|source| CliError::Snapshot { path, source })?;

    let engine = SqliteKvEngine::open(
        &config.database_path,
        config.busy_timeout,
        config.scan_page_size,
    )?;
    let reclaimed_tables = reclaim_abandoned_runs(&engine, config)?;

    let run_id = UlidGenerator::new(SystemClock).generate_run_id();
    let store = InitialIssueStore::new(&engine, run_id)?;

    let drained = drain(&store, snapshot);
    let cleared = store.clear();
    let (issues, changelog, components) = drained?;
    cleared?;

    Ok(LoadReport {
        run_id: run_id.to_string(),
        issues,
        changelog,
        components,
        reclaimed_tables,
    })
}

fn reclaim_abandoned_runs(
    engine: &SqliteKvEngine,
    config: &ReckonConfig,
) -> Result<usize, CliError> {
    let cutoff = chrono::Duration::from_std(config.abandoned_run_after)
        .ok()
        .and_then(|age| SystemClock.now().checked_sub_signed(age));
    match cutoff {
        Some(started_before) => {
            Ok(InitialIssueStore::purge_abandoned_runs(engine, started_before)?)
        }
        None => Ok(0),
    }
}

fn drain(
    store: &InitialIssueStore,
    snapshot: Snapshot,
) -> Result<(usize, usize, Map<String, Value>), CliError> {
    let components: BTreeSet<ComponentKey> = snapshot
        .issues
        .iter()
        .map(|issue| issue.component_key().clone())
        .collect();
    let issues = store.load_issues(snapshot.issues)?;
    let changelog = store.load_changelog(snapshot.changelog)?;
    info!(run = %store.run_id(), issues, changelog, "snapshot loaded");

    let mut counts = Map::new();
    for component in components {
        let taken = store.select_and_remove_issues(&component)?;
        counts.insert(component.as_str().to_string(), json!(taken.len()));
    }
    Ok((issues, changelog, counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(dir: &tempfile::TempDir) -> ReckonConfig {
        ReckonConfig {
            database_path: dir.path().join("reckon.db"),
            busy_timeout: Duration::from_secs(1),
            scan_page_size: 2,
            abandoned_run_after: Duration::from_secs(3600),
        }
    }

    #[test]
    fn snapshot_counts_are_reported_per_component() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("snapshot.json");
        std::fs::write(
            &file,
            r#"{
                "issues": [
                    {"key": "i1", "component_key": "src/a.rs", "payload": {"rule": "R1"}},
                    {"key": "i2", "component_key": "src/a.rs"},
                    {"key": "i3", "component_key": "src/b.rs"},
                    {"key": "i1", "component_key": "src/a.rs", "payload": {"rule": "R2"}}
                ],
                "changelog": [
                    {"issue_key": "i1", "payload": {"status": "OPEN"}},
                    {"issue_key": "i1", "payload": {"status": "CLOSED"}}
                ]
            }"#,
        )
        .unwrap();

        let report = load_snapshot(&config(&dir), &file).unwrap();
        assert_eq!(report.issues, 4);
        assert_eq!(report.changelog, 2);
        assert_eq!(report.components.get("src/a.rs"), Some(&json!(2)));
        assert_eq!(report.components.get("src/b.rs"), Some(&json!(1)));
    }

    #[test]
    fn loading_reclaims_runs_that_never_cleared() {
        use chrono::{TimeZone, Utc};
        use reckon_core::ports::{FixedClock, KvEngine};

        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        {
            let engine = SqliteKvEngine::open(&config.database_path, config.busy_timeout, 10)
                .unwrap();
            let started = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
            let ids = UlidGenerator::new(FixedClock::new(started));
            let crashed = InitialIssueStore::new(&engine, ids.generate_run_id()).unwrap();
            let issues = (0..20).map(|n| IssueRecord::new(format!("i{n}").as_str(), "a", json!({})));
            crashed.load_issues(issues).unwrap();
            crashed
                .add_changelog(ChangelogEntry::new("i0", json!({})))
                .unwrap();
        }

        let file = dir.path().join("snapshot.json");
        std::fs::write(&file, r#"{"issues": [{"key": "k", "component_key": "c"}]}"#).unwrap();
        let report = load_snapshot(&config, &file).unwrap();
        assert_eq!(report.reclaimed_tables, 2);
        assert_eq!(report.components.get("c"), Some(&json!(1)));

        let engine =
            SqliteKvEngine::open(&config.database_path, config.busy_timeout, 10).unwrap();
        assert!(engine.table_names().unwrap().is_empty());
    }

    #[test]
    fn malformed_snapshot_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.json");
        std::fs::write(&file, "{ not json").unwrap();

        let err = load_snapshot(&config(&dir), &file).unwrap_err();
        assert!(matches!(err, CliError::Snapshot { .. }));
    }

    #[tokio::test]
    async fn contended_acquire_exits_with_status_three() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let acquire = || {
            LockCommand::Acquire(AcquireArgs {
                name: "nightly".to_string(),
                max_duration: Some(3600),
            })
        };

        let first = run_lock(&config, acquire()).await.unwrap();
        assert_eq!(first.code, EXIT_OK);
        assert_eq!(first.output["acquired"], json!(true));

        let second = run_lock(&config, acquire()).await.unwrap();
        assert_eq!(second.code, EXIT_CONTENDED);
        assert_eq!(second.output["acquired"], json!(false));

        let release = || LockCommand::Release {
            name: "nightly".to_string(),
        };
        let released = run_lock(&config, release()).await.unwrap();
        assert_eq!(released.output["released"], json!(true));
        let again = run_lock(&config, release()).await.unwrap();
        assert_eq!(again.output["released"], json!(false));
        assert_eq!(again.code, EXIT_OK);

        let shown = run_lock(&config, LockCommand::Show { name: "nightly".to_string() })
            .await
            .unwrap();
        assert_eq!(shown.output["locked_at"], Value::Null);
    }
}
