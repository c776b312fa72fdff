//! InitialIssueStore - 前回解析の issue を今回の検出結果と突き合わせるまで保持
//!
//! # 処理の流れ
//! 1. ラン開始時に前回の open issue と changelog を一括ロード
//! 2. コンポーネントを解析するたびに `select_and_remove_issues` でそのコンポーネントの
//!    issue を受け取り、同時にストアから取り除く
//! 3. 最後のコンポーネントの後に残った issue は突き合わせ相手がいなかったもの。
//!    `select_all_issues` で読み出す
//! 4. 終了時に `clear`
//!
//! 4 に到達せずに落ちたランのテーブルはディスク上に残ります。次回起動時に
//! `purge_abandoned_runs` が RunId（ULID）に埋め込まれた時刻から古いランを判定して回収します。
//!
//! # 学習ポイント
//! - ストライプ化した `Mutex` によるパーティション単位の排他
//! - trait object（`Box<dyn PartitionedTable<V>>`）でバックエンドを差し替え
//! - `impl Iterator` を返す遅延スキャン

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::domain::{ChangelogEntry, ComponentKey, IssueKey, IssueRecord, RunId};
use crate::error::{ReckonError, Result};
use crate::ports::kv_engine::{KvEngine, PartitionedTable};

/// Number of stripes guarding component partitions.
const PARTITION_STRIPES: usize = 64;

/// Changelog sequences live in a single partition of their table.
const CHANGELOG_PARTITION: &str = "changelog";

const ISSUES_TABLE: &str = "last-open-issues";
const CHANGELOG_TABLE: &str = "issues-changelog";

/// InitialIssueStore は 1 ランぶんの前回 issue と changelog を保持
///
/// # 使用例
/// ```ignore
/// let store = InitialIssueStore::new(&engine, run_id)?;
/// store.load_issues(previous_issues)?;
/// for component in components {
///     let previous = store.select_and_remove_issues(&component)?;
///     // previous と今回の検出結果を突き合わせる
/// }
/// let unmatched: Vec<_> = store.select_all_issues().collect::<Result<_>>()?;
/// store.clear()?;
/// ```
///
/// # 実装詳細
/// - テーブル名は `<run id>/last-open-issues` と `<run id>/issues-changelog`
/// - issue はコンポーネントキーをパーティションにして格納
/// - changelog は単一パーティションに issue キーごとの `Vec` として格納
/// - 同じコンポーネントへの add と select-and-remove は必ず同じストライプを取る
pub struct InitialIssueStore {
    run_id: RunId,
    issues: Box<dyn PartitionedTable<IssueRecord>>,
    changelog: Box<dyn PartitionedTable<Vec<ChangelogEntry>>>,

    /// Striped critical sections: a component's add and its
    /// select-and-remove always take the same stripe.
    partition_guards: Vec<Mutex<()>>,
    changelog_guard: Mutex<()>,
}

impl InitialIssueStore {
    /// Create the store's two tables on `engine`, namespaced by `run_id`.
    pub fn new<E: KvEngine>(engine: &E, run_id: RunId) -> Result<Self> {
        let issues = engine.create_table(&format!("{run_id}/{ISSUES_TABLE}"))?;
        let changelog = engine.create_table(&format!("{run_id}/{CHANGELOG_TABLE}"))?;
        Ok(Self {
            run_id,
            issues,
            changelog,
            partition_guards: (0..PARTITION_STRIPES).map(|_| Mutex::new(())).collect(),
            changelog_guard: Mutex::new(()),
        })
    }

    /// Drop the tables of every run started before `started_before`.
    /// Returns how many tables were dropped. Tables whose name does not
    /// follow the `<run id>/<table>` layout are left alone.
    pub fn purge_abandoned_runs<E: KvEngine>(
        engine: &E,
        started_before: DateTime<Utc>,
    ) -> Result<usize> {
        let cutoff_ms = started_before.timestamp_millis().max(0) as u64;
        let mut dropped = 0;
        for name in engine.table_names()? {
            let Some((run, table)) = name.split_once('/') else {
                continue;
            };
            if table != ISSUES_TABLE && table != CHANGELOG_TABLE {
                continue;
            }
            let Ok(run_id) = run.parse::<RunId>() else {
                continue;
            };
            if run_id.as_ulid().timestamp_ms() < cutoff_ms {
                engine.drop_table(&name)?;
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!(dropped, "reclaimed tables of abandoned runs");
        }
        Ok(dropped)
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    fn lock_partition(&self, component: &ComponentKey) -> Result<MutexGuard<'_, ()>> {
        let mut hasher = DefaultHasher::new();
        component.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.partition_guards.len();
        self.partition_guards[stripe]
            .lock()
            .map_err(|_| ReckonError::poisoned("issue partition"))
    }

    /// Insert or overwrite an issue under its component.
    pub fn add_issue(&self, issue: IssueRecord) -> Result<&Self> {
        let _guard = self.lock_partition(issue.component_key())?;
        let partition = issue.component_key().as_str().to_owned();
        let key = issue.key().as_str().to_owned();
        self.issues.put(&partition, &key, issue)?;
        Ok(self)
    }

    /// Hand over every issue of `component` and evict them, as one step with
    /// respect to other callers on the same component.
    pub fn select_and_remove_issues(&self, component: &ComponentKey) -> Result<Vec<IssueRecord>> {
        let _guard = self.lock_partition(component)?;
        let issues = self.issues.values_in_partition(component.as_str())?;
        if !issues.is_empty() {
            self.issues.clear_partition(component.as_str())?;
        }
        debug!(component = %component, count = issues.len(), "consumed previous issues");
        Ok(issues)
    }

    /// Lazy view over every issue still resident. The store must not be
    /// mutated meanwhile if an exact snapshot is needed.
    pub fn select_all_issues(&self) -> impl Iterator<Item = Result<IssueRecord>> + '_ {
        self.issues.all_values()
    }

    /// Append an entry to its issue's changelog.
    pub fn add_changelog(&self, entry: ChangelogEntry) -> Result<&Self> {
        let _guard = self
            .changelog_guard
            .lock()
            .map_err(|_| ReckonError::poisoned("changelog"))?;
        let key = entry.issue_key().as_str().to_owned();
        let mut entries = self.changelog.get(&key)?.unwrap_or_default();
        entries.push(entry);
        self.changelog.put(CHANGELOG_PARTITION, &key, entries)?;
        Ok(self)
    }

    /// Changelog of one issue in insertion order; empty when unknown.
    pub fn select_changelog(&self, issue_key: &IssueKey) -> Result<Vec<ChangelogEntry>> {
        Ok(self.changelog.get(issue_key.as_str())?.unwrap_or_default())
    }

    /// Bulk-load issues, returning how many were added.
    pub fn load_issues<I>(&self, issues: I) -> Result<usize>
    where
        I: IntoIterator<Item = IssueRecord>,
    {
        let mut loaded = 0;
        for issue in issues {
            self.add_issue(issue)?;
            loaded += 1;
        }
        debug!(run = %self.run_id, loaded, "loaded previous issues");
        Ok(loaded)
    }

    /// Bulk-load changelog entries, preserving the iterator's order per issue.
    pub fn load_changelog<I>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = ChangelogEntry>,
    {
        let mut loaded = 0;
        for entry in entries {
            self.add_changelog(entry)?;
            loaded += 1;
        }
        debug!(run = %self.run_id, loaded, "loaded issue changelog");
        Ok(loaded)
    }

    /// Drop every issue and every changelog entry of this run.
    pub fn clear(&self) -> Result<()> {
        self.issues.clear_all()?;
        self.changelog.clear_all()?;
        info!(run = %self.run_id, "cleared issue store");
        Ok(())
    }
}
