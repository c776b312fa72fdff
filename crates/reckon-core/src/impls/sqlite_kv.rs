//! SqliteKvEngine - データベースファイルに退避するパーティション付きテーブル
//!
//! # 実装詳細
//! - エンジン内の論理テーブルはすべて 1 つの物理テーブル `kv_entries` を共有
//! - 主キーは `(table_name, entry_key)`、値は JSON テキスト
//! - 全件スキャンは `rowid` でページングするので、大きなランでも一度に全部を読み込まない
//! - 異常終了したランの行は `table_names` で見つけ、`drop_table` で回収できる
//!
//! # 学習ポイント
//! - rusqlite の prepared statement と `params!`
//! - `Arc<Mutex<Connection>>` を複数テーブルで共有
//! - ページングする `Iterator` 実装

use std::collections::{HashSet, VecDeque};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, params};
use tracing::debug;

use super::sqlite::{open_connection, open_in_memory};
use crate::error::{ReckonError, Result};
use crate::ports::kv_engine::{KvEngine, PartitionedTable, TableValue, Values};

pub const DEFAULT_PAGE_SIZE: usize = 500;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_entries (
    table_name TEXT NOT NULL,
    partition_key TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (table_name, entry_key)
);
CREATE INDEX IF NOT EXISTS idx_kv_entries_partition
    ON kv_entries(table_name, partition_key);
"#;

type SharedConnection = Arc<Mutex<Connection>>;

fn with_conn<T>(
    conn: &SharedConnection,
    operation: &'static str,
    f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
) -> Result<T> {
    let guard = conn.lock().map_err(|_| ReckonError::poisoned(operation))?;
    f(&guard).map_err(|e| ReckonError::storage(operation, e.to_string()))
}

/// Engine whose tables live in a SQLite database.
pub struct SqliteKvEngine {
    conn: SharedConnection,
    page_size: usize,
    names: Mutex<HashSet<String>>,
}

impl SqliteKvEngine {
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration, page_size: usize) -> Result<Self> {
        let conn = open_connection(path.as_ref(), busy_timeout)?;
        Self::from_connection(conn, page_size)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(open_in_memory()?, DEFAULT_PAGE_SIZE)
    }

    fn from_connection(conn: Connection, page_size: usize) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| ReckonError::storage("create kv schema", e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            page_size: page_size.max(1),
            names: Mutex::new(HashSet::new()),
        })
    }
}

impl KvEngine for SqliteKvEngine {
    fn create_table<V: TableValue>(&self, name: &str) -> Result<Box<dyn PartitionedTable<V>>> {
        {
            let mut names = self
                .names
                .lock()
                .map_err(|_| ReckonError::poisoned("create_table"))?;
            if !names.insert(name.to_string()) {
                return Err(ReckonError::InvalidArgument(format!(
                    "table {name:?} already exists"
                )));
            }
        }

        // A new table starts empty even if the file already has rows under
        // this name. Rows of other names are reclaimed through `drop_table`.
        let stale = with_conn(&self.conn, "create_table", |conn| {
            conn.execute("DELETE FROM kv_entries WHERE table_name = ?1", params![name])
        })?;
        if stale > 0 {
            debug!(table = name, rows = stale, "dropped stale kv rows");
        }

        Ok(Box::new(SqliteTable {
            conn: Arc::clone(&self.conn),
            name: name.to_string(),
            page_size: self.page_size,
            _marker: PhantomData,
        }))
    }

    fn table_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = with_conn(&self.conn, "kv table_names", |conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT table_name FROM kv_entries")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })?;
        let created = self
            .names
            .lock()
            .map_err(|_| ReckonError::poisoned("table_names"))?;
        names.extend(created.iter().cloned());
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn drop_table(&self, name: &str) -> Result<()> {
        let rows = with_conn(&self.conn, "kv drop_table", |conn| {
            conn.execute("DELETE FROM kv_entries WHERE table_name = ?1", params![name])
        })?;
        self.names
            .lock()
            .map_err(|_| ReckonError::poisoned("drop_table"))?
            .remove(name);
        debug!(table = name, rows, "dropped kv table");
        Ok(())
    }
}

/// One logical table inside the shared `kv_entries` table.
pub struct SqliteTable<V> {
    conn: SharedConnection,
    name: String,
    page_size: usize,
    _marker: PhantomData<fn() -> V>,
}

fn decode<V: TableValue>(raw: &str) -> Result<V> {
    Ok(serde_json::from_str(raw)?)
}

impl<V: TableValue> PartitionedTable<V> for SqliteTable<V> {
    fn put(&self, partition: &str, key: &str, value: V) -> Result<()> {
        let encoded = serde_json::to_string(&value)
            .map_err(|e| ReckonError::corrupt("kv value", e.to_string()))?;
        with_conn(&self.conn, "kv put", |conn| {
            conn.execute(
                "INSERT INTO kv_entries (table_name, partition_key, entry_key, value)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(table_name, entry_key) DO UPDATE SET
                     partition_key = excluded.partition_key,
                     value = excluded.value",
                params![self.name, partition, key, encoded],
            )
        })?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<V>> {
        use rusqlite::OptionalExtension;

        let raw: Option<String> = with_conn(&self.conn, "kv get", |conn| {
            conn.query_row(
                "SELECT value FROM kv_entries WHERE table_name = ?1 AND entry_key = ?2",
                params![self.name, key],
                |row| row.get(0),
            )
            .optional()
        })?;
        raw.as_deref().map(decode).transpose()
    }

    fn values_in_partition(&self, partition: &str) -> Result<Vec<V>> {
        let raws: Vec<String> = with_conn(&self.conn, "kv values_in_partition", |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT value FROM kv_entries
                 WHERE table_name = ?1 AND partition_key = ?2
                 ORDER BY rowid",
            )?;
            let rows = stmt.query_map(params![self.name, partition], |row| row.get(0))?;
            rows.collect()
        })?;
        raws.iter().map(|raw| decode(raw)).collect()
    }

    fn clear_partition(&self, partition: &str) -> Result<()> {
        with_conn(&self.conn, "kv clear_partition", |conn| {
            conn.execute(
                "DELETE FROM kv_entries WHERE table_name = ?1 AND partition_key = ?2",
                params![self.name, partition],
            )
        })?;
        Ok(())
    }

    fn all_values(&self) -> Values<'_, V> {
        Box::new(PagedValues::<V> {
            conn: Arc::clone(&self.conn),
            table: self.name.clone(),
            page_size: self.page_size,
            last_rowid: 0,
            buffer: VecDeque::new(),
            exhausted: false,
            _marker: PhantomData,
        })
    }

    fn clear_all(&self) -> Result<()> {
        with_conn(&self.conn, "kv clear_all", |conn| {
            conn.execute(
                "DELETE FROM kv_entries WHERE table_name = ?1",
                params![self.name],
            )
        })?;
        Ok(())
    }
}

/// Lazy full scan, one page of rows per query.
struct PagedValues<V> {
    conn: SharedConnection,
    table: String,
    page_size: usize,
    last_rowid: i64,
    buffer: VecDeque<String>,
    exhausted: bool,
    _marker: PhantomData<fn() -> V>,
}

impl<V> PagedValues<V> {
    fn fetch_page(&mut self) -> Result<()> {
        let page: Vec<(i64, String)> = with_conn(&self.conn, "kv all_values", |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT rowid, value FROM kv_entries
                 WHERE table_name = ?1 AND rowid > ?2
                 ORDER BY rowid
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(
                params![self.table, self.last_rowid, self.page_size as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            rows.collect()
        })?;

        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some((rowid, _)) = page.last() {
            self.last_rowid = *rowid;
        }
        self.buffer.extend(page.into_iter().map(|(_, raw)| raw));
        Ok(())
    }
}

impl<V: TableValue> Iterator for PagedValues<V> {
    type Item = Result<V>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(|raw| decode(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        n: u32,
    }

    fn engine_with_page_size(page_size: usize) -> SqliteKvEngine {
        SqliteKvEngine::from_connection(open_in_memory().unwrap(), page_size).unwrap()
    }

    #[test]
    fn put_get_and_overwrite() {
        let engine = engine_with_page_size(10);
        let table: Box<dyn PartitionedTable<Row>> = engine.create_table("t").unwrap();

        table.put("p", "k", Row { n: 1 }).unwrap();
        table.put("p", "k", Row { n: 2 }).unwrap();

        assert_eq!(table.get("k").unwrap(), Some(Row { n: 2 }));
        assert_eq!(table.values_in_partition("p").unwrap().len(), 1);
        assert_eq!(table.get("nope").unwrap(), None);
    }

    #[test]
    fn full_scan_crosses_page_boundaries() {
        let engine = engine_with_page_size(3);
        let table: Box<dyn PartitionedTable<Row>> = engine.create_table("t").unwrap();
        for n in 0..10 {
            table.put(&format!("p{}", n % 4), &format!("k{n}"), Row { n }).unwrap();
        }

        let mut seen: Vec<u32> = table.all_values().map(|r| r.unwrap().n).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn full_scan_of_exact_page_multiple_terminates() {
        let engine = engine_with_page_size(2);
        let table: Box<dyn PartitionedTable<Row>> = engine.create_table("t").unwrap();
        for n in 0..4 {
            table.put("p", &format!("k{n}"), Row { n }).unwrap();
        }
        assert_eq!(table.all_values().count(), 4);
    }

    #[test]
    fn tables_sharing_a_database_are_isolated() {
        let engine = engine_with_page_size(10);
        let a: Box<dyn PartitionedTable<Row>> = engine.create_table("run-a/issues").unwrap();
        let b: Box<dyn PartitionedTable<Row>> = engine.create_table("run-b/issues").unwrap();

        a.put("p", "k", Row { n: 1 }).unwrap();
        b.put("p", "k", Row { n: 2 }).unwrap();
        a.clear_all().unwrap();

        assert_eq!(a.get("k").unwrap(), None);
        assert_eq!(b.get("k").unwrap(), Some(Row { n: 2 }));
        assert_eq!(b.values_in_partition("p").unwrap(), vec![Row { n: 2 }]);
    }

    #[test]
    fn partition_values_keep_insertion_order() {
        let engine = engine_with_page_size(10);
        let table: Box<dyn PartitionedTable<Row>> = engine.create_table("t").unwrap();
        for n in [5, 1, 3] {
            table.put("p", &format!("k{n}"), Row { n }).unwrap();
        }
        let ns: Vec<u32> = table
            .values_in_partition("p")
            .unwrap()
            .into_iter()
            .map(|r| r.n)
            .collect();
        assert_eq!(ns, vec![5, 1, 3]);
    }

    #[test]
    fn undecodable_rows_surface_as_corrupt() {
        let engine = engine_with_page_size(10);
        let table: Box<dyn PartitionedTable<Row>> = engine.create_table("t").unwrap();
        with_conn(&engine.conn, "test", |conn| {
            conn.execute(
                "INSERT INTO kv_entries VALUES ('t', 'p', 'k', 'not json')",
                [],
            )
        })
        .unwrap();

        assert!(matches!(table.get("k"), Err(ReckonError::Corrupt { .. })));
        let first = table.all_values().next().unwrap();
        assert!(matches!(first, Err(ReckonError::Corrupt { .. })));
    }

    #[test]
    fn tables_left_in_the_file_are_listed_and_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spill.db");
        {
            let engine = SqliteKvEngine::open(&path, Duration::from_secs(1), 10).unwrap();
            let left: Box<dyn PartitionedTable<Row>> = engine.create_table("left").unwrap();
            for n in 0..100 {
                left.put("p", &format!("k{n}"), Row { n }).unwrap();
            }
        }

        let engine = SqliteKvEngine::open(&path, Duration::from_secs(1), 10).unwrap();
        let _mine: Box<dyn PartitionedTable<Row>> = engine.create_table("mine").unwrap();
        assert_eq!(engine.table_names().unwrap(), vec!["left", "mine"]);

        engine.drop_table("left").unwrap();
        assert_eq!(engine.table_names().unwrap(), vec!["mine"]);
        let count: i64 = Connection::open(&path)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM kv_entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn spills_to_a_file_that_outlives_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spill.db");
        {
            let engine = SqliteKvEngine::open(&path, Duration::from_secs(1), 10).unwrap();
            let table: Box<dyn PartitionedTable<Row>> = engine.create_table("t").unwrap();
            table.put("p", "k", Row { n: 7 }).unwrap();
        }
        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM kv_entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
