//! KvEngine port - パーティション付き KV テーブル
//!
//! テーブルは `(partition, key) -> value` の対応です。key はテーブル全体で一意で、
//! partition は key をまとめて列挙・削除するための単位です。
//!
//! # 実装
//! - `InMemoryKvEngine`: すべてヒープ上
//! - `SqliteKvEngine`: メモリに収まらないランのためにデータベースファイルへ退避
//!
//! # 学習ポイント
//! - ジェネリックメソッドを持つ trait（`create_table<V>`）と object-safe な `PartitionedTable<V>`
//! - `Box<dyn Iterator>` による遅延スキャンの抽象化

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;

/// Bounds every value stored in a table must satisfy. Disk-backed engines
/// serialize values, in-memory ones clone them.
pub trait TableValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> TableValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Single-pass view over every value of a table.
pub type Values<'a, V> = Box<dyn Iterator<Item = Result<V>> + Send + 'a>;

/// One partitioned table.
///
/// # Contract
/// - `put` overwrites any value already stored under `key`, even when it was
///   stored under another partition (last write wins).
/// - Unknown keys and partitions yield `None` / empty results, never errors.
/// - Errors mean the backing storage failed.
pub trait PartitionedTable<V: TableValue>: Send + Sync {
    fn put(&self, partition: &str, key: &str, value: V) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<V>>;

    /// Values of one partition, in an order that is stable for a given
    /// table state.
    fn values_in_partition(&self, partition: &str) -> Result<Vec<V>>;

    fn clear_partition(&self, partition: &str) -> Result<()>;

    /// Lazy view over all partitions. Concurrent writers may or may not be
    /// observed.
    fn all_values(&self) -> Values<'_, V>;

    fn clear_all(&self) -> Result<()>;
}

/// Factory for partitioned tables.
pub trait KvEngine: Send + Sync {
    /// Create a new, empty table. Creating the same name twice on one engine
    /// is an `InvalidArgument` error.
    fn create_table<V: TableValue>(&self, name: &str) -> Result<Box<dyn PartitionedTable<V>>>;

    /// Names of the tables this engine knows about. Disk-backed engines also
    /// report tables written by earlier processes that still hold rows.
    fn table_names(&self) -> Result<Vec<String>>;

    /// Forget a table and delete its rows. Unknown names are ignored.
    fn drop_table(&self, name: &str) -> Result<()>;
}
