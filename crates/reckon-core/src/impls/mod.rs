//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryKvEngine** / **InMemoryCoordinationStore**: 単一プロセス用。テストと小さなランで使用
//! - **SqliteKvEngine**: テーブルを SQLite ファイルに退避
//! - **SqliteCoordinationStore**: ロック行を複数プロセスで共有する SQLite ファイルに保持

pub mod inmem_coordination;
pub mod inmem_kv;
pub mod sqlite;
pub mod sqlite_coordination;
pub mod sqlite_kv;

pub use self::inmem_coordination::InMemoryCoordinationStore;
pub use self::inmem_kv::InMemoryKvEngine;
pub use self::sqlite_coordination::SqliteCoordinationStore;
pub use self::sqlite_kv::SqliteKvEngine;
