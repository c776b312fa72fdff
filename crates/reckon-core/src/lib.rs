//! reckon-core
//!
//! インクリメンタル解析ランのためのストレージと排他制御の部品集。
//!
//! # モジュール構成
//! - **domain**: 値型（RunId, IssueRecord, ChangelogEntry, LockRow）と純粋な取得判定
//! - **ports**: 外部との境界（KvEngine, CoordinationStore, Clock, IdGenerator）
//! - **impls**: ports のインメモリ実装と SQLite 実装
//! - **app**: ports を組み合わせたサービス（InitialIssueStore, DatabaseSemaphore）
//! - **config**: 環境変数からの設定読み込み
//! - **error**: クレート共通のエラー型

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;

pub use self::app::{DatabaseSemaphore, InitialIssueStore};
pub use self::config::{ConfigError, ReckonConfig};
pub use self::error::{ReckonError, Result};
