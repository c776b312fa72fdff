//! App - アプリケーション層
//!
//! ports を組み合わせてサービスを実装します。
//!
//! # 主要コンポーネント
//! - **InitialIssueStore**: 1 回の解析ランが持つ前回 issue と changelog
//! - **DatabaseSemaphore**: プロセスをまたぐ名前付きロック

pub mod issue_store;
pub mod semaphore;

pub use self::issue_store::InitialIssueStore;
pub use self::semaphore::DatabaseSemaphore;
