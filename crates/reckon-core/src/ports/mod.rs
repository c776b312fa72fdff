//! Ports - サービスと裏側のストアの境界
//!
//! 各 trait は外部の関心事を 1 つずつ隠し、テストではインメモリ実装、本番ではデータベースで動かせるようにします。
//!
//! - **KvEngine**: ディスクに退避できるパーティション付き KV テーブル
//! - **CoordinationStore**: 名前付きロックを支える共有行
//! - **Clock** / **IdGenerator**: 時刻と識別子。テストから注入可能

pub mod clock;
pub mod coordination_store;
pub mod id_generator;
pub mod kv_engine;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::coordination_store::CoordinationStore;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::kv_engine::{KvEngine, PartitionedTable};
