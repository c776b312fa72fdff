//! Domain model (ids, issues, changelog, lock rows, decisions).

pub mod changelog;
pub mod decision;
pub mod ids;
pub mod issue;
pub mod lock;

pub use changelog::ChangelogEntry;
pub use decision::{Acquisition, Decision};
pub use ids::RunId;
pub use issue::{ComponentKey, IssueKey, IssueRecord};
pub use lock::{AcquireMode, Lock, LockRow};
