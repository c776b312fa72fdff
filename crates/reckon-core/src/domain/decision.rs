//! Decision - セマフォ取得リクエストの判定
//!
//! 判定は現在の行・要求モード・現在時刻だけで決まる純粋関数です。
//! CoordinationStore は自分のアトミック区間の中でこれを呼び、返された行を書き戻します。
//!
//! # 学習ポイント
//! - I/O を持たない判定ロジックを domain に置き、ストア実装間で共有
//! - `match` による網羅的な状態遷移

use chrono::{DateTime, Utc};

use super::lock::{AcquireMode, Lock, LockRow};

/// What an acquisition request should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No row exists yet: create one, held by the caller.
    Create,

    /// A row exists but nobody holds it.
    Take,

    /// The current hold is stale (or the caller asked to always steal).
    Override { held_for_secs: i64 },

    /// The current hold stands.
    Refuse { held_for_secs: i64 },
}

impl Decision {
    pub fn is_acquired(self) -> bool {
        !matches!(self, Decision::Refuse { .. })
    }
}

pub fn decide(row: Option<&LockRow>, mode: AcquireMode, now: DateTime<Utc>) -> Decision {
    let Some(row) = row else {
        return Decision::Create;
    };
    let Some(held_for_secs) = row.seconds_since_locked(now) else {
        return Decision::Take;
    };

    match mode {
        AcquireMode::Exclusive => Decision::Refuse { held_for_secs },
        AcquireMode::Expiring { max_duration_secs } => {
            if max_duration_secs == 0 || held_for_secs as u64 >= max_duration_secs {
                Decision::Override { held_for_secs }
            } else {
                Decision::Refuse { held_for_secs }
            }
        }
    }
}

/// Outcome of applying a decision: the row to write back (if any) and the
/// answer for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub decision: Decision,
    pub write: Option<LockRow>,
    pub lock: Lock,
}

/// What a coordination store reports back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    pub decision: Decision,
    pub lock: Lock,
}

impl Resolution {
    pub fn into_acquisition(self) -> Acquisition {
        Acquisition {
            decision: self.decision,
            lock: self.lock,
        }
    }
}

/// Decide and apply in one step.
pub fn resolve(
    name: &str,
    row: Option<LockRow>,
    mode: AcquireMode,
    now: DateTime<Utc>,
) -> Resolution {
    let decision = decide(row.as_ref(), mode, now);
    match (decision, row) {
        (Decision::Create, _) | (_, None) => {
            let created = LockRow::new_held(name, now);
            Resolution {
                decision: Decision::Create,
                lock: Lock::acquired(&created),
                write: Some(created),
            }
        }
        (Decision::Refuse { held_for_secs }, Some(row)) => Resolution {
            decision,
            lock: Lock::refused(&row, held_for_secs),
            write: None,
        },
        (Decision::Take | Decision::Override { .. }, Some(mut row)) => {
            row.take(now);
            Resolution {
                decision,
                lock: Lock::acquired(&row),
                write: Some(row),
            }
        }
    }
}
