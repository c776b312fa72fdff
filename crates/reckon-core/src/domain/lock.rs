//! Lock model: named semaphore rows shared by every process that can reach
//! the coordination database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a caller wants contention on a held name to be resolved.
///
/// The two "zero" meanings differ:
/// - `Exclusive` never overrides an existing hold, however old it is.
/// - `Expiring { max_duration_secs: 0 }` always overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AcquireMode {
    /// Acquire only when nobody holds the name.
    Exclusive,

    /// Acquire when nobody holds the name, or when the current hold is at
    /// least `max_duration_secs` old. Zero means "always take it".
    Expiring { max_duration_secs: u64 },
}

impl AcquireMode {
    pub fn expiring(max_duration_secs: u64) -> Self {
        Self::Expiring { max_duration_secs }
    }
}

/// Persisted state of one semaphore name.
///
/// The row outlives every holder: release clears `locked_at` but keeps the
/// row, so `created_at` is the first time the name was ever requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRow {
    pub name: String,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Fencing token, bumped on every successful acquisition of the name.
    pub token: u64,
}

impl LockRow {
    /// A brand-new row, held from `now`.
    pub fn new_held(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            locked_at: Some(now),
            created_at: now,
            updated_at: now,
            token: 1,
        }
    }

    pub fn is_held(&self) -> bool {
        self.locked_at.is_some()
    }

    /// Whole seconds since the current hold started. Holds stamped in the
    /// future by a skewed clock count as zero.
    pub fn seconds_since_locked(&self, now: DateTime<Utc>) -> Option<i64> {
        self.locked_at
            .map(|locked_at| (now - locked_at).num_seconds().max(0))
    }

    /// Take the hold for a new owner.
    pub fn take(&mut self, now: DateTime<Utc>) {
        self.locked_at = Some(now);
        self.updated_at = now;
        self.token += 1;
    }

    /// Clear the hold. Returns `false` (and changes nothing) when the row was
    /// not held.
    pub fn release(&mut self, now: DateTime<Utc>) -> bool {
        if self.locked_at.is_none() {
            return false;
        }
        self.locked_at = None;
        self.updated_at = now;
        true
    }
}

/// Result of an acquisition request, as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub name: String,
    pub acquired: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Seconds the current holder has had the lock. Only set when the request
    /// was refused because of an existing hold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_since_locked: Option<i64>,

    pub token: u64,
}

impl Lock {
    pub fn acquired(row: &LockRow) -> Self {
        Self {
            name: row.name.clone(),
            acquired: true,
            locked_at: row.locked_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            duration_since_locked: None,
            token: row.token,
        }
    }

    pub fn refused(row: &LockRow, duration_since_locked: i64) -> Self {
        Self {
            name: row.name.clone(),
            acquired: false,
            locked_at: row.locked_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            duration_since_locked: Some(duration_since_locked),
            token: row.token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn new_row_is_held_with_matching_timestamps() {
        let row = LockRow::new_held("purge", t0());
        assert!(row.is_held());
        assert_eq!(row.locked_at, Some(t0()));
        assert_eq!(row.created_at, t0());
        assert_eq!(row.updated_at, t0());
        assert_eq!(row.token, 1);
    }

    #[test]
    fn release_keeps_created_at_and_is_idempotent() {
        let mut row = LockRow::new_held("purge", t0());
        let later = t0() + Duration::seconds(30);

        assert!(row.release(later));
        assert!(!row.is_held());
        assert_eq!(row.created_at, t0());
        assert_eq!(row.updated_at, later);

        let even_later = later + Duration::seconds(30);
        assert!(!row.release(even_later));
        assert_eq!(row.updated_at, later);
    }

    #[test]
    fn future_locked_at_counts_as_zero_elapsed() {
        let row = LockRow::new_held("purge", t0() + Duration::seconds(10));
        assert_eq!(row.seconds_since_locked(t0()), Some(0));
    }

    #[test]
    fn take_bumps_token() {
        let mut row = LockRow::new_held("purge", t0());
        row.take(t0() + Duration::seconds(1));
        assert_eq!(row.token, 2);
        assert_eq!(row.locked_at, Some(t0() + Duration::seconds(1)));
    }
}
