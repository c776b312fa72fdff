//! IdGenerator port - RunId の生成
//!
//! # 実装
//! - **UlidGenerator**: 注入した Clock の時刻 + 乱数ビットから ULID を生成

use crate::domain::ids::RunId;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator hands out ids that are unique across processes.
pub trait IdGenerator: Send + Sync {
    fn generate_run_id(&self) -> RunId;
}

/// ULID generator whose timestamp part comes from `C`.
///
/// With a `FixedClock` the timestamp is deterministic while the random part
/// still keeps ids distinct.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_run_id(&self) -> RunId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        RunId::from(ulid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_run_id();
        let id2 = id_gen.generate_run_id();
        let id3 = id_gen.generate_run_id();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn ulid_generator_with_fixed_clock_is_deterministic_in_time() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_run_id();
        let id2 = id_gen.generate_run_id();

        // random part differs
        assert_ne!(id1, id2);

        assert_eq!(id1.as_ulid().timestamp_ms(), id2.as_ulid().timestamp_ms());
        assert_eq!(
            id1.as_ulid().timestamp_ms(),
            fixed_time.timestamp_millis() as u64
        );
    }

    #[test]
    fn generated_ids_display_with_run_prefix() {
        let id_gen = UlidGenerator::new(SystemClock);
        assert!(id_gen.generate_run_id().to_string().starts_with("run-"));
    }
}
