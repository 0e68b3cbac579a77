//! Layer 3: Tombstones
//!
//! A deleted-object marker. Databases carry an unordered set keyed by UUID;
//! when the two sides of a merge disagree, the earlier deletion stamp wins
//! (it is the one nearest the actual delete event).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedObject {
    pub uuid: Uuid,
    pub deletion_time: Timestamp,
}

impl DeletedObject {
    pub fn new(uuid: Uuid, deletion_time: Timestamp) -> Self {
        Self {
            uuid,
            deletion_time,
        }
    }

    /// Merge: keep the earlier deletion stamp.
    pub fn join(a: &Self, b: &Self) -> Self {
        debug_assert_eq!(a.uuid, b.uuid, "join requires same uuid");
        if a.deletion_time <= b.deletion_time {
            *a
        } else {
            *b
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::macros::datetime;

    fn stamp(secs: i64) -> Timestamp {
        Timestamp::new(datetime!(2021-01-01 00:00:00 UTC)).offset_by(time::Duration::seconds(secs))
    }

    fn uuid(seed: u8) -> Uuid {
        Uuid::from_bytes([seed; 16])
    }

    #[test]
    fn join_keeps_earlier_deletion() {
        let t1 = DeletedObject::new(uuid(1), stamp(100));
        let t2 = DeletedObject::new(uuid(1), stamp(200));

        assert_eq!(DeletedObject::join(&t1, &t2).deletion_time, stamp(100));
        assert_eq!(DeletedObject::join(&t2, &t1).deletion_time, stamp(100));
    }

    #[test]
    fn join_same_stamp_left_wins() {
        let t1 = DeletedObject::new(uuid(1), stamp(100));
        let t2 = DeletedObject::new(uuid(1), stamp(100));
        assert_eq!(DeletedObject::join(&t1, &t2), t1);
    }

    fn tombstone_strategy() -> impl Strategy<Value = DeletedObject> {
        (0i64..10_000).prop_map(|secs| DeletedObject::new(uuid(7), stamp(secs)))
    }

    proptest! {
        #[test]
        fn prop_join_commutative_with_distinct_stamps(
            t1 in tombstone_strategy(),
            mut t2 in tombstone_strategy()
        ) {
            if t1.deletion_time == t2.deletion_time {
                t2.deletion_time = t2.deletion_time.offset_by(time::Duration::seconds(1));
            }

            let m1 = DeletedObject::join(&t1, &t2);
            let m2 = DeletedObject::join(&t2, &t1);

            prop_assert_eq!(m1, m2);
            prop_assert!(m1.deletion_time <= t1.deletion_time);
            prop_assert!(m1.deletion_time <= t2.deletion_time);
        }

        #[test]
        fn prop_join_idempotent(t in tombstone_strategy()) {
            prop_assert_eq!(DeletedObject::join(&t, &t), t);
        }

        #[test]
        fn prop_join_associative(
            t1 in tombstone_strategy(),
            t2 in tombstone_strategy(),
            t3 in tombstone_strategy()
        ) {
            let m1 = DeletedObject::join(&DeletedObject::join(&t1, &t2), &t3);
            let m2 = DeletedObject::join(&t1, &DeletedObject::join(&t2, &t3));
            prop_assert_eq!(m1, m2);
        }
    }
}
