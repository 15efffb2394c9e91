//! Attendance decisions: status classification and check-in deduplication.

use crate::types::{AttendanceRecord, AttendanceStatus, Identity};
use chrono::{DateTime, TimeZone, Timelike};

/// Local hour of the on-time cutoff (09:00).
pub const CUTOFF_HOUR: u32 = 9;

/// Two check-ins for the same identity closer than this are duplicates.
pub const DEDUP_WINDOW_MILLIS: i64 = 60_000;

/// Classify a local wall-clock time against the 09:00 cutoff.
///
/// Minute granularity: anything up to 09:00:59 is on time.
pub fn classify<T: Timelike>(local_time: &T) -> AttendanceStatus {
    let hour = local_time.hour();
    let minute = local_time.minute();
    if hour > CUTOFF_HOUR || (hour == CUTOFF_HOUR && minute > 0) {
        AttendanceStatus::Late
    } else {
        AttendanceStatus::OnTime
    }
}

/// Whether `candidate` falls inside the dedup window of an existing record
/// for the same identity.
///
/// The window is measured against the candidate's own timestamp, in both
/// directions.
pub fn is_duplicate(log: &[AttendanceRecord], candidate: &AttendanceRecord) -> bool {
    log.iter().any(|existing| {
        existing.identity_id == candidate.identity_id
            && (candidate.timestamp_epoch_millis - existing.timestamp_epoch_millis).abs()
                < DEDUP_WINDOW_MILLIS
    })
}

/// Durable destination for accepted check-ins.
///
/// Implementations must apply [`is_duplicate`] and the write atomically.
pub trait AttendanceSink {
    type Error;

    /// Append `record` at the head of the log unless it is a duplicate.
    /// Returns whether the record was written.
    fn append_if_not_duplicate(&self, record: AttendanceRecord) -> Result<bool, Self::Error>;
}

impl<T: AttendanceSink + ?Sized> AttendanceSink for std::sync::Arc<T> {
    type Error = T::Error;

    fn append_if_not_duplicate(&self, record: AttendanceRecord) -> Result<bool, Self::Error> {
        (**self).append_if_not_duplicate(record)
    }
}

/// Outcome of a single recognition event.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Recorded(AttendanceRecord),
    Duplicate,
}

/// Turns recognition events into persisted attendance records.
pub struct DecisionEngine<S> {
    sink: S,
}

impl<S: AttendanceSink> DecisionEngine<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Decide whether `identity`, seen at `moment`, produces a new record.
    pub fn decide<Tz: TimeZone>(
        &self,
        identity: &Identity,
        moment: &DateTime<Tz>,
    ) -> Result<Decision, S::Error> {
        let record = AttendanceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            identity_id: identity.id.clone(),
            identity_name: identity.display_name.clone(),
            timestamp_epoch_millis: moment.timestamp_millis(),
            status: classify(&moment.time()),
        };

        if self.sink.append_if_not_duplicate(record.clone())? {
            tracing::info!(
                identity = %identity.id,
                name = %identity.display_name,
                status = %record.status,
                "attendance recorded"
            );
            Ok(Decision::Recorded(record))
        } else {
            tracing::debug!(identity = %identity.id, "check-in inside dedup window; dropped");
            Ok(Decision::Duplicate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Descriptor;
    use chrono::{NaiveTime, Utc};
    use std::cell::RefCell;
    use std::convert::Infallible;

    #[derive(Default)]
    struct MemorySink {
        log: RefCell<Vec<AttendanceRecord>>,
    }

    impl AttendanceSink for MemorySink {
        type Error = Infallible;

        fn append_if_not_duplicate(&self, record: AttendanceRecord) -> Result<bool, Infallible> {
            let mut log = self.log.borrow_mut();
            if is_duplicate(&log, &record) {
                return Ok(false);
            }
            log.insert(0, record);
            Ok(true)
        }
    }

    fn time(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn record(identity: &str, ts: i64) -> AttendanceRecord {
        AttendanceRecord {
            id: format!("{identity}-{ts}"),
            identity_id: identity.into(),
            identity_name: identity.into(),
            timestamp_epoch_millis: ts,
            status: AttendanceStatus::OnTime,
        }
    }

    fn alice() -> Identity {
        Identity {
            id: "alice".into(),
            display_name: "Alice".into(),
            role_label: "Member".into(),
            descriptor: Descriptor(vec![0.0; 4]),
            registered_at_epoch_millis: 0,
        }
    }

    #[test]
    fn test_classify_before_cutoff() {
        assert_eq!(classify(&time(0, 0, 0)), AttendanceStatus::OnTime);
        assert_eq!(classify(&time(8, 59, 59)), AttendanceStatus::OnTime);
    }

    #[test]
    fn test_classify_cutoff_minute_is_on_time() {
        assert_eq!(classify(&time(9, 0, 0)), AttendanceStatus::OnTime);
        assert_eq!(classify(&time(9, 0, 1)), AttendanceStatus::OnTime);
        assert_eq!(classify(&time(9, 0, 59)), AttendanceStatus::OnTime);
    }

    #[test]
    fn test_classify_after_cutoff() {
        assert_eq!(classify(&time(9, 1, 0)), AttendanceStatus::Late);
        assert_eq!(classify(&time(10, 0, 0)), AttendanceStatus::Late);
        assert_eq!(classify(&time(23, 59, 59)), AttendanceStatus::Late);
    }

    #[test]
    fn test_duplicate_inside_window() {
        let log = vec![record("alice", 1_000)];
        assert!(is_duplicate(&log, &record("alice", 1_000 + 59_999)));
    }

    #[test]
    fn test_not_duplicate_at_window_edge() {
        let log = vec![record("alice", 1_000)];
        assert!(!is_duplicate(&log, &record("alice", 1_000 + 60_000)));
    }

    #[test]
    fn test_window_is_symmetric() {
        // A late-arriving write with an older timestamp is still suppressed
        let log = vec![record("alice", 100_000)];
        assert!(is_duplicate(&log, &record("alice", 100_000 - 30_000)));
        assert!(!is_duplicate(&log, &record("alice", 100_000 - 60_000)));
    }

    #[test]
    fn test_other_identity_is_not_duplicate() {
        let log = vec![record("alice", 1_000)];
        assert!(!is_duplicate(&log, &record("bob", 1_000)));
    }

    #[test]
    fn test_decide_scenario_alice() {
        let engine = DecisionEngine::new(MemorySink::default());
        let at = |ms: i64| Utc.timestamp_millis_opt(ms).unwrap();

        let first = engine.decide(&alice(), &at(100)).unwrap();
        assert!(matches!(first, Decision::Recorded(_)));

        let second = engine.decide(&alice(), &at(50_000)).unwrap();
        assert_eq!(second, Decision::Duplicate);

        let third = engine.decide(&alice(), &at(200_000)).unwrap();
        let Decision::Recorded(rec) = third else {
            panic!("expected a second record");
        };
        assert_eq!(rec.timestamp_epoch_millis, 200_000);

        let log = engine.sink().log.borrow();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].timestamp_epoch_millis, 200_000);
        assert_eq!(log[1].timestamp_epoch_millis, 100);
    }

    #[test]
    fn test_decide_fills_record_from_identity() {
        let engine = DecisionEngine::new(MemorySink::default());
        // 10:30 UTC
        let moment = Utc.timestamp_millis_opt(10 * 3_600_000 + 30 * 60_000).unwrap();

        let Decision::Recorded(rec) = engine.decide(&alice(), &moment).unwrap() else {
            panic!("expected a record");
        };
        assert_eq!(rec.identity_id, "alice");
        assert_eq!(rec.identity_name, "Alice");
        assert_eq!(rec.status, AttendanceStatus::Late);
        assert!(uuid::Uuid::parse_str(&rec.id).is_ok());
    }
}
