//! Visit activity policy.
//!
//! A visit is either active (no stop time) or closed (stop time set), and only ever moves from
//! active to closed. These functions decide when that move should happen and what the stop time
//! should be. They are pure: callers pass "now" and the inpatient classification.

use crate::location::LocationTree;
use crate::model::Visit;
use adt_types::LocationId;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

/// Hours of inactivity after which an open visit is closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpiryThresholds {
    pub outpatient_hours: u32,
    /// Inpatient visits are never closed automatically when this is `None`.
    pub inpatient_hours: Option<u32>,
}

/// Latest of the visit start and every non-voided encounter datetime.
pub fn last_activity(visit: &Visit) -> DateTime<Utc> {
    visit
        .non_voided_encounters()
        .map(|e| e.datetime)
        .fold(visit.start, |latest, at| latest.max(at))
}

/// Whole hours between the last activity and `now`.
pub fn hours_inactive(visit: &Visit, now: DateTime<Utc>) -> i64 {
    (now - last_activity(visit)).num_hours().abs()
}

/// Decide whether an open visit has been inactive long enough to close.
///
/// Closed visits always return `false`.
pub fn should_close(
    visit: &Visit,
    now: DateTime<Utc>,
    thresholds: ExpiryThresholds,
    is_inpatient: bool,
) -> bool {
    if visit.stop.is_some() {
        return false;
    }

    let inactive = hours_inactive(visit, now);
    if is_inpatient {
        return thresholds
            .inpatient_hours
            .is_some_and(|limit| i64::from(limit) <= inactive);
    }
    i64::from(thresholds.outpatient_hours) <= inactive
}

/// Stop time to record when closing: the most recent non-voided encounter, else the start.
pub fn infer_stop_time(visit: &Visit) -> DateTime<Utc> {
    visit
        .non_voided_encounters()
        .map(|e| e.datetime)
        .max()
        .unwrap_or(visit.start)
}

/// True if `when` falls inside the visit and `location` is inside the visit's location.
///
/// With `ignore_time` the visit is widened to whole days: from midnight of its start date to
/// the last millisecond of its stop date.
pub fn is_suitable_visit(
    tree: &LocationTree,
    visit: &Visit,
    location: Option<LocationId>,
    when: DateTime<Utc>,
    ignore_time: bool,
) -> bool {
    let (start, stop) = if ignore_time {
        (
            start_of_day(visit.start.date_naive()),
            visit.stop.map(|s| end_of_day(s.date_naive())),
        )
    } else {
        (visit.start, visit.stop)
    };

    if when < start {
        return false;
    }
    if stop.is_some_and(|stop| when > stop) {
        return false;
    }
    tree.is_same_or_ancestor(visit.location, location)
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    start_of_day(date) + Duration::days(1) - Duration::milliseconds(1)
}
