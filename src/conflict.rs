use chrono::{DateTime, Utc};

use crate::models::Reservation;

/// Finds a confirmed reservation whose occurrence window overlaps the
/// candidate window (half-open comparison: touching edges do not overlap).
/// Callers run this inside the member's lock so the check is a
/// serialization point, not advisory.
pub fn find_overlap<'a>(
    held: &'a [Reservation],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<&'a Reservation> {
    held.iter()
        .find(|r| start < r.occurrence_end && end > r.occurrence_start)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::models::{Occurrence, Reservation};

    fn reservation(start_hour: u32, end_hour: u32) -> Reservation {
        let day = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        let occurrence = Occurrence {
            template_id: "spinning".to_string(),
            rule_id: "spinning-mon".to_string(),
            name: "Spinning".to_string(),
            instructor: "Marta".to_string(),
            location_id: "centro".to_string(),
            start: (day + Duration::hours(start_hour as i64)).fixed_offset(),
            end: (day + Duration::hours(end_hour as i64)).fixed_offset(),
            capacity: 2,
        };
        Reservation::confirmed("member-a", &occurrence, day)
    }

    fn window(start_hour: i64, end_hour: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let day = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        (day + Duration::hours(start_hour), day + Duration::hours(end_hour))
    }

    #[test]
    fn test_partial_overlap_detected() {
        let held = [reservation(6, 7)];
        let (start, end) = window(6, 8);
        assert!(find_overlap(&held, start, end).is_some());
        let (start, end) = window(5, 7);
        assert!(find_overlap(&held, start, end).is_some());
    }

    #[test]
    fn test_contained_window_detected() {
        let held = [reservation(6, 8)];
        let (start, end) = window(6, 7);
        assert!(find_overlap(&held, start, end).is_some());
    }

    #[test]
    fn test_touching_edges_do_not_overlap() {
        let held = [reservation(6, 7)];
        let (start, end) = window(7, 8);
        assert!(find_overlap(&held, start, end).is_none());
        let (start, end) = window(5, 6);
        assert!(find_overlap(&held, start, end).is_none());
    }

    #[test]
    fn test_disjoint_windows_pass() {
        let held = [reservation(6, 7), reservation(9, 10)];
        let (start, end) = window(7, 9);
        assert!(find_overlap(&held, start, end).is_none());
    }
}
