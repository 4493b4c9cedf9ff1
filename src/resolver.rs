use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::models::{ClassTemplate, Occurrence, ScheduleRule};

/// Expands a weekly schedule rule into concrete occurrences, lazily, one per
/// matching date in `[from, until)`. Pure and deterministic: safe to call
/// repeatedly and from any number of tasks.
pub fn occurrences<'a>(
    template: &'a ClassTemplate,
    rule: &'a ScheduleRule,
    tz: Tz,
    from: NaiveDate,
    until: NaiveDate,
) -> OccurrenceIter<'a> {
    let start = match rule.valid_from {
        Some(valid_from) if valid_from > from => valid_from,
        _ => from,
    };
    OccurrenceIter {
        template,
        rule,
        tz,
        cursor: Some(align_to_weekday(start, rule.weekday)),
        until,
    }
}

/// Validates one candidate start instant against a rule. Returns the
/// occurrence only when the instant is exactly what this rule resolves to on
/// that date; fabricated timestamps (wrong time, wrong weekday, the later
/// leg of an ambiguous DST wall time) come back as `None`.
pub fn resolve_at(
    template: &ClassTemplate,
    rule: &ScheduleRule,
    tz: Tz,
    requested: DateTime<Utc>,
) -> Option<Occurrence> {
    if !rule.active {
        return None;
    }
    let local = requested.with_timezone(&tz);
    let date = local.date_naive();
    if weekday_index(date) != rule.weekday || local.time() != rule.start_time {
        return None;
    }
    if let Some(valid_from) = rule.valid_from
        && date < valid_from
    {
        return None;
    }
    if let Some(valid_until) = rule.valid_until
        && date > valid_until
    {
        return None;
    }
    let occurrence = compose(template, rule, tz, date)?;
    (occurrence.start.with_timezone(&Utc) == requested).then_some(occurrence)
}

pub struct OccurrenceIter<'a> {
    template: &'a ClassTemplate,
    rule: &'a ScheduleRule,
    tz: Tz,
    cursor: Option<NaiveDate>,
    until: NaiveDate,
}

impl Iterator for OccurrenceIter<'_> {
    type Item = Occurrence;

    fn next(&mut self) -> Option<Occurrence> {
        if !self.rule.active {
            return None;
        }
        loop {
            let date = self.cursor?;
            if date >= self.until {
                self.cursor = None;
                return None;
            }
            if let Some(valid_until) = self.rule.valid_until
                && date > valid_until
            {
                self.cursor = None;
                return None;
            }
            self.cursor = Some(date + Duration::days(7));
            if let Some(occurrence) = compose(self.template, self.rule, self.tz, date) {
                return Some(occurrence);
            }
            // The rule's wall time does not exist on this date (DST gap).
        }
    }
}

fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_monday() as u8
}

fn align_to_weekday(date: NaiveDate, weekday: u8) -> NaiveDate {
    let ahead = (i64::from(weekday) - i64::from(weekday_index(date))).rem_euclid(7);
    date + Duration::days(ahead)
}

/// Composes a rule's wall times with a concrete date using the timezone rule
/// in effect on that date. Ambiguous wall times (DST fall-back) resolve to
/// the earlier instant; nonexistent wall times (spring-forward gap) yield
/// `None`.
fn compose(template: &ClassTemplate, rule: &ScheduleRule, tz: Tz, date: NaiveDate) -> Option<Occurrence> {
    use chrono::TimeZone;

    let start = tz
        .from_local_datetime(&date.and_time(rule.start_time))
        .earliest()?;
    let end = tz
        .from_local_datetime(&date.and_time(rule.end_time))
        .earliest()?;
    Some(Occurrence {
        template_id: template.id.clone(),
        rule_id: rule.id.clone(),
        name: template.name.clone(),
        instructor: template.instructor.clone(),
        location_id: template.location_id.clone(),
        start: start.fixed_offset(),
        end: end.fixed_offset(),
        capacity: template.capacity,
    })
}
