//! Calendar-style repeat schedules.
//!
//! A schedule is a set of cron expressions (seconds granularity, UTC) plus
//! optional exception expressions. The next occurrence is the earliest
//! instant strictly after the last one that matches any schedule and no
//! exception. Computation is a pure function of its inputs so it can be
//! exercised without a clock.

use crate::domain::error::{DomainError, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Candidates skipped per schedule before giving up on finding one outside
/// every exception window
const MAX_EXCEPTION_SKIPS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSchedule {
    pub schedules: Vec<String>,
    #[serde(default)]
    pub exceptions: Vec<String>,
}

impl CalendarSchedule {
    pub fn new(schedules: Vec<String>, exceptions: Vec<String>) -> Self {
        Self {
            schedules,
            exceptions,
        }
    }

    /// Reject empty or unparseable expressions
    pub fn validate(&self) -> Result<()> {
        if self.schedules.is_empty() {
            return Err(DomainError::InvalidSchedule(
                "schedule needs at least one expression".to_string(),
            ));
        }
        parse_all(&self.schedules)?;
        parse_all(&self.exceptions)?;
        Ok(())
    }
}

fn parse_all(expressions: &[String]) -> Result<Vec<Schedule>> {
    expressions
        .iter()
        .map(|expr| {
            Schedule::from_str(expr)
                .map_err(|e| DomainError::InvalidSchedule(format!("{}: {}", expr, e)))
        })
        .collect()
}

/// Next occurrence strictly after `last` (epoch ms), or `None` when the
/// schedule has no further instant outside its exceptions.
pub fn next_occurrence(last: i64, schedule: &CalendarSchedule) -> Result<Option<i64>> {
    let schedules = parse_all(&schedule.schedules)?;
    let exceptions = parse_all(&schedule.exceptions)?;

    let start: DateTime<Utc> = DateTime::from_timestamp_millis(last)
        .ok_or_else(|| DomainError::InvalidSchedule(format!("timestamp out of range: {}", last)))?;

    let next = schedules
        .iter()
        .filter_map(|s| {
            s.after(&start)
                .take(MAX_EXCEPTION_SKIPS)
                .find(|candidate| !exceptions.iter().any(|e| e.includes(*candidate)))
        })
        .min();

    Ok(next.map(|dt| dt.timestamp_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_next_top_of_hour() {
        let schedule = CalendarSchedule::new(vec!["0 0 * * * *".to_string()], vec![]);
        let next = next_occurrence(ms(2024, 3, 1, 10, 15, 0), &schedule).unwrap();
        assert_eq!(next, Some(ms(2024, 3, 1, 11, 0, 0)));
    }

    #[test]
    fn test_next_is_strictly_after_last() {
        let schedule = CalendarSchedule::new(vec!["0 0 * * * *".to_string()], vec![]);
        let next = next_occurrence(ms(2024, 3, 1, 11, 0, 0), &schedule).unwrap();
        assert_eq!(next, Some(ms(2024, 3, 1, 12, 0, 0)));
    }

    #[test]
    fn test_earliest_of_several_schedules() {
        let schedule = CalendarSchedule::new(
            vec!["0 30 18 * * *".to_string(), "0 0 12 * * *".to_string()],
            vec![],
        );
        let next = next_occurrence(ms(2024, 3, 1, 10, 0, 0), &schedule).unwrap();
        assert_eq!(next, Some(ms(2024, 3, 1, 12, 0, 0)));
    }

    #[test]
    fn test_exception_skips_weekend() {
        // Daily at 09:00, except Saturdays and Sundays. 2024-03-01 is a Friday.
        let schedule = CalendarSchedule::new(
            vec!["0 0 9 * * *".to_string()],
            vec!["* * * * * Sat,Sun".to_string()],
        );
        let next = next_occurrence(ms(2024, 3, 1, 10, 0, 0), &schedule).unwrap();
        assert_eq!(next, Some(ms(2024, 3, 4, 9, 0, 0)));
    }

    #[test]
    fn test_schedule_with_no_future_instant() {
        let schedule = CalendarSchedule::new(vec!["0 0 0 1 1 * 2020".to_string()], vec![]);
        let next = next_occurrence(ms(2024, 1, 1, 0, 0, 0), &schedule).unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn test_validate_rejects_garbage() {
        assert!(CalendarSchedule::new(vec![], vec![]).validate().is_err());
        assert!(CalendarSchedule::new(vec!["every tuesday".to_string()], vec![])
            .validate()
            .is_err());
        assert!(CalendarSchedule::new(vec!["0 0 9 * * *".to_string()], vec![])
            .validate()
            .is_ok());
    }
}
