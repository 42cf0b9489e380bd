use crate::model::config::Schedule;
use chrono::{Datelike, NaiveDate, Weekday};

/// Whether an instance with `schedule` is due on `today`.
///
/// Unrecognized schedules never run.
pub fn should_run(schedule: &Schedule, today: NaiveDate) -> bool {
    match schedule {
        Schedule::Daily => true,
        Schedule::Weekly => today.weekday() == Weekday::Sun,
        Schedule::Monthly => today.day() == 1,
        Schedule::Other(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn daily_always_runs() {
        let mut day = date(2024, 1, 1);
        while day < date(2025, 1, 1) {
            assert!(should_run(&Schedule::Daily, day));
            day = day.succ_opt().unwrap();
        }
    }

    #[test]
    fn weekly_runs_on_sundays_only() {
        let mut day = date(2024, 1, 1);
        while day < date(2025, 1, 1) {
            assert_eq!(
                should_run(&Schedule::Weekly, day),
                day.weekday() == Weekday::Sun,
                "{}",
                day
            );
            day = day.succ_opt().unwrap();
        }
        // 2024-09-01 was a Sunday and the first of the month
        assert!(should_run(&Schedule::Weekly, date(2024, 9, 1)));
    }

    #[test]
    fn monthly_runs_on_the_first_regardless_of_weekday() {
        let mut day = date(2024, 1, 1);
        while day < date(2025, 1, 1) {
            assert_eq!(should_run(&Schedule::Monthly, day), day.day() == 1, "{}", day);
            day = day.succ_opt().unwrap();
        }
    }

    #[test]
    fn unknown_schedule_never_runs() {
        for raw in ["hourly", "", "sunday"] {
            assert!(!should_run(&Schedule::from(raw), date(2024, 9, 1)));
        }
    }
}
