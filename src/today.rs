use chrono::{DateTime, Local};

/// Same local calendar day, not a rolling 24h window.
pub fn is_today(instant: &DateTime<Local>, reference_now: &DateTime<Local>) -> bool {
    instant.date_naive() == reference_now.date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, min, s).earliest().unwrap()
    }

    #[test]
    fn test_same_day_bounds() {
        let start = local(2024, 5, 10, 0, 0, 0);
        assert!(is_today(&start, &start));
        assert!(is_today(&(start + Duration::hours(23) + Duration::minutes(59) + Duration::seconds(59)), &start));
        assert!(!is_today(&(start - Duration::microseconds(1)), &start));
    }

    #[test]
    fn test_not_a_rolling_window() {
        let late = local(2024, 5, 10, 23, 30, 0);
        let next_morning = local(2024, 5, 11, 0, 15, 0);
        assert!(next_morning - late < Duration::hours(1));
        assert!(!is_today(&next_morning, &late));

        let early = local(2024, 5, 10, 0, 5, 0);
        assert!(is_today(&late, &early));
    }

    #[test]
    fn test_other_years_and_months() {
        let now = local(2024, 5, 10, 12, 0, 0);
        assert!(!is_today(&local(2023, 5, 10, 12, 0, 0), &now));
        assert!(!is_today(&local(2024, 6, 10, 12, 0, 0), &now));
    }
}
