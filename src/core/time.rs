use time::{format_description::well_known::Rfc3339, OffsetDateTime, PrimitiveDateTime};

/// Timestamps are stored as naive UTC.
pub(crate) fn primitive_now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

pub(crate) fn minutes_ago(minutes: i64) -> PrimitiveDateTime {
    primitive_now_utc() - time::Duration::minutes(minutes)
}

pub(crate) fn format_primitive(value: PrimitiveDateTime) -> String {
    value.assume_utc().format(&Rfc3339).unwrap_or_else(|_| value.assume_utc().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Date, Time};

    #[test]
    fn format_primitive_outputs_utc_z() {
        let date = Date::from_calendar_date(2026, time::Month::March, 2).unwrap();
        let time = Time::from_hms(8, 5, 0).unwrap();
        assert_eq!(format_primitive(PrimitiveDateTime::new(date, time)), "2026-03-02T08:05:00Z");
    }

    #[test]
    fn minutes_ago_is_in_the_past() {
        let cutoff = minutes_ago(10);
        let now = primitive_now_utc();
        let elapsed = now - cutoff;
        assert!(elapsed >= time::Duration::minutes(10));
        assert!(elapsed < time::Duration::minutes(11));
    }
}
