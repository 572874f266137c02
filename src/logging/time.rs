use chrono::{DateTime, NaiveDate, Utc};

pub const PARTITION_PREFIX: &str = "proxy-";
pub const PARTITION_SUFFIX: &str = ".jsonl";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// 日志按 UTC 自然日分区
pub fn partition_date(dt: &DateTime<Utc>) -> NaiveDate {
    dt.date_naive()
}

pub fn partition_file_name(date: NaiveDate) -> String {
    format!(
        "{}{}{}",
        PARTITION_PREFIX,
        date.format(DATE_FORMAT),
        PARTITION_SUFFIX
    )
}

/// Inverse of [`partition_file_name`]; `None` for files that are not log partitions.
pub fn parse_partition_file_name(name: &str) -> Option<NaiveDate> {
    let date = name
        .strip_prefix(PARTITION_PREFIX)?
        .strip_suffix(PARTITION_SUFFIX)?;
    NaiveDate::parse_from_str(date, DATE_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn partition_uses_utc_date() {
        let dt = Utc.with_ymd_and_hms(2026, 1, 20, 23, 59, 59).unwrap();
        assert_eq!(partition_file_name(partition_date(&dt)), "proxy-2026-01-20.jsonl");
    }

    #[test]
    fn parse_partition_file_name_round_trips_and_rejects_strangers() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(
            parse_partition_file_name(&partition_file_name(date)),
            Some(date)
        );
        assert_eq!(parse_partition_file_name("proxy-2026-13-01.jsonl"), None);
        assert_eq!(parse_partition_file_name("notes.txt"), None);
    }
}
