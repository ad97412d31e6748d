//! Repository layer: entity-scoped database operations.
//!
//! Free functions over a borrowed `Connection`; callers own locking.

mod classification_cache;
mod conflict_review;
mod field_history;
mod job_record;
mod linked_email;
mod resolution_audit;

use chrono::NaiveDateTime;

pub use classification_cache::*;
pub use conflict_review::*;
pub use field_history::*;
pub use job_record::*;
pub use linked_email::*;
pub use resolution_audit::*;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

pub(crate) fn parse_datetime(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).unwrap_or_default()
}

pub(crate) fn parse_uuid(idx: usize, s: &str) -> Result<uuid::Uuid, rusqlite::Error> {
    uuid::Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_enum<T>(idx: usize, s: &str) -> Result<T, rusqlite::Error>
where
    T: std::str::FromStr<Err = super::DatabaseError>,
{
    s.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;

    #[test]
    fn datetime_round_trips_at_second_precision() {
        let dt = chrono::NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(9, 26, 53)
            .unwrap();
        assert_eq!(parse_datetime(&format_datetime(&dt)), dt);
    }

    #[test]
    fn bad_enum_becomes_conversion_failure() {
        let err = parse_enum::<JobStatus>(3, "ghosted").unwrap_err();
        assert!(matches!(err, rusqlite::Error::FromSqlConversionFailure(3, _, _)));
    }
}
