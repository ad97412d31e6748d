use rusqlite::{params, Connection, OptionalExtension};

use super::parse_enum;
use crate::db::DatabaseError;
use crate::models::ClassificationResult;

/// A persisted Stage 1 classification with its creation time in unix millis.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedClassification {
    pub content_hash: String,
    pub result: ClassificationResult,
    pub created_at_ms: i64,
}

/// Insert or replace the classification for a content hash.
pub fn upsert_persisted_classification(
    conn: &Connection,
    entry: &PersistedClassification,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO classification_cache (content_hash, is_job_related, risk_level, created_at_ms)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(content_hash) DO UPDATE SET
           is_job_related = excluded.is_job_related,
           risk_level = excluded.risk_level,
           created_at_ms = excluded.created_at_ms",
        params![
            entry.content_hash,
            entry.result.is_job_related as i32,
            entry.result.risk_level.as_str(),
            entry.created_at_ms,
        ],
    )?;
    Ok(())
}

/// Classification for a content hash created at or after `min_created_at_ms`.
pub fn get_persisted_classification(
    conn: &Connection,
    content_hash: &str,
    min_created_at_ms: i64,
) -> Result<Option<PersistedClassification>, DatabaseError> {
    let entry = conn
        .query_row(
            "SELECT content_hash, is_job_related, risk_level, created_at_ms
             FROM classification_cache WHERE content_hash = ?1 AND created_at_ms > ?2",
            params![content_hash, min_created_at_ms],
            |row| {
                let risk_str: String = row.get(2)?;
                Ok(PersistedClassification {
                    content_hash: row.get(0)?,
                    result: ClassificationResult {
                        is_job_related: row.get::<_, i32>(1)? != 0,
                        risk_level: parse_enum(2, &risk_str)?,
                    },
                    created_at_ms: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(entry)
}

/// Delete rows created at or before `cutoff_ms`.
pub fn prune_persisted_classifications(
    conn: &Connection,
    cutoff_ms: i64,
) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM classification_cache WHERE created_at_ms <= ?1",
        params![cutoff_ms],
    )?;
    Ok(deleted)
}

pub fn delete_persisted_classification(
    conn: &Connection,
    content_hash: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM classification_cache WHERE content_hash = ?1",
        params![content_hash],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::RiskLevel;

    fn entry(hash: &str, at: i64) -> PersistedClassification {
        PersistedClassification {
            content_hash: hash.into(),
            result: ClassificationResult {
                is_job_related: true,
                risk_level: RiskLevel::Low,
            },
            created_at_ms: at,
        }
    }

    #[test]
    fn upsert_and_get() {
        let conn = open_memory_database().unwrap();
        upsert_persisted_classification(&conn, &entry("h1", 1_000)).unwrap();
        let loaded = get_persisted_classification(&conn, "h1", 0).unwrap().unwrap();
        assert!(loaded.result.is_job_related);
        assert_eq!(loaded.result.risk_level, RiskLevel::Low);
    }

    #[test]
    fn stale_rows_are_hidden() {
        let conn = open_memory_database().unwrap();
        upsert_persisted_classification(&conn, &entry("h1", 1_000)).unwrap();
        assert!(get_persisted_classification(&conn, "h1", 1_000).unwrap().is_none());
        assert!(get_persisted_classification(&conn, "h1", 999).unwrap().is_some());
    }

    #[test]
    fn prune_removes_old_rows() {
        let conn = open_memory_database().unwrap();
        upsert_persisted_classification(&conn, &entry("old", 1_000)).unwrap();
        upsert_persisted_classification(&conn, &entry("new", 5_000)).unwrap();
        assert_eq!(prune_persisted_classifications(&conn, 2_000).unwrap(), 1);
        assert!(get_persisted_classification(&conn, "new", 0).unwrap().is_some());
        delete_persisted_classification(&conn, "new").unwrap();
        assert!(get_persisted_classification(&conn, "new", 0).unwrap().is_none());
    }
}
