//! Review queue for conflicts that could not be resolved automatically.
//!
//! Rows stay `pending` until a decision is recorded, then move to
//! `resolved` or `dismissed`. Rows are never deleted here.

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_enum, parse_uuid};
use crate::db::DatabaseError;
use crate::models::{ConflictRecord, ConflictReview, RecordSource, ReviewStatus};

const SELECT_COLUMNS: &str = "SELECT id, job_id, field, conflict_type, severity, manual_value,
        llm_value, confidence, strategy, incoming_source, status, decided_value, created_at, resolved_at
 FROM conflict_reviews";

/// Queue conflicts for review in one transaction.
pub fn store_conflict_reviews(
    conn: &Connection,
    conflicts: &[ConflictRecord],
    incoming_source: RecordSource,
    created_at: &NaiveDateTime,
) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    for c in conflicts {
        tx.execute(
            "INSERT INTO conflict_reviews (id, job_id, field, conflict_type, severity, manual_value,
                llm_value, confidence, strategy, incoming_source, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', ?11)",
            params![
                c.id.to_string(),
                c.job_id.to_string(),
                c.field.as_str(),
                c.conflict_type.as_str(),
                c.severity.as_str(),
                c.manual_value,
                c.llm_value,
                c.confidence_of_new_data,
                c.strategy.as_str(),
                incoming_source.as_str(),
                format_datetime(created_at),
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

pub fn get_conflict_review(
    conn: &Connection,
    id: &Uuid,
) -> Result<Option<ConflictReview>, DatabaseError> {
    let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
    let review = conn
        .query_row(&sql, params![id.to_string()], row_to_review)
        .optional()?;
    Ok(review)
}

/// All pending reviews, oldest first.
pub fn get_pending_reviews(conn: &Connection) -> Result<Vec<ConflictReview>, DatabaseError> {
    let sql = format!("{SELECT_COLUMNS} WHERE status = 'pending' ORDER BY created_at ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], row_to_review)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_pending_reviews_for_job(conn: &Connection, job_id: &Uuid) -> Result<u32, DatabaseError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM conflict_reviews WHERE job_id = ?1 AND status = 'pending'",
        params![job_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Close a pending review. Fails with `NotFound` if the review is missing
/// or already closed.
pub fn close_conflict_review(
    conn: &Connection,
    id: &Uuid,
    status: ReviewStatus,
    decided_value: Option<&str>,
    resolved_at: &NaiveDateTime,
) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE conflict_reviews SET status = ?2, decided_value = ?3, resolved_at = ?4
         WHERE id = ?1 AND status = 'pending'",
        params![
            id.to_string(),
            status.as_str(),
            decided_value,
            format_datetime(resolved_at),
        ],
    )?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "ConflictReview".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

fn row_to_review(row: &rusqlite::Row) -> Result<ConflictReview, rusqlite::Error> {
    let id_str: String = row.get(0)?;
    let job_str: String = row.get(1)?;
    let field_str: String = row.get(2)?;
    let type_str: String = row.get(3)?;
    let severity_str: String = row.get(4)?;
    let strategy_str: String = row.get(8)?;
    let source_str: String = row.get(9)?;
    let status_str: String = row.get(10)?;
    let created_str: String = row.get(12)?;
    let resolved_str: Option<String> = row.get(13)?;

    Ok(ConflictReview {
        conflict: ConflictRecord {
            id: parse_uuid(0, &id_str)?,
            job_id: parse_uuid(1, &job_str)?,
            field: parse_enum(2, &field_str)?,
            conflict_type: parse_enum(3, &type_str)?,
            severity: parse_enum(4, &severity_str)?,
            manual_value: row.get(5)?,
            llm_value: row.get(6)?,
            confidence_of_new_data: row.get(7)?,
            strategy: parse_enum(8, &strategy_str)?,
        },
        incoming_source: parse_enum(9, &source_str)?,
        status: parse_enum(10, &status_str)?,
        decided_value: row.get(11)?,
        created_at: parse_datetime(&created_str),
        resolved_at: resolved_str.map(|s| parse_datetime(&s)),
    })
}
