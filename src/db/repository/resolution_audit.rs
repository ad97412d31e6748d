use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_enum, parse_uuid};
use crate::db::DatabaseError;
use crate::models::ResolutionAuditEntry;

/// Append a batch of resolution entries. The table rejects updates and deletes.
pub fn insert_audit_entries(
    conn: &Connection,
    entries: &[ResolutionAuditEntry],
) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT INTO resolution_audit (id, job_id, conflict_id, field, action, strategy, decided_value, detail, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for e in entries {
        stmt.execute(params![
            e.id.to_string(),
            e.job_id.to_string(),
            e.conflict_id.map(|id| id.to_string()),
            e.field.map(|f| f.as_str()),
            e.action.as_str(),
            e.strategy.map(|s| s.as_str()),
            e.decided_value,
            e.detail,
            format_datetime(&e.recorded_at),
        ])?;
    }
    Ok(())
}

/// Full trail for a record, oldest first.
pub fn query_audit_by_job(
    conn: &Connection,
    job_id: &Uuid,
) -> Result<Vec<ResolutionAuditEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, job_id, conflict_id, field, action, strategy, decided_value, detail, recorded_at
         FROM resolution_audit WHERE job_id = ?1 ORDER BY recorded_at ASC, rowid ASC",
    )?;
    let rows = stmt
        .query_map(params![job_id.to_string()], |row| {
            let id_str: String = row.get(0)?;
            let job_str: String = row.get(1)?;
            let conflict_str: Option<String> = row.get(2)?;
            let field_str: Option<String> = row.get(3)?;
            let action_str: String = row.get(4)?;
            let strategy_str: Option<String> = row.get(5)?;
            let recorded_str: String = row.get(8)?;
            Ok(ResolutionAuditEntry {
                id: parse_uuid(0, &id_str)?,
                job_id: parse_uuid(1, &job_str)?,
                conflict_id: conflict_str.map(|s| parse_uuid(2, &s)).transpose()?,
                field: field_str.map(|s| parse_enum(3, &s)).transpose()?,
                action: parse_enum(4, &action_str)?,
                strategy: strategy_str.map(|s| parse_enum(5, &s)).transpose()?,
                decided_value: row.get(6)?,
                detail: row.get(7)?,
                recorded_at: parse_datetime(&recorded_str),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
