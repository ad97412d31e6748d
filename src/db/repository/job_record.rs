use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_enum, parse_uuid};
use crate::db::DatabaseError;
use crate::models::JobRecord;

const SELECT_COLUMNS: &str = "SELECT id, company, position, status, location, sender_domain,
        record_source, llm_confidence, field_metadata, needs_review, created_at, updated_at
 FROM job_records";

pub fn insert_job_record(conn: &Connection, record: &JobRecord) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO job_records (id, company, position, status, location, sender_domain,
            record_source, llm_confidence, field_metadata, needs_review, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            record.id.to_string(),
            record.company,
            record.position,
            record.status.map(|s| s.as_str()),
            record.location,
            record.sender_domain,
            record.record_source.as_str(),
            record.llm_confidence,
            serde_json::to_string(&record.field_metadata)?,
            record.needs_review as i32,
            format_datetime(&record.created_at),
            format_datetime(&record.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_job_record(conn: &Connection, id: &Uuid) -> Result<Option<JobRecord>, DatabaseError> {
    let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
    let record = conn
        .query_row(&sql, params![id.to_string()], row_to_job_record)
        .optional()?;
    Ok(record)
}

/// Overwrite every mutable column of an existing record.
pub fn update_job_record(conn: &Connection, record: &JobRecord) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE job_records SET company = ?2, position = ?3, status = ?4, location = ?5,
            sender_domain = ?6, record_source = ?7, llm_confidence = ?8, field_metadata = ?9,
            needs_review = ?10, updated_at = ?11
         WHERE id = ?1",
        params![
            record.id.to_string(),
            record.company,
            record.position,
            record.status.map(|s| s.as_str()),
            record.location,
            record.sender_domain,
            record.record_source.as_str(),
            record.llm_confidence,
            serde_json::to_string(&record.field_metadata)?,
            record.needs_review as i32,
            format_datetime(&record.updated_at),
        ],
    )?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "JobRecord".into(),
            id: record.id.to_string(),
        });
    }
    Ok(())
}

pub fn delete_job_record(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let affected = conn.execute("DELETE FROM job_records WHERE id = ?1", params![id.to_string()])?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "JobRecord".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

pub fn list_job_records(conn: &Connection) -> Result<Vec<JobRecord>, DatabaseError> {
    let sql = format!("{SELECT_COLUMNS} ORDER BY created_at DESC");
    query_records(conn, &sql, params![])
}

/// Records whose company contains `fragment` (case-insensitive).
pub fn find_records_by_company(
    conn: &Connection,
    fragment: &str,
) -> Result<Vec<JobRecord>, DatabaseError> {
    let sql = format!("{SELECT_COLUMNS} WHERE LOWER(company) LIKE LOWER(?1) ORDER BY created_at DESC");
    query_records(conn, &sql, params![format!("%{fragment}%")])
}

/// Records whose position contains `fragment` (case-insensitive).
pub fn find_records_by_position(
    conn: &Connection,
    fragment: &str,
) -> Result<Vec<JobRecord>, DatabaseError> {
    let sql =
        format!("{SELECT_COLUMNS} WHERE LOWER(position) LIKE LOWER(?1) ORDER BY created_at DESC");
    query_records(conn, &sql, params![format!("%{fragment}%")])
}

/// Records created at or after `since`.
pub fn find_records_since(
    conn: &Connection,
    since: &NaiveDateTime,
) -> Result<Vec<JobRecord>, DatabaseError> {
    let sql = format!("{SELECT_COLUMNS} WHERE created_at >= ?1 ORDER BY created_at DESC");
    query_records(conn, &sql, params![format_datetime(since)])
}

/// Records created from `domain` at or after `since`.
pub fn find_records_by_sender_domain(
    conn: &Connection,
    domain: &str,
    since: &NaiveDateTime,
) -> Result<Vec<JobRecord>, DatabaseError> {
    let sql = format!(
        "{SELECT_COLUMNS} WHERE LOWER(sender_domain) = LOWER(?1) AND created_at >= ?2
         ORDER BY created_at DESC"
    );
    query_records(conn, &sql, params![domain, format_datetime(since)])
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<JobRecord>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, row_to_job_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_job_record(row: &rusqlite::Row) -> Result<JobRecord, rusqlite::Error> {
    let id_str: String = row.get(0)?;
    let status_str: Option<String> = row.get(3)?;
    let source_str: String = row.get(6)?;
    let metadata_str: String = row.get(8)?;
    let created_str: String = row.get(10)?;
    let updated_str: String = row.get(11)?;

    Ok(JobRecord {
        id: parse_uuid(0, &id_str)?,
        company: row.get(1)?,
        position: row.get(2)?,
        status: status_str.map(|s| parse_enum(3, &s)).transpose()?,
        location: row.get(4)?,
        sender_domain: row.get(5)?,
        record_source: parse_enum(6, &source_str)?,
        llm_confidence: row.get(7)?,
        field_metadata: serde_json::from_str(&metadata_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?,
        needs_review: row.get::<_, i32>(9)? != 0,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}
