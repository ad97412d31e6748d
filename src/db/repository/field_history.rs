use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_enum, parse_uuid};
use crate::db::DatabaseError;
use crate::models::FieldHistoryEntry;

/// Append field history entries. The table rejects updates and deletes.
pub fn append_field_history(
    conn: &Connection,
    entries: &[FieldHistoryEntry],
) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT INTO field_history (job_id, field, old_value, new_value, source, strategy, confidence, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for e in entries {
        stmt.execute(params![
            e.job_id.to_string(),
            e.field.as_str(),
            e.old_value,
            e.new_value,
            e.source.as_str(),
            e.strategy.map(|s| s.as_str()),
            e.confidence,
            format_datetime(&e.recorded_at),
        ])?;
    }
    Ok(())
}

/// History for a record, oldest first.
pub fn get_field_history(
    conn: &Connection,
    job_id: &Uuid,
) -> Result<Vec<FieldHistoryEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT job_id, field, old_value, new_value, source, strategy, confidence, recorded_at
         FROM field_history WHERE job_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map(params![job_id.to_string()], |row| {
            let job_str: String = row.get(0)?;
            let field_str: String = row.get(1)?;
            let source_str: String = row.get(4)?;
            let strategy_str: Option<String> = row.get(5)?;
            let recorded_str: String = row.get(7)?;
            Ok(FieldHistoryEntry {
                job_id: parse_uuid(0, &job_str)?,
                field: parse_enum(1, &field_str)?,
                old_value: row.get(2)?,
                new_value: row.get(3)?,
                source: parse_enum(4, &source_str)?,
                strategy: strategy_str.map(|s| parse_enum(5, &s)).transpose()?,
                confidence: row.get(6)?,
                recorded_at: parse_datetime(&recorded_str),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::{RecordField, RecordSource, ResolutionStrategy};

    fn entry(job_id: Uuid, new_value: &str) -> FieldHistoryEntry {
        FieldHistoryEntry {
            job_id,
            field: RecordField::Position,
            old_value: Some("Analyst".into()),
            new_value: Some(new_value.into()),
            source: RecordSource::AutoInferred,
            strategy: Some(ResolutionStrategy::MergeByCompleteness),
            confidence: 0.8,
            recorded_at: chrono::Local::now().naive_local(),
        }
    }

    #[test]
    fn appends_in_order() {
        let conn = open_memory_database().unwrap();
        let job_id = Uuid::new_v4();
        append_field_history(&conn, &[entry(job_id, "Data Analyst"), entry(job_id, "Senior Data Analyst")])
            .unwrap();

        let history = get_field_history(&conn, &job_id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].new_value.as_deref(), Some("Senior Data Analyst"));
        assert_eq!(history[0].strategy, Some(ResolutionStrategy::MergeByCompleteness));
    }

    #[test]
    fn history_rejects_deletes() {
        let conn = open_memory_database().unwrap();
        let job_id = Uuid::new_v4();
        append_field_history(&conn, &[entry(job_id, "Data Analyst")]).unwrap();

        let result = conn.execute("DELETE FROM field_history", []);
        assert!(result.is_err());
        assert_eq!(get_field_history(&conn, &job_id).unwrap().len(), 1);
    }
}
