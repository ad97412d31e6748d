use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_uuid};
use crate::db::DatabaseError;
use crate::models::LinkedEmail;

/// Link a source email to a record. Re-linking the same content is a no-op.
pub fn link_email(conn: &Connection, email: &LinkedEmail) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO linked_emails (job_id, content_hash, sender, subject, body_excerpt, received_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            email.job_id.to_string(),
            email.content_hash,
            email.sender,
            email.subject,
            email.body_excerpt,
            format_datetime(&email.received_at),
        ],
    )?;
    Ok(())
}

pub fn get_linked_emails(conn: &Connection, job_id: &Uuid) -> Result<Vec<LinkedEmail>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT job_id, content_hash, sender, subject, body_excerpt, received_at
         FROM linked_emails WHERE job_id = ?1 ORDER BY received_at DESC",
    )?;
    let rows = stmt
        .query_map(params![job_id.to_string()], |row| {
            let job_str: String = row.get(0)?;
            let received_str: String = row.get(5)?;
            Ok(LinkedEmail {
                job_id: parse_uuid(0, &job_str)?,
                content_hash: row.get(1)?,
                sender: row.get(2)?,
                subject: row.get(3)?,
                body_excerpt: row.get(4)?,
                received_at: parse_datetime(&received_str),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Record already linked to this content hash, if any.
pub fn find_job_by_content_hash(
    conn: &Connection,
    content_hash: &str,
) -> Result<Option<Uuid>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT job_id FROM linked_emails WHERE content_hash = ?1 LIMIT 1")?;
    let mut rows = stmt.query_map(params![content_hash], |row| {
        let s: String = row.get(0)?;
        parse_uuid(0, &s)
    })?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::db::repository::insert_job_record;
    use crate::db::sqlite::open_memory_database;
    use crate::models::{JobRecord, RecordSource};

    fn seed_record(conn: &Connection) -> Uuid {
        let now = chrono::Local::now().naive_local();
        let record = JobRecord {
            id: Uuid::new_v4(),
            company: "Acme".into(),
            position: None,
            status: None,
            location: None,
            sender_domain: None,
            record_source: RecordSource::AutoInferred,
            llm_confidence: None,
            field_metadata: BTreeMap::new(),
            needs_review: false,
            created_at: now,
            updated_at: now,
        };
        insert_job_record(conn, &record).unwrap();
        record.id
    }

    fn linked(job_id: Uuid, hash: &str) -> LinkedEmail {
        LinkedEmail {
            job_id,
            content_hash: hash.into(),
            sender: "jobs@acme.com".into(),
            subject: "Your application".into(),
            body_excerpt: "Thank you for applying".into(),
            received_at: chrono::Local::now().naive_local(),
        }
    }

    #[test]
    fn link_and_list() {
        let conn = open_memory_database().unwrap();
        let job_id = seed_record(&conn);
        link_email(&conn, &linked(job_id, "h1")).unwrap();
        link_email(&conn, &linked(job_id, "h1")).unwrap();
        link_email(&conn, &linked(job_id, "h2")).unwrap();

        assert_eq!(get_linked_emails(&conn, &job_id).unwrap().len(), 2);
        assert_eq!(find_job_by_content_hash(&conn, "h2").unwrap(), Some(job_id));
        assert_eq!(find_job_by_content_hash(&conn, "zz").unwrap(), None);
    }

    #[test]
    fn link_requires_existing_record() {
        let conn = open_memory_database().unwrap();
        assert!(link_email(&conn, &linked(Uuid::new_v4(), "h1")).is_err());
    }
}
