use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{
    AuditAction, ConflictSeverity, ConflictType, JobStatus, RecordField, RecordSource,
    ResolutionStrategy, ReviewStatus,
};

/// Per-field provenance kept on every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub source: RecordSource,
    pub confidence: f32,
    pub last_modified: NaiveDateTime,
    pub user_override: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub company: String,
    pub position: Option<String>,
    pub status: Option<JobStatus>,
    pub location: Option<String>,
    /// Domain of the email that created the record, if any.
    pub sender_domain: Option<String>,
    pub record_source: RecordSource,
    pub llm_confidence: Option<f32>,
    /// Keyed by `RecordField::as_str()`.
    pub field_metadata: BTreeMap<String, FieldMetadata>,
    pub needs_review: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl JobRecord {
    /// Current value of a field rendered as text.
    pub fn field_value(&self, field: RecordField) -> Option<String> {
        match field {
            RecordField::Company => Some(self.company.clone()),
            RecordField::Position => self.position.clone(),
            RecordField::Status => self.status.map(|s| s.as_str().to_string()),
            RecordField::Location => self.location.clone(),
        }
    }

    pub fn metadata(&self, field: RecordField) -> Option<&FieldMetadata> {
        self.field_metadata.get(field.as_str())
    }

    pub fn set_metadata(&mut self, field: RecordField, meta: FieldMetadata) {
        self.field_metadata.insert(field.as_str().to_string(), meta);
    }
}

/// Append-only history of a single field change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldHistoryEntry {
    pub job_id: Uuid,
    pub field: RecordField,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub source: RecordSource,
    pub strategy: Option<ResolutionStrategy>,
    pub confidence: f32,
    pub recorded_at: NaiveDateTime,
}

/// Email content linked to a record, kept for semantic re-extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedEmail {
    pub job_id: Uuid,
    pub content_hash: String,
    pub sender: String,
    pub subject: String,
    pub body_excerpt: String,
    pub received_at: NaiveDateTime,
}

/// A detected disagreement between a record and new data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub field: RecordField,
    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    /// Value currently on the record (manual or earlier inference).
    pub manual_value: Option<String>,
    /// Value proposed by the new data.
    pub llm_value: Option<String>,
    pub confidence_of_new_data: f32,
    pub strategy: ResolutionStrategy,
}

/// A conflict persisted for human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReview {
    pub conflict: ConflictRecord,
    pub incoming_source: RecordSource,
    pub status: ReviewStatus,
    pub decided_value: Option<String>,
    pub created_at: NaiveDateTime,
    pub resolved_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionAuditEntry {
    pub id: Uuid,
    pub job_id: Uuid,
    pub conflict_id: Option<Uuid>,
    pub field: Option<RecordField>,
    pub action: AuditAction,
    pub strategy: Option<ResolutionStrategy>,
    pub decided_value: Option<String>,
    pub detail: String,
    pub recorded_at: NaiveDateTime,
}

/// Caller-supplied data for a manually created record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualRecordInput {
    pub company: String,
    pub position: String,
    pub status: Option<JobStatus>,
    pub location: Option<String>,
}

/// Partial update applied by `edit_record`. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub company: Option<String>,
    pub position: Option<String>,
    pub status: Option<JobStatus>,
    pub location: Option<String>,
}

impl RecordUpdate {
    pub fn is_empty(&self) -> bool {
        self.company.is_none()
            && self.position.is_none()
            && self.status.is_none()
            && self.location.is_none()
    }

    /// Proposed value per field, as text.
    pub fn value(&self, field: RecordField) -> Option<String> {
        match field {
            RecordField::Company => self.company.clone(),
            RecordField::Position => self.position.clone(),
            RecordField::Status => self.status.map(|s| s.as_str().to_string()),
            RecordField::Location => self.location.clone(),
        }
    }

    pub fn touches_identity(&self) -> bool {
        self.company.is_some() || self.position.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        let now = chrono::Local::now().naive_local();
        JobRecord {
            id: Uuid::new_v4(),
            company: "Acme".into(),
            position: Some("Data Analyst".into()),
            status: Some(JobStatus::Interview),
            location: None,
            sender_domain: None,
            record_source: RecordSource::ManualCreated,
            llm_confidence: None,
            field_metadata: BTreeMap::new(),
            needs_review: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn field_value_renders_status_label() {
        let r = record();
        assert_eq!(r.field_value(RecordField::Status).as_deref(), Some("interview"));
        assert_eq!(r.field_value(RecordField::Location), None);
    }

    #[test]
    fn metadata_keyed_by_field_name() {
        let mut r = record();
        r.set_metadata(
            RecordField::Company,
            FieldMetadata {
                source: RecordSource::ManualCreated,
                confidence: 1.0,
                last_modified: r.created_at,
                user_override: true,
            },
        );
        assert!(r.field_metadata.contains_key("company"));
        assert!(r.metadata(RecordField::Company).unwrap().user_override);
    }

    #[test]
    fn empty_update_detected() {
        assert!(RecordUpdate::default().is_empty());
        let u = RecordUpdate {
            status: Some(JobStatus::Offer),
            ..Default::default()
        };
        assert!(!u.is_empty());
        assert!(!u.touches_identity());
    }
}
