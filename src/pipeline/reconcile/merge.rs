//! Field-by-field merge of incoming data into an existing record.
//!
//! Merging never removes history: every changed field appends a history
//! entry and updates its provenance metadata, and every decision appends an
//! audit entry.

use std::str::FromStr;

use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::models::{
    AuditAction, ConflictRecord, FieldHistoryEntry, FieldMetadata, JobRecord, JobStatus, RecordField,
    RecordSource, ResolutionAuditEntry, ResolutionStrategy,
};
use crate::pipeline_config::ReconcileConfig;

use super::conflict::IncomingData;

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub record: JobRecord,
    pub history: Vec<FieldHistoryEntry>,
    pub audit: Vec<ResolutionAuditEntry>,
    /// Conflicts deferred to human review.
    pub flagged: Vec<ConflictRecord>,
    pub changed: bool,
}

/// The value that wins under `strategy`.
pub fn resolve_value(
    strategy: ResolutionStrategy,
    existing: Option<&str>,
    incoming: Option<&str>,
    incoming_confidence: f32,
    hybrid_threshold: f32,
) -> Option<String> {
    let winner = match strategy {
        ResolutionStrategy::PreferManual | ResolutionStrategy::FlagForReview => existing.or(incoming),
        ResolutionStrategy::PreferNewSource => incoming.or(existing),
        ResolutionStrategy::MergeByCompleteness => match (existing, incoming) {
            (Some(old), Some(new)) if new.trim().chars().count() > old.trim().chars().count() => Some(new),
            (old, new) => old.or(new),
        },
        ResolutionStrategy::Hybrid => {
            if incoming_confidence >= hybrid_threshold {
                incoming.or(existing)
            } else {
                existing.or(incoming)
            }
        }
    };
    winner.map(str::to_string)
}

/// Write `value` into `field`, recording provenance. Returns the history
/// entry when the value actually changed. A null company is ignored.
pub fn set_field_value(
    record: &mut JobRecord,
    field: RecordField,
    value: Option<String>,
    source: RecordSource,
    strategy: Option<ResolutionStrategy>,
    confidence: f32,
    now: NaiveDateTime,
) -> Option<FieldHistoryEntry> {
    let old = record.field_value(field);
    if old == value {
        return None;
    }
    match field {
        RecordField::Company => record.company = value.clone()?,
        RecordField::Position => record.position = value.clone(),
        RecordField::Status => {
            record.status = match value.as_deref() {
                Some(v) => Some(JobStatus::from_str(v).ok().or_else(|| JobStatus::from_label(v))?),
                None => None,
            }
        }
        RecordField::Location => record.location = value.clone(),
    }
    record.set_metadata(
        field,
        FieldMetadata {
            source,
            confidence,
            last_modified: now,
            user_override: source.is_manual(),
        },
    );
    record.updated_at = now;
    Some(FieldHistoryEntry {
        job_id: record.id,
        field,
        old_value: old,
        new_value: value,
        source,
        strategy,
        confidence,
        recorded_at: now,
    })
}

fn audit_entry(
    conflict: &ConflictRecord,
    action: AuditAction,
    decided_value: Option<String>,
    detail: String,
    now: NaiveDateTime,
) -> ResolutionAuditEntry {
    ResolutionAuditEntry {
        id: Uuid::new_v4(),
        job_id: conflict.job_id,
        conflict_id: Some(conflict.id),
        field: Some(conflict.field),
        action,
        strategy: Some(conflict.strategy),
        decided_value,
        detail,
        recorded_at: now,
    }
}

/// Apply `conflicts` to a copy of `existing` according to their strategies.
pub fn merge_record(
    existing: &JobRecord,
    incoming: &IncomingData,
    conflicts: &[ConflictRecord],
    config: &ReconcileConfig,
    now: NaiveDateTime,
) -> MergeOutcome {
    let mut record = existing.clone();
    let mut history = Vec::new();
    let mut audit = Vec::new();
    let mut flagged = Vec::new();
    let applied_action = if incoming.source.is_manual() {
        AuditAction::UserEdited
    } else {
        AuditAction::AutoResolved
    };

    for conflict in conflicts {
        if conflict.strategy == ResolutionStrategy::FlagForReview {
            record.needs_review = true;
            audit.push(audit_entry(
                conflict,
                AuditAction::FlaggedForReview,
                None,
                format!("{} conflict deferred to review", conflict.severity),
                now,
            ));
            flagged.push(conflict.clone());
            continue;
        }

        let winner = resolve_value(
            conflict.strategy,
            conflict.manual_value.as_deref(),
            conflict.llm_value.as_deref(),
            conflict.confidence_of_new_data,
            config.hybrid_confidence_threshold,
        );
        let took_incoming = winner.is_some() && winner == conflict.llm_value;
        let entry = if took_incoming {
            set_field_value(
                &mut record,
                conflict.field,
                winner.clone(),
                incoming.source,
                Some(conflict.strategy),
                incoming.confidence,
                now,
            )
        } else {
            None
        };
        history.extend(entry);

        let detail = if took_incoming { "incoming value applied" } else { "existing value kept" };
        audit.push(audit_entry(conflict, applied_action, winner, detail.to_string(), now));
    }

    let changed = !history.is_empty();
    if changed {
        record.record_source = if incoming.source.is_manual() {
            existing.record_source.after_user_edit()
        } else {
            existing.record_source.merged_with(incoming.source)
        };
        if incoming.source == RecordSource::AutoInferred {
            record.llm_confidence = Some(incoming.confidence);
        }
    }
    if changed || !flagged.is_empty() {
        record.updated_at = now;
    }

    MergeOutcome {
        record,
        history,
        audit,
        flagged,
        changed,
    }
}
