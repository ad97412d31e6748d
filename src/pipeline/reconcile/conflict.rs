//! Field-level conflict detection and strategy selection.

use std::str::FromStr;

use uuid::Uuid;

use crate::models::{
    ConflictRecord, ConflictSeverity, ConflictType, JobRecord, JobStatus, ParseResult, RecordField,
    RecordSource, RecordUpdate, ResolutionStrategy,
};
use crate::pipeline_config::ReconcileConfig;

use super::similarity::{company_similarity, same_text, title_similarity};

/// Candidate values for an existing record, with their provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingData {
    pub company: Option<String>,
    pub position: Option<String>,
    pub status: Option<JobStatus>,
    pub location: Option<String>,
    pub source: RecordSource,
    pub confidence: f32,
}

impl IncomingData {
    pub fn from_parse(result: &ParseResult) -> Self {
        Self {
            company: result.company.clone(),
            position: result.position.clone(),
            status: result.status,
            location: result.location.clone(),
            source: RecordSource::AutoInferred,
            confidence: result.confidence,
        }
    }

    pub fn from_update(update: &RecordUpdate) -> Self {
        Self {
            company: update.company.clone(),
            position: update.position.clone(),
            status: update.status,
            location: update.location.clone(),
            source: RecordSource::ManualEdited,
            confidence: 1.0,
        }
    }

    pub fn value(&self, field: RecordField) -> Option<String> {
        match field {
            RecordField::Company => self.company.clone(),
            RecordField::Position => self.position.clone(),
            RecordField::Status => self.status.map(|s| s.as_str().to_string()),
            RecordField::Location => self.location.clone(),
        }
    }
}

/// Status transitions follow `Applied → Interview → {Declined|Offer}`.
/// Moving backwards is a high-severity regression, except that `Declined`
/// can arrive at any stage.
fn classify_status(existing: &str, incoming: &str) -> Option<(ConflictType, ConflictSeverity)> {
    let (Ok(old), Ok(new)) = (JobStatus::from_str(existing), JobStatus::from_str(incoming)) else {
        return Some((ConflictType::ValueMismatch, ConflictSeverity::Medium));
    };
    if old == new {
        None
    } else if new == JobStatus::Declined || new.rank() > old.rank() {
        Some((ConflictType::StatusProgression, ConflictSeverity::Low))
    } else if new.rank() < old.rank() {
        Some((ConflictType::StatusRegression, ConflictSeverity::High))
    } else {
        Some((ConflictType::ValueMismatch, ConflictSeverity::Medium))
    }
}

fn classify_text(
    field: RecordField,
    existing: &str,
    incoming: &str,
    config: &ReconcileConfig,
) -> Option<(ConflictType, ConflictSeverity)> {
    if same_text(existing, incoming) {
        return None;
    }
    let similar = match field {
        RecordField::Company => company_similarity(existing, incoming),
        _ => title_similarity(existing, incoming),
    } >= config.similar_threshold;

    let severity = match (field, similar) {
        (_, true) | (RecordField::Location, false) => ConflictSeverity::Low,
        (RecordField::Company, false) => ConflictSeverity::High,
        (_, false) => ConflictSeverity::Medium,
    };
    Some((ConflictType::ValueMismatch, severity))
}

/// Conflict type and severity for one field, or `None` when the values agree.
pub fn classify_field(
    field: RecordField,
    existing: Option<&str>,
    incoming: Option<&str>,
    config: &ReconcileConfig,
) -> Option<(ConflictType, ConflictSeverity)> {
    match (existing, incoming) {
        (_, None) => None,
        (None, Some(_)) => Some((ConflictType::MissingExisting, ConflictSeverity::None)),
        (Some(old), Some(new)) => match field {
            RecordField::Status => classify_status(old, new),
            _ => classify_text(field, old, new, config),
        },
    }
}

fn existing_is_manual(existing: &JobRecord, field: RecordField) -> bool {
    existing
        .metadata(field)
        .map(|m| m.user_override || m.source.is_manual())
        .unwrap_or_else(|| existing.record_source.is_manual())
}

/// Field-specific, confidence-gated strategy.
///
/// User edits always win. High severity always goes to review. Otherwise:
/// missing values are filled, status follows the newest source, and
/// hand-entered values are kept over inferred ones.
pub fn select_strategy(
    field: RecordField,
    conflict_type: ConflictType,
    severity: ConflictSeverity,
    existing: &JobRecord,
    incoming: &IncomingData,
) -> ResolutionStrategy {
    if incoming.source.is_manual() {
        return ResolutionStrategy::PreferNewSource;
    }
    if severity == ConflictSeverity::High {
        return ResolutionStrategy::FlagForReview;
    }
    if conflict_type == ConflictType::MissingExisting {
        return ResolutionStrategy::MergeByCompleteness;
    }
    if field == RecordField::Status {
        return ResolutionStrategy::PreferNewSource;
    }
    if existing_is_manual(existing, field) {
        return ResolutionStrategy::PreferManual;
    }
    match field {
        RecordField::Company | RecordField::Position => ResolutionStrategy::Hybrid,
        RecordField::Location | RecordField::Status => ResolutionStrategy::MergeByCompleteness,
    }
}

/// Every field where `incoming` disagrees with `existing`, with a chosen
/// resolution strategy.
pub fn detect_conflicts(
    existing: &JobRecord,
    incoming: &IncomingData,
    config: &ReconcileConfig,
) -> Vec<ConflictRecord> {
    RecordField::all()
        .iter()
        .filter_map(|&field| {
            let old = existing.field_value(field);
            let new = incoming.value(field);
            let (conflict_type, severity) = classify_field(field, old.as_deref(), new.as_deref(), config)?;
            let strategy = select_strategy(field, conflict_type, severity, existing, incoming);
            tracing::debug!(
                job_id = %existing.id,
                field = field.as_str(),
                conflict_type = conflict_type.as_str(),
                severity = severity.as_str(),
                strategy = strategy.as_str(),
                "Field conflict"
            );
            Some(ConflictRecord {
                id: Uuid::new_v4(),
                job_id: existing.id,
                field,
                conflict_type,
                severity,
                manual_value: old,
                llm_value: new,
                confidence_of_new_data: incoming.confidence,
                strategy,
            })
        })
        .collect()
}
