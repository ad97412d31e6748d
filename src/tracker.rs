//! `JobTracker`: the host-owned façade over classification, the record
//! store, the tiered cache and the conflict engine.
//!
//! Async methods only await on keyed locks and inference. Every store
//! access happens in a synchronous `*_locked` helper that takes the
//! connection once, so the connection mutex is never held across `.await`.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDateTime;
use rusqlite::Connection;
use thiserror::Error;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::default_database_path;
use crate::db::{self, DatabaseError, SharedConnection};
use crate::models::{
    AuditAction, ConflictRecord, ConflictReview, DuplicateRisk, EmailMessage, FieldHistoryEntry,
    FieldMetadata, JobRecord, JobStatus, LinkedEmail, ManualRecordInput, ParseResult, RecordField,
    RecordSource, RecordUpdate, ResolutionAuditEntry, ResultOrigin, ReviewStatus,
};
use crate::pipeline::cache::{
    company_tag, identity_tags, spawn_sweeper, CacheValue, Namespace, NamespaceStats, SweeperHandle,
    TieredCache,
};
use crate::pipeline::classifier::sanitize::remove_invisible_chars;
use crate::pipeline::classifier::{classify_with_rules, TwoStageClassifier};
use crate::pipeline::hash::{content_hash, record_key};
use crate::pipeline::inference::{InferenceEngine, LazyEngine, OllamaEngine, SessionPool};
use crate::pipeline::reconcile::{
    assess_duplicates, detect_conflicts, identity_key, merge_record, normalize_company, normalize_title,
    set_field_value, Candidate, DuplicateAssessment, DuplicateMatch, IncomingData, KeyedLocks,
    MergeOutcome,
};
use crate::pipeline_config::EngineConfig;

/// Longest accepted value for a caller-supplied field.
const MAX_FIELD_CHARS: usize = 200;

/// Upper bound on a single Ollama HTTP call. Stage deadlines are enforced
/// separately by the invoker.
const OLLAMA_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Namespaces whose entries are derived from the record store.
const STORE_DERIVED: [Namespace; 3] = [
    Namespace::ManualLookup,
    Namespace::ConflictCheck,
    Namespace::DuplicateCheck,
];

// ═══════════════════════════════════════════════════════════
// Errors & results
// ═══════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Duplicate of existing record {existing}")]
    Conflict {
        existing: Uuid,
        assessment: DuplicateAssessment,
    },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Job record not found: {0}")]
    NotFound(Uuid),

    #[error("Conflict review not found or already closed: {0}")]
    ConflictNotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotJobRelated,
    /// Job related, but no employer could be identified.
    MissingCompany,
}

/// What `process_email` did with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Skipped {
        reason: SkipReason,
        result: ParseResult,
    },
    AlreadyLinked {
        job_id: Uuid,
    },
    Created {
        job_id: Uuid,
        result: ParseResult,
        duplicate_risk: DuplicateRisk,
    },
    Merged {
        job_id: Uuid,
        result: ParseResult,
        conflicts: Vec<ConflictRecord>,
        flagged: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManualRecordOutcome {
    pub job_id: Uuid,
    /// Non-blocking duplicate matches, for display.
    pub conflicts: Vec<DuplicateMatch>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    pub record: JobRecord,
    /// Conflicts the edit overrode. User edits are applied regardless.
    pub conflicts: Vec<ConflictRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictDecision {
    KeepExisting,
    AcceptIncoming,
    UseValue(String),
}

// ═══════════════════════════════════════════════════════════
// JobTracker
// ═══════════════════════════════════════════════════════════

pub struct JobTracker {
    conn: SharedConnection,
    cache: Arc<TieredCache>,
    pool: Arc<SessionPool>,
    classifier: TwoStageClassifier,
    inference_permits: Semaphore,
    locks: KeyedLocks,
    config: EngineConfig,
}

impl JobTracker {
    /// Open the configured database and build a tracker backed by Ollama.
    /// The engine is constructed on first inference, not here.
    pub fn open(config: EngineConfig) -> Result<Self, TrackerError> {
        let path = config
            .database_path
            .clone()
            .unwrap_or_else(default_database_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = db::open_database(&path)?;

        let url = config.ollama_url.clone();
        let engine = LazyEngine::new(Box::new(move || {
            let engine: Arc<dyn InferenceEngine> = Arc::new(OllamaEngine::new(&url, OLLAMA_REQUEST_TIMEOUT)?);
            Ok(engine)
        }));

        tracing::info!(path = %path.display(), "Job tracker opened");
        Ok(Self::with_engine(conn, Arc::new(engine), config))
    }

    pub fn with_engine(conn: Connection, engine: Arc<LazyEngine>, config: EngineConfig) -> Self {
        let conn: SharedConnection = Arc::new(Mutex::new(conn));
        let cache = Arc::new(TieredCache::with_persistence(config.cache.clone(), conn.clone()));
        let pool = Arc::new(SessionPool::new(
            engine,
            config.session_pool.clone(),
            config.stage1.clone(),
            config.stage2.clone(),
        ));
        let classifier = TwoStageClassifier::new(pool.clone(), cache.clone(), config.clone());

        Self {
            conn,
            cache,
            pool,
            classifier,
            inference_permits: Semaphore::new(config.max_concurrent_inference.max(1)),
            locks: KeyedLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn db(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Classification ────────────────────────────────────────

    /// Classify one email. Never fails: inference problems degrade through
    /// the fallback chain, and a saturated pool goes straight to the rules.
    pub async fn classify(&self, email: &EmailMessage) -> ParseResult {
        let key = self.email_key(email, "parse");
        if let Some(hit) = self.cache.get(Namespace::Parse, &key).and_then(CacheValue::into_parse) {
            tracing::debug!("Parse cache hit");
            return hit;
        }

        let result = match self.inference_permits.try_acquire() {
            Ok(_permit) => self.classifier.classify(email).await,
            Err(_) => {
                tracing::warn!(
                    limit = self.config.max_concurrent_inference,
                    "Inference saturated, using rule-based classifier"
                );
                if self.config.fallback_enabled {
                    classify_with_rules(email)
                } else {
                    ParseResult::conservative()
                }
            }
        };

        if result.origin == ResultOrigin::Inference {
            self.cache.insert(
                Namespace::Parse,
                &key,
                CacheValue::Parse(result.clone()),
                RecordSource::AutoInferred,
                identity_tags(result.company.as_deref(), result.position.as_deref()),
            );
        }
        result
    }

    /// Classify, then create, merge or skip.
    pub async fn process_email(&self, email: &EmailMessage) -> Result<IngestOutcome, TrackerError> {
        let link_hash = self.email_key(email, "link");
        if let Some(job_id) = self.linked_job(&link_hash)? {
            tracing::debug!(%job_id, "Email already linked");
            return Ok(IngestOutcome::AlreadyLinked { job_id });
        }

        let result = self.classify(email).await;
        if !result.is_job_related {
            return Ok(IngestOutcome::Skipped {
                reason: SkipReason::NotJobRelated,
                result,
            });
        }
        let Some(company) = result.company.clone() else {
            return Ok(IngestOutcome::Skipped {
                reason: SkipReason::MissingCompany,
                result,
            });
        };

        let _identity = self
            .locks
            .lock(&identity_lock_key(&company, result.position.as_deref()))
            .await;
        let now = now();
        let domain = email.sender_domain();
        let assessment = self.assess_for_email(&company, result.position.as_deref(), domain.as_deref(), now)?;

        match assessment.strongest_at_least(DuplicateRisk::High).map(|m| m.job_id) {
            Some(job_id) => {
                let _record = self.locks.lock(&record_lock_key(&job_id)).await;
                self.merge_email_locked(job_id, email, result, &link_hash, now)
            }
            None => self.create_from_email_locked(email, result, &company, &assessment, &link_hash, now),
        }
    }

    fn email_key(&self, email: &EmailMessage, variant: &str) -> String {
        content_hash(
            email.sender_domain().as_deref(),
            &email.subject,
            &email.body,
            self.config.cache.body_prefix_chars,
            variant,
        )
        .to_string()
    }

    fn linked_job(&self, link_hash: &str) -> Result<Option<Uuid>, TrackerError> {
        let conn = self.db();
        Ok(db::find_job_by_content_hash(&conn, link_hash)?)
    }

    fn assess_for_email(
        &self,
        company: &str,
        position: Option<&str>,
        domain: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<DuplicateAssessment, TrackerError> {
        let key = record_key(
            &normalize_company(company),
            &position.map(normalize_title).unwrap_or_default(),
            &format!("duplicate:{}", domain.unwrap_or_default()),
        )
        .to_string();
        if let Some(hit) = self
            .cache
            .get(Namespace::DuplicateCheck, &key)
            .and_then(CacheValue::into_duplicate)
        {
            tracing::debug!(risk = hit.risk.as_str(), "Duplicate check cache hit");
            return Ok(hit);
        }

        let (records, emails) = {
            let conn = self.db();
            let since = now - chrono::Duration::days(self.config.reconcile.candidate_window_days);
            let records = db::find_records_since(&conn, &since)?;
            let emails = linked_emails_for(&conn, &records)?;
            (records, emails)
        };
        let candidate = Candidate {
            company,
            position,
            sender_domain: domain,
        };
        let assessment = assess_duplicates(&candidate, &records, &emails, &self.config.reconcile, now);

        self.cache.insert(
            Namespace::DuplicateCheck,
            &key,
            CacheValue::Duplicate(assessment.clone()),
            RecordSource::AutoInferred,
            identity_cache_tags(company, position),
        );
        Ok(assessment)
    }

    fn create_from_email_locked(
        &self,
        email: &EmailMessage,
        result: ParseResult,
        company: &str,
        assessment: &DuplicateAssessment,
        link_hash: &str,
        now: NaiveDateTime,
    ) -> Result<IngestOutcome, TrackerError> {
        let (mut record, history) = new_record(
            company,
            result.position.as_deref(),
            result.status,
            result.location.as_deref(),
            email.sender_domain(),
            RecordSource::AutoInferred,
            result.confidence,
            now,
        );
        let mut audit = vec![audit_entry(record.id, AuditAction::Created, "record created from email", now)];
        if let Some(possible) = assessment.strongest_at_least(DuplicateRisk::Medium) {
            record.needs_review = true;
            audit.push(audit_entry(
                record.id,
                AuditAction::FlaggedForReview,
                &format!("possible duplicate of {} ({:?} match)", possible.job_id, possible.dimension),
                now,
            ));
        }

        {
            let conn = self.db();
            db::insert_job_record(&conn, &record)?;
            db::append_field_history(&conn, &history)?;
            db::insert_audit_entries(&conn, &audit)?;
            db::link_email(&conn, &self.linked_email(record.id, email, link_hash, now))?;
        }
        self.invalidate_identity(&STORE_DERIVED, &record.company, record.position.as_deref());

        tracing::info!(
            job_id = %record.id,
            duplicate_risk = assessment.risk.as_str(),
            origin = ?result.origin,
            "Job record created from email"
        );
        Ok(IngestOutcome::Created {
            job_id: record.id,
            result,
            duplicate_risk: assessment.risk,
        })
    }

    fn merge_email_locked(
        &self,
        job_id: Uuid,
        email: &EmailMessage,
        result: ParseResult,
        link_hash: &str,
        now: NaiveDateTime,
    ) -> Result<IngestOutcome, TrackerError> {
        let conn = self.db();
        let existing = db::get_job_record(&conn, &job_id)?.ok_or(TrackerError::NotFound(job_id))?;
        let incoming = IncomingData::from_parse(&result);
        let conflicts = self.conflicts_for(&existing, &incoming);
        let outcome = merge_record(&existing, &incoming, &conflicts, &self.config.reconcile, now);

        persist_merge(&conn, &outcome, incoming.source, now)?;
        db::link_email(&conn, &self.linked_email(job_id, email, link_hash, now))?;
        drop(conn);

        if identity_changed(&existing, &outcome.record) {
            self.invalidate_identity(&Namespace::ALL, &existing.company, existing.position.as_deref());
            self.invalidate_identity(&Namespace::ALL, &outcome.record.company, outcome.record.position.as_deref());
        }

        tracing::info!(
            %job_id,
            changed = outcome.changed,
            flagged = outcome.flagged.len(),
            "Email merged into existing record"
        );
        Ok(IngestOutcome::Merged {
            job_id,
            result,
            flagged: outcome.flagged.len(),
            conflicts,
        })
    }

    fn linked_email(&self, job_id: Uuid, email: &EmailMessage, link_hash: &str, now: NaiveDateTime) -> LinkedEmail {
        LinkedEmail {
            job_id,
            content_hash: link_hash.to_string(),
            sender: email.sender.clone(),
            subject: email.subject.clone(),
            body_excerpt: email.body.chars().take(self.config.cache.body_prefix_chars).collect(),
            received_at: email.received_at.unwrap_or(now),
        }
    }

    /// Conflicts between a record version and incoming data, cached per
    /// version. Cached conflicts get fresh ids so they can be queued again.
    fn conflicts_for(&self, existing: &JobRecord, incoming: &IncomingData) -> Vec<ConflictRecord> {
        let key = conflict_key(existing, incoming);
        if let Some(cached) = self
            .cache
            .get(Namespace::ConflictCheck, &key)
            .and_then(CacheValue::into_conflicts)
        {
            tracing::debug!(job_id = %existing.id, "Conflict check cache hit");
            return cached
                .into_iter()
                .map(|c| ConflictRecord { id: Uuid::new_v4(), ..c })
                .collect();
        }

        let conflicts = detect_conflicts(existing, incoming, &self.config.reconcile);
        self.cache.insert(
            Namespace::ConflictCheck,
            &key,
            CacheValue::Conflicts(conflicts.clone()),
            existing.record_source.merged_with(incoming.source),
            identity_tags(Some(&existing.company), existing.position.as_deref()),
        );
        conflicts
    }

    // ── Manual records ────────────────────────────────────────

    /// Create a record from user input. A CRITICAL duplicate is refused with
    /// `TrackerError::Conflict`; weaker matches are returned for display.
    pub async fn create_manual_record(&self, input: ManualRecordInput) -> Result<ManualRecordOutcome, TrackerError> {
        let input = validate_manual_input(input)?;
        let _identity = self
            .locks
            .lock(&identity_lock_key(&input.company, Some(input.position.as_str())))
            .await;
        self.create_manual_locked(&input, now())
    }

    fn create_manual_locked(&self, input: &ManualRecordInput, now: NaiveDateTime) -> Result<ManualRecordOutcome, TrackerError> {
        let conn = self.db();
        let records = self.manual_candidates(&conn, &input.company, now)?;
        let emails = linked_emails_for(&conn, &records)?;
        let candidate = Candidate {
            company: &input.company,
            position: Some(input.position.as_str()),
            sender_domain: None,
        };
        let assessment = assess_duplicates(&candidate, &records, &emails, &self.config.reconcile, now);

        if let Some(blocking) = assessment.strongest_at_least(DuplicateRisk::Critical) {
            let existing = blocking.job_id;
            db::insert_audit_entries(
                &conn,
                &[audit_entry(existing, AuditAction::DuplicateBlocked, "manual record refused as duplicate", now)],
            )?;
            tracing::warn!(%existing, "Manual record blocked as duplicate");
            return Err(TrackerError::Conflict { existing, assessment });
        }

        let (record, history) = new_record(
            &input.company,
            Some(input.position.as_str()),
            input.status,
            input.location.as_deref(),
            None,
            RecordSource::ManualCreated,
            1.0,
            now,
        );
        db::insert_job_record(&conn, &record)?;
        db::append_field_history(&conn, &history)?;
        db::insert_audit_entries(&conn, &[audit_entry(record.id, AuditAction::Created, "record created manually", now)])?;
        drop(conn);

        self.invalidate_identity(&STORE_DERIVED, &record.company, record.position.as_deref());
        tracing::info!(job_id = %record.id, duplicate_risk = assessment.risk.as_str(), "Manual job record created");
        Ok(ManualRecordOutcome {
            job_id: record.id,
            conflicts: assessment.matches,
        })
    }

    /// Recent records whose company shares the lookup fragment of `company`.
    fn manual_candidates(&self, conn: &Connection, company: &str, now: NaiveDateTime) -> Result<Vec<JobRecord>, TrackerError> {
        let fragment = lookup_fragment(company);
        let key = record_key(&fragment, "", "manual_lookup").to_string();
        let since = now - chrono::Duration::days(self.config.reconcile.candidate_window_days);

        if let Some(ids) = self.cache.get(Namespace::ManualLookup, &key).and_then(CacheValue::into_records) {
            tracing::debug!(candidates = ids.len(), "Manual lookup cache hit");
            let mut records = Vec::with_capacity(ids.len());
            for id in &ids {
                records.extend(db::get_job_record(conn, id)?);
            }
            return Ok(records.into_iter().filter(|r| r.created_at >= since).collect());
        }

        let records: Vec<JobRecord> = db::find_records_by_company(conn, &fragment)?
            .into_iter()
            .filter(|r| r.created_at >= since)
            .collect();
        let mut tags = identity_cache_tags(company, None);
        tags.push(company_tag(&fragment));
        self.cache.insert(
            Namespace::ManualLookup,
            &key,
            CacheValue::Records(records.iter().map(|r| r.id).collect()),
            RecordSource::Hybrid,
            tags,
        );
        Ok(records)
    }

    /// Apply a user edit. User values always win; the conflicts they
    /// override are reported. Moving a record onto another record's
    /// identity is refused as a CRITICAL duplicate.
    pub async fn edit_record(&self, job_id: Uuid, update: RecordUpdate) -> Result<EditOutcome, TrackerError> {
        let update = validate_update(update)?;
        loop {
            let target = self.edit_identity_lock(job_id, &update)?;
            let mut keys = vec![record_lock_key(&job_id)];
            keys.extend(target.clone());
            // Identity keys sort before record keys, the order ingestion uses.
            let _guards = self.locks.lock_many(&keys).await;
            // A concurrent edit may have moved the record while we waited.
            if self.edit_identity_lock(job_id, &update)? == target {
                return self.edit_locked(job_id, &update, now());
            }
        }
    }

    /// Identity lock an edit must hold: the target identity when the edit
    /// moves the record, none otherwise.
    fn edit_identity_lock(&self, job_id: Uuid, update: &RecordUpdate) -> Result<Option<String>, TrackerError> {
        if !update.touches_identity() {
            return Ok(None);
        }
        let existing = db::get_job_record(&self.db(), &job_id)?.ok_or(TrackerError::NotFound(job_id))?;
        let company = update.company.as_deref().unwrap_or(&existing.company);
        let position = update.position.as_deref().or(existing.position.as_deref());
        if identity_key(company, position) == identity_key(&existing.company, existing.position.as_deref()) {
            return Ok(None);
        }
        Ok(Some(identity_lock_key(company, position)))
    }

    fn edit_locked(&self, job_id: Uuid, update: &RecordUpdate, now: NaiveDateTime) -> Result<EditOutcome, TrackerError> {
        let conn = self.db();
        let existing = db::get_job_record(&conn, &job_id)?.ok_or(TrackerError::NotFound(job_id))?;

        if update.touches_identity() {
            let company = update.company.as_deref().unwrap_or(&existing.company);
            let position = update.position.as_deref().or(existing.position.as_deref());
            if identity_key(company, position) != identity_key(&existing.company, existing.position.as_deref()) {
                let records: Vec<JobRecord> = self
                    .manual_candidates(&conn, company, now)?
                    .into_iter()
                    .filter(|r| r.id != job_id)
                    .collect();
                let emails = linked_emails_for(&conn, &records)?;
                let candidate = Candidate {
                    company,
                    position,
                    sender_domain: None,
                };
                let assessment = assess_duplicates(&candidate, &records, &emails, &self.config.reconcile, now);
                if let Some(blocking) = assessment.strongest_at_least(DuplicateRisk::Critical) {
                    let existing_id = blocking.job_id;
                    db::insert_audit_entries(
                        &conn,
                        &[audit_entry(
                            job_id,
                            AuditAction::DuplicateBlocked,
                            &format!("edit refused: duplicate of {existing_id}"),
                            now,
                        )],
                    )?;
                    tracing::warn!(%job_id, existing = %existing_id, "Record edit blocked as duplicate");
                    return Err(TrackerError::Conflict {
                        existing: existing_id,
                        assessment,
                    });
                }
            }
        }

        let incoming = IncomingData::from_update(update);
        let conflicts = self.conflicts_for(&existing, &incoming);
        let outcome = merge_record(&existing, &incoming, &conflicts, &self.config.reconcile, now);
        persist_merge(&conn, &outcome, incoming.source, now)?;
        drop(conn);

        self.invalidate_identity(&Namespace::ALL, &existing.company, existing.position.as_deref());
        self.invalidate_identity(&Namespace::ALL, &outcome.record.company, outcome.record.position.as_deref());

        tracing::info!(%job_id, conflicts = conflicts.len(), changed = outcome.changed, "Record edited");
        Ok(EditOutcome {
            record: outcome.record,
            conflicts,
        })
    }

    // ── Review queue ──────────────────────────────────────────

    /// Close a pending review with the user's decision and apply it.
    pub async fn resolve_conflict(&self, conflict_id: Uuid, decision: ConflictDecision) -> Result<JobRecord, TrackerError> {
        let job_id = {
            let conn = self.db();
            pending_review(&conn, conflict_id)?.conflict.job_id
        };
        let _record = self.locks.lock(&record_lock_key(&job_id)).await;
        self.resolve_locked(conflict_id, decision, now())
    }

    fn resolve_locked(&self, conflict_id: Uuid, decision: ConflictDecision, now: NaiveDateTime) -> Result<JobRecord, TrackerError> {
        let conn = self.db();
        let review = pending_review(&conn, conflict_id)?;
        let conflict = &review.conflict;
        let existing = db::get_job_record(&conn, &conflict.job_id)?.ok_or(TrackerError::NotFound(conflict.job_id))?;
        let mut record = existing.clone();

        let (status, decided) = match decision {
            ConflictDecision::KeepExisting => (ReviewStatus::Dismissed, record.field_value(conflict.field)),
            ConflictDecision::AcceptIncoming => (ReviewStatus::Resolved, conflict.llm_value.clone()),
            ConflictDecision::UseValue(value) => (
                ReviewStatus::Resolved,
                Some(validate_field_value(conflict.field, &value)?),
            ),
        };

        let history: Vec<FieldHistoryEntry> = if status == ReviewStatus::Resolved {
            set_field_value(
                &mut record,
                conflict.field,
                decided.clone(),
                RecordSource::ManualEdited,
                Some(conflict.strategy),
                1.0,
                now,
            )
            .into_iter()
            .collect()
        } else {
            Vec::new()
        };
        if !history.is_empty() {
            record.record_source = record.record_source.after_user_edit();
        }

        db::close_conflict_review(&conn, &conflict_id, status, decided.as_deref(), &now).map_err(|e| match e {
            DatabaseError::NotFound { .. } => TrackerError::ConflictNotFound(conflict_id),
            other => other.into(),
        })?;
        record.needs_review = db::count_pending_reviews_for_job(&conn, &record.id)? > 0;
        record.updated_at = now;
        db::update_job_record(&conn, &record)?;
        db::append_field_history(&conn, &history)?;
        db::insert_audit_entries(
            &conn,
            &[ResolutionAuditEntry {
                id: Uuid::new_v4(),
                job_id: record.id,
                conflict_id: Some(conflict_id),
                field: Some(conflict.field),
                action: AuditAction::ReviewResolved,
                strategy: Some(conflict.strategy),
                decided_value: decided,
                detail: format!("review {status}"),
                recorded_at: now,
            }],
        )?;
        drop(conn);

        if identity_changed(&existing, &record) {
            self.invalidate_identity(&Namespace::ALL, &existing.company, existing.position.as_deref());
            self.invalidate_identity(&Namespace::ALL, &record.company, record.position.as_deref());
        }
        tracing::info!(job_id = %record.id, %conflict_id, status = status.as_str(), "Conflict review closed");
        Ok(record)
    }

    pub fn pending_reviews(&self) -> Result<Vec<ConflictReview>, TrackerError> {
        Ok(db::get_pending_reviews(&self.db())?)
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn get_record(&self, job_id: Uuid) -> Result<JobRecord, TrackerError> {
        db::get_job_record(&self.db(), &job_id)?.ok_or(TrackerError::NotFound(job_id))
    }

    pub fn list_records(&self) -> Result<Vec<JobRecord>, TrackerError> {
        Ok(db::list_job_records(&self.db())?)
    }

    pub fn field_history(&self, job_id: Uuid) -> Result<Vec<FieldHistoryEntry>, TrackerError> {
        Ok(db::get_field_history(&self.db(), &job_id)?)
    }

    pub fn linked_emails(&self, job_id: Uuid) -> Result<Vec<LinkedEmail>, TrackerError> {
        Ok(db::get_linked_emails(&self.db(), &job_id)?)
    }

    pub fn audit_trail(&self, job_id: Uuid) -> Result<Vec<ResolutionAuditEntry>, TrackerError> {
        Ok(db::query_audit_by_job(&self.db(), &job_id)?)
    }

    // ── Maintenance ───────────────────────────────────────────

    /// Remove expired cache entries and idle lock registry slots.
    pub fn sweep_cache(&self) -> usize {
        let removed = self.cache.sweep();
        let pruned = self.locks.prune();
        if pruned > 0 {
            tracing::debug!(pruned, "Idle record locks pruned");
        }
        removed
    }

    /// Sweep the cache every `cache.sweep_interval_secs` until the handle is
    /// shut down or dropped. Must be called inside a tokio runtime.
    pub fn spawn_cache_sweeper(&self) -> SweeperHandle {
        spawn_sweeper(self.cache.clone(), self.config.cache.sweep_interval())
    }

    pub fn cache_stats(&self) -> Vec<NamespaceStats> {
        self.cache.stats()
    }

    /// Dispose inference sessions. Later classifications use the fallback
    /// chain.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        tracing::info!("Job tracker shut down");
    }

    fn invalidate_identity(&self, namespaces: &[Namespace], company: &str, position: Option<&str>) {
        let normalized_title = position.map(normalize_title);
        let removed = self.cache.invalidate_company_title_in(namespaces, Some(company), position)
            + self.cache.invalidate_company_title_in(
                namespaces,
                Some(&normalize_company(company)),
                normalized_title.as_deref(),
            )
            + self
                .cache
                .invalidate_company_title_in(namespaces, Some(&lookup_fragment(company)), None);
        if removed > 0 {
            tracing::debug!(removed, "Cache invalidated for record identity");
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

fn identity_lock_key(company: &str, position: Option<&str>) -> String {
    format!("identity:{}", identity_key(company, position))
}

fn record_lock_key(job_id: &Uuid) -> String {
    format!("record:{job_id}")
}

/// First token of the normalized company, used for store lookups.
fn lookup_fragment(company: &str) -> String {
    normalize_company(company)
        .split_whitespace()
        .next()
        .map(str::to_string)
        .unwrap_or_else(|| company.trim().to_lowercase())
}

/// Tags for raw and normalized forms of an identity.
fn identity_cache_tags(company: &str, position: Option<&str>) -> Vec<String> {
    let normalized_title = position.map(normalize_title);
    let mut tags = identity_tags(Some(company), position);
    tags.extend(identity_tags(Some(&normalize_company(company)), normalized_title.as_deref()));
    tags.sort();
    tags.dedup();
    tags
}

fn identity_changed(before: &JobRecord, after: &JobRecord) -> bool {
    before.company != after.company || before.position != after.position
}

fn conflict_key(existing: &JobRecord, incoming: &IncomingData) -> String {
    let values: Vec<String> = RecordField::all()
        .iter()
        .map(|f| incoming.value(*f).unwrap_or_default())
        .collect();
    record_key(
        &existing.id.to_string(),
        &values.join("\u{1f}"),
        &format!("conflict:{}:{}", existing.updated_at, incoming.source),
    )
    .to_string()
}

fn linked_emails_for(conn: &Connection, records: &[JobRecord]) -> Result<HashMap<Uuid, Vec<LinkedEmail>>, TrackerError> {
    let mut emails = HashMap::with_capacity(records.len());
    for record in records {
        let linked = db::get_linked_emails(conn, &record.id)?;
        if !linked.is_empty() {
            emails.insert(record.id, linked);
        }
    }
    Ok(emails)
}

fn pending_review(conn: &Connection, conflict_id: Uuid) -> Result<ConflictReview, TrackerError> {
    db::get_conflict_review(conn, &conflict_id)?
        .filter(|r| r.status == ReviewStatus::Pending)
        .ok_or(TrackerError::ConflictNotFound(conflict_id))
}

fn persist_merge(conn: &Connection, outcome: &MergeOutcome, source: RecordSource, now: NaiveDateTime) -> Result<(), TrackerError> {
    if outcome.changed || !outcome.flagged.is_empty() {
        db::update_job_record(conn, &outcome.record)?;
    }
    db::append_field_history(conn, &outcome.history)?;
    if !outcome.flagged.is_empty() {
        db::store_conflict_reviews(conn, &outcome.flagged, source, &now)?;
    }
    db::insert_audit_entries(conn, &outcome.audit)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn new_record(
    company: &str,
    position: Option<&str>,
    status: Option<JobStatus>,
    location: Option<&str>,
    sender_domain: Option<String>,
    source: RecordSource,
    confidence: f32,
    now: NaiveDateTime,
) -> (JobRecord, Vec<FieldHistoryEntry>) {
    let mut record = JobRecord {
        id: Uuid::new_v4(),
        company: company.to_string(),
        position: None,
        status: None,
        location: None,
        sender_domain,
        record_source: source,
        llm_confidence: (!source.is_manual()).then_some(confidence),
        field_metadata: BTreeMap::new(),
        needs_review: false,
        created_at: now,
        updated_at: now,
    };
    record.set_metadata(
        RecordField::Company,
        FieldMetadata {
            source,
            confidence,
            last_modified: now,
            user_override: source.is_manual(),
        },
    );

    let mut history = vec![FieldHistoryEntry {
        job_id: record.id,
        field: RecordField::Company,
        old_value: None,
        new_value: Some(company.to_string()),
        source,
        strategy: None,
        confidence,
        recorded_at: now,
    }];
    let rest = [
        (RecordField::Position, position.map(str::to_string)),
        (RecordField::Status, status.map(|s| s.as_str().to_string())),
        (RecordField::Location, location.map(str::to_string)),
    ];
    for (field, value) in rest {
        history.extend(set_field_value(&mut record, field, value, source, None, confidence, now));
    }
    (record, history)
}

fn audit_entry(job_id: Uuid, action: AuditAction, detail: &str, now: NaiveDateTime) -> ResolutionAuditEntry {
    ResolutionAuditEntry {
        id: Uuid::new_v4(),
        job_id,
        conflict_id: None,
        field: None,
        action,
        strategy: None,
        decided_value: None,
        detail: detail.to_string(),
        recorded_at: now,
    }
}

fn required_text(field: &str, value: &str) -> Result<String, TrackerError> {
    let cleaned = remove_invisible_chars(value).trim().to_string();
    if cleaned.is_empty() {
        return Err(TrackerError::Validation(format!("{field} must not be empty")));
    }
    if cleaned.chars().count() > MAX_FIELD_CHARS {
        return Err(TrackerError::Validation(format!(
            "{field} exceeds {MAX_FIELD_CHARS} characters"
        )));
    }
    Ok(cleaned)
}

fn validate_manual_input(input: ManualRecordInput) -> Result<ManualRecordInput, TrackerError> {
    Ok(ManualRecordInput {
        company: required_text("company", &input.company)?,
        position: required_text("position", &input.position)?,
        status: input.status,
        location: input
            .location
            .as_deref()
            .map(|l| required_text("location", l))
            .transpose()?,
    })
}

fn validate_update(update: RecordUpdate) -> Result<RecordUpdate, TrackerError> {
    if update.is_empty() {
        return Err(TrackerError::Validation("update contains no fields".into()));
    }
    let optional = |field: &str, value: Option<&str>| value.map(|v| required_text(field, v)).transpose();
    Ok(RecordUpdate {
        company: optional("company", update.company.as_deref())?,
        position: optional("position", update.position.as_deref())?,
        status: update.status,
        location: optional("location", update.location.as_deref())?,
    })
}

fn validate_field_value(field: RecordField, value: &str) -> Result<String, TrackerError> {
    let cleaned = required_text(field.as_str(), value)?;
    if field != RecordField::Status {
        return Ok(cleaned);
    }
    JobStatus::from_str(&cleaned)
        .ok()
        .or_else(|| JobStatus::from_label(&cleaned))
        .map(|s| s.as_str().to_string())
        .ok_or_else(|| TrackerError::Validation(format!("unknown status: {cleaned}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::inference::{MockBehavior, MockInferenceEngine, Stage};

    const STAGE1_JOB: &str = r#"{"is_job_related": true, "risk_level": "low"}"#;

    fn stage2(status: &str) -> MockBehavior {
        MockBehavior::Respond(format!(
            r#"{{"is_job_related": true, "company": "Acme", "position": "Data Analyst", "status": "{status}", "location": null, "confidence": 0.92}}"#
        ))
    }

    fn job_mock(status: &str) -> Arc<MockInferenceEngine> {
        Arc::new(
            MockInferenceEngine::new()
                .with_behavior(Stage::Stage1, MockBehavior::Respond(STAGE1_JOB.into()))
                .with_behavior(Stage::Stage2, stage2(status)),
        )
    }

    fn tracker_with(mock: Arc<MockInferenceEngine>, config: EngineConfig) -> JobTracker {
        let conn = db::open_memory_database().unwrap();
        JobTracker::with_engine(conn, Arc::new(LazyEngine::ready(mock)), config)
    }

    fn tracker(mock: Arc<MockInferenceEngine>) -> JobTracker {
        tracker_with(mock, EngineConfig::default())
    }

    fn interview_email() -> EmailMessage {
        EmailMessage::new(
            "Acme Recruiting <jobs@acme.com>",
            "Interview invitation: Data Analyst",
            "We would like to schedule an interview with you for the Data Analyst role.",
        )
    }

    fn applied_email() -> EmailMessage {
        EmailMessage::new(
            "Acme Recruiting <jobs@acme.com>",
            "Application received: Data Analyst",
            "Thank you for applying to the Data Analyst position at Acme.",
        )
    }

    fn manual(company: &str, position: &str) -> ManualRecordInput {
        ManualRecordInput {
            company: company.into(),
            position: position.into(),
            status: Some(JobStatus::Applied),
            location: None,
        }
    }

    fn parse_cache_size(tracker: &JobTracker) -> usize {
        tracker
            .cache_stats()
            .into_iter()
            .find(|s| s.namespace == Namespace::Parse)
            .map(|s| s.size)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn repeat_classification_is_served_from_cache() {
        let mock = job_mock("Applied");
        let tracker = tracker(mock.clone());

        let first = tracker.classify(&applied_email()).await;
        let second = tracker.classify(&applied_email()).await;

        assert_eq!(first, second);
        assert_eq!(first.company.as_deref(), Some("Acme"));
        assert_eq!(mock.generate_calls(Stage::Stage1), 1);
        assert_eq!(mock.generate_calls(Stage::Stage2), 1);
    }

    #[tokio::test]
    async fn saturated_inference_degrades_to_rules() {
        let mock = Arc::new(
            MockInferenceEngine::new().with_behavior(Stage::Stage1, MockBehavior::Hang(Duration::from_millis(150))),
        );
        let mut config = EngineConfig::default();
        config.max_concurrent_inference = 1;
        let tracker = tracker_with(mock.clone(), config);

        let (first, second) = (interview_email(), applied_email());
        let (a, b) = tokio::join!(tracker.classify(&first), tracker.classify(&second));

        assert_eq!(a.origin, ResultOrigin::Fallback);
        assert_eq!(b, classify_with_rules(&second));
        assert_eq!(mock.generate_calls(Stage::Stage1), 1);
    }

    #[tokio::test]
    async fn email_creates_record_then_merges_progression() {
        let mock = job_mock("Applied");
        let tracker = tracker(mock.clone());

        let created = tracker.process_email(&applied_email()).await.unwrap();
        let IngestOutcome::Created { job_id, duplicate_risk, .. } = created else {
            panic!("expected creation, got {created:?}");
        };
        assert_eq!(duplicate_risk, DuplicateRisk::None);

        mock.set_behavior(Stage::Stage2, stage2("Interview"));
        let merged = tracker.process_email(&interview_email()).await.unwrap();
        match merged {
            IngestOutcome::Merged { job_id: merged_id, flagged, .. } => {
                assert_eq!(merged_id, job_id);
                assert_eq!(flagged, 0);
            }
            other => panic!("expected merge, got {other:?}"),
        }

        let record = tracker.get_record(job_id).unwrap();
        assert_eq!(record.status, Some(JobStatus::Interview));
        assert_eq!(record.sender_domain.as_deref(), Some("acme.com"));
        assert_eq!(tracker.linked_emails(job_id).unwrap().len(), 2);
        assert_eq!(tracker.list_records().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn linked_and_unrelated_emails_are_skipped() {
        let mock = job_mock("Applied");
        let tracker = tracker(mock.clone());

        let IngestOutcome::Created { job_id, .. } = tracker.process_email(&applied_email()).await.unwrap() else {
            panic!("expected creation");
        };
        assert_eq!(
            tracker.process_email(&applied_email()).await.unwrap(),
            IngestOutcome::AlreadyLinked { job_id }
        );

        mock.set_behavior(
            Stage::Stage1,
            MockBehavior::Respond(r#"{"is_job_related": false, "risk_level": "none"}"#.into()),
        );
        let newsletter = EmailMessage::new("News <digest@example.org>", "Weekly digest", "Top stories this week.");
        let outcome = tracker.process_email(&newsletter).await.unwrap();
        assert!(matches!(
            outcome,
            IngestOutcome::Skipped {
                reason: SkipReason::NotJobRelated,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn regression_is_queued_and_resolved() {
        let mock = job_mock("Interview");
        let tracker = tracker(mock.clone());
        let IngestOutcome::Created { job_id, .. } = tracker.process_email(&interview_email()).await.unwrap() else {
            panic!("expected creation");
        };

        mock.set_behavior(Stage::Stage2, stage2("Applied"));
        let outcome = tracker.process_email(&applied_email()).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Merged { flagged: 1, .. }), "{outcome:?}");

        let record = tracker.get_record(job_id).unwrap();
        assert_eq!(record.status, Some(JobStatus::Interview));
        assert!(record.needs_review);

        let pending = tracker.pending_reviews().unwrap();
        assert_eq!(pending.len(), 1);
        let conflict_id = pending[0].conflict.id;

        let resolved = tracker
            .resolve_conflict(conflict_id, ConflictDecision::KeepExisting)
            .await
            .unwrap();
        assert_eq!(resolved.status, Some(JobStatus::Interview));
        assert!(!resolved.needs_review);
        assert!(tracker.pending_reviews().unwrap().is_empty());

        let trail = tracker.audit_trail(job_id).unwrap();
        assert!(trail.iter().any(|a| a.action == AuditAction::FlaggedForReview));
        assert!(trail.iter().any(|a| a.action == AuditAction::ReviewResolved));

        let again = tracker.resolve_conflict(conflict_id, ConflictDecision::AcceptIncoming).await;
        assert!(matches!(again, Err(TrackerError::ConflictNotFound(_))));
    }

    #[tokio::test]
    async fn accepting_incoming_applies_value() {
        let mock = job_mock("Interview");
        let tracker = tracker(mock.clone());
        let IngestOutcome::Created { job_id, .. } = tracker.process_email(&interview_email()).await.unwrap() else {
            panic!("expected creation");
        };
        mock.set_behavior(Stage::Stage2, stage2("Applied"));
        tracker.process_email(&applied_email()).await.unwrap();

        let conflict_id = tracker.pending_reviews().unwrap()[0].conflict.id;
        let record = tracker
            .resolve_conflict(conflict_id, ConflictDecision::AcceptIncoming)
            .await
            .unwrap();
        assert_eq!(record.status, Some(JobStatus::Applied));
        assert_eq!(record.record_source, RecordSource::ManualEdited);

        let history = tracker.field_history(job_id).unwrap();
        assert_eq!(history.last().unwrap().new_value.as_deref(), Some("applied"));
    }

    #[tokio::test]
    async fn unknown_conflict_is_not_found() {
        let tracker = tracker(Arc::new(MockInferenceEngine::new()));
        let err = tracker
            .resolve_conflict(Uuid::new_v4(), ConflictDecision::KeepExisting)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::ConflictNotFound(_)));
    }

    #[tokio::test]
    async fn identical_manual_record_is_blocked() {
        let tracker = tracker(Arc::new(MockInferenceEngine::new()));
        let first = tracker.create_manual_record(manual("Acme", "Data Analyst")).await.unwrap();
        assert!(first.conflicts.is_empty());

        let err = tracker
            .create_manual_record(manual("ACME, Inc.", "data analyst"))
            .await
            .unwrap_err();
        match err {
            TrackerError::Conflict { existing, assessment } => {
                assert_eq!(existing, first.job_id);
                assert_eq!(assessment.risk, DuplicateRisk::Critical);
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        let trail = tracker.audit_trail(first.job_id).unwrap();
        assert!(trail.iter().any(|a| a.action == AuditAction::DuplicateBlocked));
        assert_eq!(tracker.list_records().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_identical_creates_serialize() {
        let tracker = tracker(Arc::new(MockInferenceEngine::new()));
        let (a, b) = tokio::join!(
            tracker.create_manual_record(manual("Globex", "Backend Engineer")),
            tracker.create_manual_record(manual("Globex", "Backend Engineer")),
        );
        let ok = [a.is_ok(), b.is_ok()].iter().filter(|x| **x).count();
        assert_eq!(ok, 1);
        assert!(matches!(a.err().or(b.err()), Some(TrackerError::Conflict { .. })));
    }

    #[tokio::test]
    async fn different_role_at_same_company_is_reported_not_blocked() {
        let tracker = tracker(Arc::new(MockInferenceEngine::new()));
        tracker.create_manual_record(manual("Acme", "Data Analyst")).await.unwrap();
        let second = tracker.create_manual_record(manual("Acme", "Office Manager")).await.unwrap();
        assert!(!second.conflicts.is_empty());
        assert_eq!(tracker.list_records().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn manual_input_is_validated() {
        let tracker = tracker(Arc::new(MockInferenceEngine::new()));
        let err = tracker.create_manual_record(manual("  ", "Data Analyst")).await.unwrap_err();
        assert!(matches!(err, TrackerError::Validation(_)));

        let long = "x".repeat(MAX_FIELD_CHARS + 1);
        let err = tracker.create_manual_record(manual("Acme", &long)).await.unwrap_err();
        assert!(matches!(err, TrackerError::Validation(_)));
    }

    #[tokio::test]
    async fn edit_applies_user_value_and_invalidates_cache() {
        let mock = job_mock("Applied");
        let tracker = tracker(mock.clone());
        tracker.classify(&applied_email()).await;
        assert_eq!(parse_cache_size(&tracker), 1);

        let created = tracker.create_manual_record(manual("Acme", "Data Analyst")).await.unwrap();
        // Creation only clears store-derived lookups.
        assert_eq!(parse_cache_size(&tracker), 1);

        let update = RecordUpdate {
            position: Some("Senior Data Analyst".into()),
            status: Some(JobStatus::Interview),
            ..Default::default()
        };
        let outcome = tracker.edit_record(created.job_id, update).await.unwrap();

        assert_eq!(outcome.record.position.as_deref(), Some("Senior Data Analyst"));
        assert_eq!(outcome.record.status, Some(JobStatus::Interview));
        assert_eq!(outcome.record.record_source, RecordSource::ManualEdited);
        assert_eq!(outcome.conflicts.len(), 2);
        assert_eq!(parse_cache_size(&tracker), 0);

        let stored = tracker.get_record(created.job_id).unwrap();
        assert_eq!(stored.position.as_deref(), Some("Senior Data Analyst"));
        assert!(tracker
            .audit_trail(created.job_id)
            .unwrap()
            .iter()
            .any(|a| a.action == AuditAction::UserEdited));
    }

    #[tokio::test]
    async fn edit_onto_existing_identity_is_blocked() {
        let tracker = tracker(Arc::new(MockInferenceEngine::new()));
        let acme = tracker.create_manual_record(manual("Acme", "Data Analyst")).await.unwrap();
        let globex = tracker.create_manual_record(manual("Globex", "Backend Engineer")).await.unwrap();

        let update = RecordUpdate {
            company: Some("Acme".into()),
            position: Some("Data Analyst".into()),
            ..Default::default()
        };
        let err = tracker.edit_record(globex.job_id, update).await.unwrap_err();
        assert!(matches!(err, TrackerError::Conflict { existing, .. } if existing == acme.job_id));
        assert_eq!(tracker.get_record(globex.job_id).unwrap().company, "Globex");
    }

    #[tokio::test]
    async fn identity_move_waits_for_target_identity_lock() {
        let tracker = tracker(Arc::new(MockInferenceEngine::new()));
        let globex = tracker.create_manual_record(manual("Globex", "Backend Engineer")).await.unwrap();
        let held = tracker.locks.lock(&identity_lock_key("Acme", Some("Data Analyst"))).await;

        let update = RecordUpdate {
            company: Some("Acme".into()),
            position: Some("Data Analyst".into()),
            ..Default::default()
        };
        let waiting = tokio::time::timeout(
            Duration::from_millis(50),
            tracker.edit_record(globex.job_id, update.clone()),
        )
        .await;
        assert!(waiting.is_err());

        // Edits that keep the identity only need the record lock.
        let status_only = RecordUpdate {
            status: Some(JobStatus::Interview),
            ..Default::default()
        };
        tracker.edit_record(globex.job_id, status_only).await.unwrap();

        drop(held);
        let moved = tracker.edit_record(globex.job_id, update).await.unwrap();
        assert_eq!(moved.record.company, "Acme");
        assert_eq!(moved.record.position.as_deref(), Some("Data Analyst"));
    }

    #[tokio::test]
    async fn background_sweeper_uses_configured_interval() {
        let mut config = EngineConfig::default();
        config.cache.sweep_interval_secs = 1;
        let tracker = tracker_with(Arc::new(MockInferenceEngine::new()), config);
        tracker.cache.insert_at(
            Namespace::Parse,
            "stale",
            CacheValue::Parse(classify_with_rules(&applied_email())),
            RecordSource::AutoInferred,
            vec![],
            chrono::Utc::now() - chrono::Duration::days(30),
        );
        assert_eq!(parse_cache_size(&tracker), 1);

        let handle = tracker.spawn_cache_sweeper();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        handle.shutdown().await;

        assert_eq!(parse_cache_size(&tracker), 0);
    }

    #[tokio::test]
    async fn empty_edit_and_missing_record_are_rejected() {
        let tracker = tracker(Arc::new(MockInferenceEngine::new()));
        let err = tracker.edit_record(Uuid::new_v4(), RecordUpdate::default()).await.unwrap_err();
        assert!(matches!(err, TrackerError::Validation(_)));

        let update = RecordUpdate {
            status: Some(JobStatus::Offer),
            ..Default::default()
        };
        let err = tracker.edit_record(Uuid::new_v4(), update).await.unwrap_err();
        assert!(matches!(err, TrackerError::NotFound(_)));
    }

    #[tokio::test]
    async fn unavailable_model_still_ingests_via_rules() {
        let mock = Arc::new(MockInferenceEngine::new());
        mock.fail_model_load(true);
        let tracker = tracker(mock);

        let email = EmailMessage::new(
            "Indeed <indeedapply@indeed.com>",
            "Indeed Application: Data Analyst",
            "Application submitted, Data Analyst, Acme - San Francisco, California",
        );
        let (job_id, result) = match tracker.process_email(&email).await.unwrap() {
            IngestOutcome::Created { job_id, result, .. } => (job_id, result),
            other => panic!("expected creation, got {other:?}"),
        };
        assert_eq!(result.origin, ResultOrigin::Fallback);

        let record = tracker.get_record(job_id).unwrap();
        assert_eq!(record.company, "Acme");
        assert_eq!(record.position.as_deref(), Some("Data Analyst"));
        assert_eq!(record.status, Some(JobStatus::Applied));
        // Fallback results are not cached.
        assert_eq!(parse_cache_size(&tracker), 0);
    }

    #[tokio::test]
    async fn sweep_prunes_idle_locks() {
        let tracker = tracker(Arc::new(MockInferenceEngine::new()));
        tracker.create_manual_record(manual("Acme", "Data Analyst")).await.unwrap();
        assert_eq!(tracker.locks.len(), 1);
        tracker.sweep_cache();
        assert!(tracker.locks.is_empty());
    }

    #[test]
    fn status_values_are_canonicalized() {
        assert_eq!(validate_field_value(RecordField::Status, " Interview ").unwrap(), "interview");
        assert!(validate_field_value(RecordField::Status, "ghosted").is_err());
        assert_eq!(validate_field_value(RecordField::Company, " Acme ").unwrap(), "Acme");
    }

    #[test]
    fn lookup_fragment_uses_first_normalized_token() {
        assert_eq!(lookup_fragment("Acme Analytics, Inc."), "acme");
        assert_eq!(lookup_fragment("Globex"), "globex");
    }
}
