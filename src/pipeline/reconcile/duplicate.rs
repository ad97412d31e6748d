//! Multi-dimension duplicate detection for incoming job data.
//!
//! Each dimension runs independently over the candidate window; the overall
//! risk is the strongest dimension that matched:
//! exact → CRITICAL, fuzzy → HIGH, domain/semantic → MEDIUM, temporal → LOW.

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{DuplicateRisk, EmailMessage, JobRecord, LinkedEmail};
use crate::pipeline::classifier::fallback::extract_fields;
use crate::pipeline::classifier::patterns;
use crate::pipeline_config::ReconcileConfig;

use super::similarity::{company_similarity, normalize_company, normalize_title, record_similarity, title_similarity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchDimension {
    Exact,
    Fuzzy,
    Domain,
    Semantic,
    Temporal,
}

impl MatchDimension {
    pub fn risk(&self) -> DuplicateRisk {
        match self {
            Self::Exact => DuplicateRisk::Critical,
            Self::Fuzzy => DuplicateRisk::High,
            Self::Domain | Self::Semantic => DuplicateRisk::Medium,
            Self::Temporal => DuplicateRisk::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateMatch {
    pub job_id: Uuid,
    pub dimension: MatchDimension,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateAssessment {
    pub risk: DuplicateRisk,
    pub matches: Vec<DuplicateMatch>,
    /// Record behind the strongest match.
    pub best_match: Option<Uuid>,
}

impl DuplicateAssessment {
    pub fn none() -> Self {
        Self {
            risk: DuplicateRisk::None,
            matches: Vec::new(),
            best_match: None,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.risk == DuplicateRisk::Critical
    }

    /// The strongest match at or above `risk`, if any.
    pub fn strongest_at_least(&self, risk: DuplicateRisk) -> Option<&DuplicateMatch> {
        self.matches
            .iter()
            .filter(|m| m.dimension.risk().rank() >= risk.rank())
            .max_by(|a, b| {
                a.dimension
                    .risk()
                    .rank()
                    .cmp(&b.dimension.risk().rank())
                    .then(a.score.total_cmp(&b.score))
            })
    }
}

/// Identity of the job data being checked.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub company: &'a str,
    pub position: Option<&'a str>,
    pub sender_domain: Option<&'a str>,
}

fn exact_match(candidate: &Candidate<'_>, record: &JobRecord) -> bool {
    normalize_company(candidate.company) == normalize_company(&record.company)
        && candidate.position.map(normalize_title).unwrap_or_default()
            == record.position.as_deref().map(normalize_title).unwrap_or_default()
}

fn shares_employer_domain(candidate: &Candidate<'_>, record: &JobRecord) -> bool {
    match (candidate.sender_domain, record.sender_domain.as_deref()) {
        (Some(a), Some(b)) => {
            a.eq_ignore_ascii_case(b) && !patterns::is_ats_domain(a) && !patterns::is_free_mail_domain(a)
                && !patterns::is_job_board_domain(a)
        }
        _ => false,
    }
}

/// Re-extract fields from a record's source emails and compare to the candidate.
fn semantic_score(
    candidate: &Candidate<'_>,
    emails: &[LinkedEmail],
    config: &ReconcileConfig,
) -> Option<f64> {
    let position = candidate.position?;
    emails
        .iter()
        .take(config.semantic_email_limit)
        .filter_map(|email| {
            let message = EmailMessage {
                sender: email.sender.clone(),
                subject: email.subject.clone(),
                body: email.body_excerpt.clone(),
                received_at: Some(email.received_at),
            };
            let fields = extract_fields(&message);
            let company = company_similarity(candidate.company, fields.company.as_deref()?);
            let title = title_similarity(position, fields.position.as_deref()?);
            (company >= config.similar_threshold && title >= config.similar_threshold)
                .then_some((company + title) / 2.0)
        })
        .max_by(f64::total_cmp)
}

/// Run every dimension of `candidate` against `records`.
///
/// `records` should already be limited to the candidate window; `emails`
/// maps record ids to their linked source emails.
pub fn assess_duplicates(
    candidate: &Candidate<'_>,
    records: &[JobRecord],
    emails: &HashMap<Uuid, Vec<LinkedEmail>>,
    config: &ReconcileConfig,
    now: NaiveDateTime,
) -> DuplicateAssessment {
    let exact_since = now - Duration::days(config.exact_window_days);
    let temporal_since = now - Duration::days(config.temporal_window_days);
    let mut matches = Vec::new();

    for record in records {
        if record.created_at >= exact_since && exact_match(candidate, record) {
            matches.push(DuplicateMatch {
                job_id: record.id,
                dimension: MatchDimension::Exact,
                score: 1.0,
            });
            continue;
        }

        let score = record_similarity(
            candidate.company,
            candidate.position,
            &record.company,
            record.position.as_deref(),
        );
        if score >= config.duplicate_threshold {
            matches.push(DuplicateMatch {
                job_id: record.id,
                dimension: MatchDimension::Fuzzy,
                score,
            });
            continue;
        }

        if shares_employer_domain(candidate, record) {
            matches.push(DuplicateMatch {
                job_id: record.id,
                dimension: MatchDimension::Domain,
                score,
            });
        }

        if let Some(semantic) = emails
            .get(&record.id)
            .and_then(|linked| semantic_score(candidate, linked, config))
        {
            matches.push(DuplicateMatch {
                job_id: record.id,
                dimension: MatchDimension::Semantic,
                score: semantic,
            });
        }

        if record.created_at >= temporal_since
            && company_similarity(candidate.company, &record.company) >= config.similar_threshold
        {
            matches.push(DuplicateMatch {
                job_id: record.id,
                dimension: MatchDimension::Temporal,
                score,
            });
        }
    }

    let mut assessment = DuplicateAssessment {
        risk: DuplicateRisk::None,
        matches,
        best_match: None,
    };
    if let Some(best) = assessment.strongest_at_least(DuplicateRisk::Low) {
        let (risk, id) = (best.dimension.risk(), best.job_id);
        assessment.risk = risk;
        assessment.best_match = Some(id);
    }

    tracing::debug!(
        risk = assessment.risk.as_str(),
        matches = assessment.matches.len(),
        "Duplicate assessment complete"
    );
    assessment
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::models::RecordSource;

    fn now() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn record(company: &str, position: Option<&str>, days_ago: i64, domain: Option<&str>) -> JobRecord {
        let created = now() - Duration::days(days_ago);
        JobRecord {
            id: Uuid::new_v4(),
            company: company.into(),
            position: position.map(str::to_string),
            status: None,
            location: None,
            sender_domain: domain.map(str::to_string),
            record_source: RecordSource::AutoInferred,
            llm_confidence: Some(0.9),
            field_metadata: BTreeMap::new(),
            needs_review: false,
            created_at: created,
            updated_at: created,
        }
    }

    fn candidate<'a>(company: &'a str, position: Option<&'a str>, domain: Option<&'a str>) -> Candidate<'a> {
        Candidate {
            company,
            position,
            sender_domain: domain,
        }
    }

    fn assess(c: &Candidate<'_>, records: &[JobRecord]) -> DuplicateAssessment {
        assess_duplicates(c, records, &HashMap::new(), &ReconcileConfig::default(), now())
    }

    #[test]
    fn exact_within_window_is_critical() {
        let existing = record("Acme Inc.", Some("Data Analyst"), 30, None);
        let result = assess(&candidate("ACME", Some("data analyst"), None), &[existing.clone()]);
        assert_eq!(result.risk, DuplicateRisk::Critical);
        assert_eq!(result.best_match, Some(existing.id));
        assert!(result.is_blocking());
    }

    #[test]
    fn exact_outside_window_is_only_fuzzy() {
        let existing = record("Acme", Some("Data Analyst"), 120, None);
        let result = assess(&candidate("Acme", Some("Data Analyst"), None), &[existing]);
        assert_eq!(result.risk, DuplicateRisk::High);
    }

    #[test]
    fn near_match_is_high() {
        let existing = record("Acme", Some("Data Analyts"), 10, None);
        let result = assess(&candidate("Acme", Some("Data Analyst"), None), &[existing]);
        assert_eq!(result.risk, DuplicateRisk::High);
        assert_eq!(result.matches[0].dimension, MatchDimension::Fuzzy);
    }

    #[test]
    fn shared_corporate_domain_is_medium() {
        let existing = record("Initech", Some("Backend Engineer"), 60, Some("initech.com"));
        let result = assess(&candidate("Initech", Some("Data Analyst"), Some("initech.com")), &[existing]);
        assert_eq!(result.risk, DuplicateRisk::Medium);
    }

    #[test]
    fn shared_ats_domain_is_ignored() {
        let existing = record("Initech", Some("Backend Engineer"), 60, Some("greenhouse.io"));
        let result = assess(&candidate("Globex", Some("Data Analyst"), Some("greenhouse.io")), &[existing]);
        assert_eq!(result.risk, DuplicateRisk::None);
    }

    #[test]
    fn same_company_within_days_is_low() {
        let existing = record("Initech", Some("Backend Engineer"), 2, None);
        let result = assess(&candidate("Initech", Some("Data Analyst"), None), &[existing]);
        assert_eq!(result.risk, DuplicateRisk::Low);
        assert_eq!(result.matches[0].dimension, MatchDimension::Temporal);
    }

    #[test]
    fn unrelated_is_none() {
        let existing = record("Globex", Some("Backend Engineer"), 2, None);
        let result = assess(&candidate("Acme", Some("Data Analyst"), None), &[existing]);
        assert_eq!(result.risk, DuplicateRisk::None);
        assert!(result.best_match.is_none());
    }

    #[test]
    fn semantic_dimension_uses_linked_email_content() {
        // Record was stored under the job board's name; its source email names the employer.
        let existing = record("Indeed", Some("Analyst"), 60, None);
        let linked = LinkedEmail {
            job_id: existing.id,
            content_hash: "h".into(),
            sender: "Indeed <indeedapply@indeed.com>".into(),
            subject: "Indeed Application: Data Analyst".into(),
            body_excerpt: "Application submitted, Data Analyst, Acme - San Francisco, California".into(),
            received_at: now() - Duration::days(60),
        };
        let emails = HashMap::from([(existing.id, vec![linked])]);
        let result = assess_duplicates(
            &candidate("Acme", Some("Data Analyst"), None),
            &[existing],
            &emails,
            &ReconcileConfig::default(),
            now(),
        );
        assert_eq!(result.risk, DuplicateRisk::Medium);
        assert!(result.matches.iter().any(|m| m.dimension == MatchDimension::Semantic));
    }
}
