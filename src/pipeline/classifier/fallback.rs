//! Deterministic rule-based classification.
//!
//! Used when inference times out, the session pool cannot initialize, the
//! model output is unusable, or the inference semaphore is saturated.
//! Pure functions over the message: no I/O, no inference.

use crate::models::{EmailMessage, JobStatus, ParseResult, ResultOrigin};

use super::normalizer::{clean_company, clean_field, clean_position};
use super::patterns::{self, keyword_hits};
use super::sanitize::remove_invisible_chars;

const ATS_CONFIDENCE: f32 = 0.9;
const KEYWORD_FAMILY_CONFIDENCE: f32 = 0.85;
const NEWSLETTER_CONFIDENCE: f32 = 0.8;
const HEURISTIC_CONFIDENCE: f32 = 0.6;

/// Job vocabulary hits needed before the generic heuristic says "job related".
const MIN_JOB_HITS: usize = 2;

/// Structured fields recovered without inference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeuristicFields {
    pub company: Option<String>,
    pub position: Option<String>,
    pub status: Option<JobStatus>,
    pub location: Option<String>,
}

impl HeuristicFields {
    pub fn filled(&self) -> usize {
        [
            self.company.is_some(),
            self.position.is_some(),
            self.status.is_some(),
            self.location.is_some(),
        ]
        .iter()
        .filter(|f| **f)
        .count()
    }
}

/// Status implied by keyword families. Rejection outranks offer outranks
/// interview outranks a plain confirmation.
pub fn detect_status(text: &str) -> Option<JobStatus> {
    if patterns::REJECTION_RE.is_match(text) {
        Some(JobStatus::Declined)
    } else if patterns::OFFER_RE.is_match(text) {
        Some(JobStatus::Offer)
    } else if patterns::INTERVIEW_RE.is_match(text) {
        Some(JobStatus::Interview)
    } else if patterns::APPLICATION_RE.is_match(text) {
        Some(JobStatus::Applied)
    } else {
        None
    }
}

fn company_from_display_name(name: &str) -> Option<String> {
    let mut name = name.trim().to_string();
    if let Some(idx) = name.to_lowercase().find(" via ") {
        name.truncate(idx);
    }
    let lower = name.to_lowercase();
    if let Some(suffix) = patterns::DISPLAY_NAME_SUFFIXES.iter().find(|s| lower.ends_with(*s)) {
        if let Some(stripped) = name.get(..name.len() - suffix.len()) {
            name = stripped.trim().to_string();
        }
    }
    if patterns::NON_EMPLOYER_NAMES.contains(&name.to_lowercase().as_str()) {
        return None;
    }
    clean_company(&name)
}

fn company_from_domain(domain: &str) -> Option<String> {
    if !patterns::is_employer_domain(domain) {
        return None;
    }
    let label = patterns::domain_label(domain)?;
    let mut chars = label.chars();
    let first = chars.next()?;
    clean_company(&format!("{}{}", first.to_uppercase(), chars.as_str()))
}

/// Pull company, position, status and location out of a message using the
/// shared pattern families. Independent of the job/not-job decision.
pub fn extract_fields(email: &EmailMessage) -> HeuristicFields {
    let subject = remove_invisible_chars(&email.subject);
    let body = remove_invisible_chars(&email.body);
    let text = format!("{subject}\n{body}");

    let mut fields = HeuristicFields::default();

    if let Some(caps) = patterns::SUBMITTED_LINE_RE.captures(&text) {
        fields.position = clean_position(&caps["position"]);
        fields.company = clean_company(&caps["company"]);
        fields.location = clean_field(&caps["location"]);
    }

    if fields.position.is_none() {
        if let Some(caps) = patterns::BOARD_SUBJECT_RE.captures(&subject) {
            fields.position = clean_position(&caps["position"]);
        }
    }

    if let Some(caps) = patterns::POSITION_AT_COMPANY_RE.captures(&text) {
        if fields.position.is_none() {
            fields.position = clean_position(&caps["position"]);
        }
        if fields.company.is_none() {
            fields.company = clean_company(&caps["company"]);
        }
    }

    if fields.company.is_none() {
        fields.company = patterns::COMPANY_RE
            .captures(&text)
            .and_then(|caps| clean_company(&caps["company"]));
    }

    if fields.position.is_none() {
        fields.position = patterns::POSITION_RE.captures(&text).and_then(|caps| {
            caps.name("position")
                .or_else(|| caps.name("position2"))
                .and_then(|m| clean_position(m.as_str()))
        });
    }

    if fields.location.is_none() {
        fields.location = patterns::LOCATION_RE
            .captures(&text)
            .and_then(|caps| clean_field(&caps["location"]));
    }

    if fields.company.is_none() {
        fields.company = email
            .sender_display_name()
            .and_then(|n| company_from_display_name(&n))
            .or_else(|| email.sender_domain().and_then(|d| company_from_domain(&d)));
    }

    fields.status = detect_status(&text);
    fields
}

fn with_fields(fields: HeuristicFields, confidence: f32, origin: ResultOrigin) -> ParseResult {
    ParseResult {
        is_job_related: true,
        company: fields.company,
        position: fields.position,
        status: fields.status,
        location: fields.location,
        confidence,
        origin,
    }
    .enforce_invariants()
}

/// Ordered rules: ATS sender → keyword families → job board or newsletter
/// signals → job vs marketing vocabulary. Ambiguous mail is not job related.
pub fn classify_with_rules(email: &EmailMessage) -> ParseResult {
    let fields = extract_fields(email);
    let domain = email.sender_domain().unwrap_or_default();

    if patterns::is_ats_domain(&domain) {
        return with_fields(fields, ATS_CONFIDENCE, ResultOrigin::Fallback);
    }

    if fields.status.is_some() {
        return with_fields(fields, KEYWORD_FAMILY_CONFIDENCE, ResultOrigin::Fallback);
    }

    let text = format!("{}\n{}", email.subject, email.body);
    if patterns::NEWSLETTER_RE.is_match(&text) || patterns::is_job_board_domain(&domain) {
        return ParseResult::not_job_related(NEWSLETTER_CONFIDENCE, ResultOrigin::Fallback);
    }

    let lower = text.to_lowercase();
    let job_hits = keyword_hits(&lower, patterns::JOB_KEYWORDS);
    let marketing_hits = keyword_hits(&lower, patterns::MARKETING_KEYWORDS);
    if job_hits >= MIN_JOB_HITS && job_hits > marketing_hits {
        with_fields(fields, HEURISTIC_CONFIDENCE, ResultOrigin::Fallback)
    } else {
        ParseResult::not_job_related(HEURISTIC_CONFIDENCE, ResultOrigin::Fallback)
    }
}

/// Result used when Stage 1 said "job related" but Stage 2 failed.
/// Fields come from the heuristic extractor; confidence never exceeds `cap`.
pub fn stage1_only_result(email: &EmailMessage, cap: f32) -> ParseResult {
    let fields = extract_fields(email);
    let confidence = (0.3 + 0.1 * fields.filled() as f32).min(cap);
    with_fields(fields, confidence, ResultOrigin::Stage1Only)
}
