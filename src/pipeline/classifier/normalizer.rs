//! Response normalizer: raw model text → validated results.
//!
//! Pipeline: strip wrapper artifacts → isolate the first balanced `{...}`
//! → strict parse → regex key/value recovery → conservative default.
//! Never fails; the recovery tier tells the caller how much to trust the
//! value.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::models::{ClassificationResult, JobStatus, ParseResult, ResultOrigin, RiskLevel};

use super::patterns;

/// Fields shorter than this are discarded.
const MIN_FIELD_CHARS: usize = 2;
const MAX_FIELD_CHARS: usize = 100;

/// Confidence used when the model omits it.
const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Ceiling for values recovered by regex.
const REGEX_CONFIDENCE_CAP: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    Strict,
    Regex,
    Conservative,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T> {
    pub value: T,
    pub recovery: Recovery,
}

impl<T> Normalized<T> {
    pub fn is_usable(&self) -> bool {
        self.recovery != Recovery::Conservative
    }
}

// ═══════════════════════════════════════════════════════════
// Cleaning
// ═══════════════════════════════════════════════════════════

static THINK_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<think>.*?</think>|<unused\d+>thought\n.*?(?:<unused\d+>|$)").expect("valid regex")
});

static SPECIAL_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<unused\d+>|<\|[^|>]{1,40}\|>|</?s>").expect("valid regex"));

static ROLE_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:assistant|model|response|output|answer)\s*:\s*").expect("valid regex")
});

/// Strip thinking blocks, special tokens, role prefixes and code fences.
pub fn strip_wrappers(raw: &str) -> String {
    let text = THINK_BLOCK_RE.replace_all(raw, "");
    let text = SPECIAL_TOKEN_RE.replace_all(&text, "");
    let text = ROLE_PREFIX_RE.replace(&text, "");
    let mut text = text.trim().to_string();

    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        let inner = match after.find("```") {
            Some(end) => &after[..end],
            None => after,
        };
        text = inner.trim().to_string();
    }
    text
}

/// First balanced `{...}` span, ignoring braces inside strings.
pub fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn strict_object(cleaned: &str) -> Option<Map<String, Value>> {
    let span = first_balanced_object(cleaned)?;
    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════
// Field repair
// ═══════════════════════════════════════════════════════════

const PLACEHOLDER_WORDS: &[&str] = &[
    "unknown",
    "n/a",
    "na",
    "none",
    "null",
    "nil",
    "undefined",
    "tbd",
    "company",
    "company name",
    "the company",
    "employer",
    "position",
    "job",
    "job title",
    "role",
    "title",
    "not specified",
    "not mentioned",
    "not provided",
    "not available",
    "string",
    "example",
    "candidate",
    "recruiter",
    "hiring manager",
];

static CODE_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    // REQ-12345, JR1234, R_0042: one token, upper/digits/separators, at least one digit.
    Regex::new(r"^[A-Z0-9_#-]*[0-9][A-Z0-9_#-]*$").expect("valid regex")
});

/// Remove corrupted tokens, replacement characters and control characters.
pub fn strip_corrupted_tokens(value: &str) -> String {
    let text = SPECIAL_TOKEN_RE.replace_all(value, "");
    text.chars()
        .filter(|c| *c != '\u{FFFD}' && !c.is_control())
        .collect()
}

/// Clean a free-text field; `None` if it is a placeholder or implausible.
pub fn clean_field(value: &str) -> Option<String> {
    let stripped = strip_corrupted_tokens(value);
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '*')
        .trim_end_matches(['.', ',', ';', ':', '!'])
        .trim();

    let len = trimmed.chars().count();
    if !(MIN_FIELD_CHARS..=MAX_FIELD_CHARS).contains(&len) {
        return None;
    }
    if !trimmed.chars().any(|c| c.is_alphabetic()) {
        return None;
    }
    if len >= 4 && CODE_TOKEN_RE.is_match(trimmed) {
        return None;
    }
    let lower = trimmed.to_lowercase();
    if PLACEHOLDER_WORDS.contains(&lower.as_str()) || lower.starts_with('<') || lower.contains("{{") {
        return None;
    }
    Some(trimmed.to_string())
}

/// Company names additionally reject tracking systems and job boards.
pub fn clean_company(value: &str) -> Option<String> {
    let cleaned = clean_field(value)?;
    let lower = cleaned.to_lowercase();
    if patterns::NON_EMPLOYER_NAMES.contains(&lower.as_str())
        || patterns::is_ats_domain(&lower)
        || patterns::is_job_board_domain(&lower)
    {
        return None;
    }
    Some(cleaned)
}

pub fn clean_position(value: &str) -> Option<String> {
    let cleaned = clean_field(value)?;
    let lower = cleaned.to_lowercase();
    let without_suffix = [" position", " role", " opening"]
        .iter()
        .find(|s| lower.ends_with(*s))
        .and_then(|s| cleaned.get(..cleaned.len() - s.len()))
        .map(str::to_string)
        .unwrap_or_else(|| cleaned.clone());
    let without_article = without_suffix
        .strip_prefix("the ")
        .or_else(|| without_suffix.strip_prefix("The "))
        .map(str::to_string)
        .unwrap_or(without_suffix);
    clean_field(&without_article)
}

/// Map a status label, or free text describing one, onto the enum.
pub fn map_status(raw: &str) -> Option<JobStatus> {
    if let Some(status) = JobStatus::from_label(raw) {
        return Some(status);
    }
    let lower = raw.to_lowercase();
    if ["reject", "declin", "unsuccessful", "not selected", "not moving forward", "turned down"]
        .iter()
        .any(|k| lower.contains(k))
    {
        Some(JobStatus::Declined)
    } else if lower.contains("offer") {
        Some(JobStatus::Offer)
    } else if ["interview", "screen", "assessment"].iter().any(|k| lower.contains(k)) {
        Some(JobStatus::Interview)
    } else if ["appl", "submitted", "received", "under review", "pending", "in review"]
        .iter()
        .any(|k| lower.contains(k))
    {
        Some(JobStatus::Applied)
    } else {
        None
    }
}

fn map_risk(raw: &str) -> RiskLevel {
    RiskLevel::from_str(raw.trim().to_lowercase().as_str()).unwrap_or(RiskLevel::Medium)
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}

fn coerce_confidence(value: Option<&Value>) -> f32 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(v) if v.is_finite() && v > 1.0 && v <= 100.0 => (v / 100.0) as f32,
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0) as f32,
        _ => DEFAULT_CONFIDENCE,
    }
}

fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

// ═══════════════════════════════════════════════════════════
// Regex recovery
// ═══════════════════════════════════════════════════════════

static JOB_RELATED_KV_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"?is_?job_?related"?\s*[:=]\s*"?(true|false|yes|no)\b"#).expect("valid regex")
});

static RISK_KV_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"?risk_?level"?\s*[:=]\s*"?(none|low|medium|high)\b"#).expect("valid regex")
});

static CONFIDENCE_KV_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"?confidence"?\s*[:=]\s*"?([0-9]*\.?[0-9]+)"#).expect("valid regex")
});

fn string_kv(text: &str, key: &str) -> Option<String> {
    let pattern = format!(r#"(?i)"?{key}"?\s*[:=]\s*"([^"\n]{{0,200}})""#);
    let re = Regex::new(&pattern).ok()?;
    re.captures(text).map(|c| c[1].to_string())
}

// ═══════════════════════════════════════════════════════════
// Entry points
// ═══════════════════════════════════════════════════════════

/// Normalize Stage 1 output.
pub fn normalize_classification(raw: &str) -> Normalized<ClassificationResult> {
    let cleaned = strip_wrappers(raw);

    if let Some(map) = strict_object(&cleaned) {
        if let Some(is_job_related) = map.get("is_job_related").and_then(coerce_bool) {
            let risk_level = str_field(&map, "risk_level").map(map_risk).unwrap_or(RiskLevel::Medium);
            return Normalized {
                value: ClassificationResult {
                    is_job_related,
                    risk_level,
                },
                recovery: Recovery::Strict,
            };
        }
    }

    if let Some(caps) = JOB_RELATED_KV_RE.captures(&cleaned) {
        let is_job_related = matches!(caps[1].to_lowercase().as_str(), "true" | "yes");
        let risk_level = RISK_KV_RE
            .captures(&cleaned)
            .map(|c| map_risk(&c[1]))
            .unwrap_or(RiskLevel::Medium);
        return Normalized {
            value: ClassificationResult {
                is_job_related,
                risk_level,
            },
            recovery: Recovery::Regex,
        };
    }

    Normalized {
        value: ClassificationResult {
            is_job_related: false,
            risk_level: RiskLevel::High,
        },
        recovery: Recovery::Conservative,
    }
}

/// Normalize Stage 2 output. A missing `is_job_related` means the gate
/// already passed.
pub fn normalize_parse(raw: &str) -> Normalized<ParseResult> {
    let cleaned = strip_wrappers(raw);

    if let Some(map) = strict_object(&cleaned) {
        let has_known_field = ["is_job_related", "company", "position", "status"]
            .iter()
            .any(|k| map.contains_key(*k));
        if has_known_field {
            let result = ParseResult {
                is_job_related: map.get("is_job_related").and_then(coerce_bool).unwrap_or(true),
                company: str_field(&map, "company").and_then(clean_company),
                position: str_field(&map, "position").and_then(clean_position),
                status: str_field(&map, "status").and_then(map_status),
                location: str_field(&map, "location").and_then(clean_field),
                confidence: coerce_confidence(map.get("confidence")),
                origin: ResultOrigin::Inference,
            };
            return Normalized {
                value: result.enforce_invariants(),
                recovery: Recovery::Strict,
            };
        }
    }

    let company = string_kv(&cleaned, "company");
    let position = string_kv(&cleaned, "position");
    let status = string_kv(&cleaned, "status");
    let flag = JOB_RELATED_KV_RE
        .captures(&cleaned)
        .map(|c| matches!(c[1].to_lowercase().as_str(), "true" | "yes"));

    if flag.is_some() || company.is_some() || position.is_some() || status.is_some() {
        let confidence = CONFIDENCE_KV_RE
            .captures(&cleaned)
            .and_then(|c| c[1].parse::<f64>().ok())
            .map(|v| coerce_confidence(Some(&Value::from(v))))
            .unwrap_or(DEFAULT_CONFIDENCE)
            .min(REGEX_CONFIDENCE_CAP);
        let result = ParseResult {
            is_job_related: flag.unwrap_or(true),
            company: company.as_deref().and_then(clean_company),
            position: position.as_deref().and_then(clean_position),
            status: status.as_deref().and_then(map_status),
            location: string_kv(&cleaned, "location").as_deref().and_then(clean_field),
            confidence,
            origin: ResultOrigin::Inference,
        };
        return Normalized {
            value: result.enforce_invariants(),
            recovery: Recovery::Regex,
        };
    }

    Normalized {
        value: ParseResult::conservative(),
        recovery: Recovery::Conservative,
    }
}
