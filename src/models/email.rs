use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::enums::{JobStatus, RiskLevel};

/// An inbound message as handed over by the mail sync layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Raw `From` header, e.g. `"Acme Talent <no-reply@acme.com>"`.
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub received_at: Option<NaiveDateTime>,
}

impl EmailMessage {
    pub fn new(sender: &str, subject: &str, body: &str) -> Self {
        Self {
            sender: sender.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            received_at: None,
        }
    }

    /// Bare address from the `From` header, lowercased.
    pub fn sender_address(&self) -> Option<String> {
        let raw = self.sender.trim();
        let addr = match (raw.rfind('<'), raw.rfind('>')) {
            (Some(start), Some(end)) if end > start => &raw[start + 1..end],
            _ => raw,
        };
        let addr = addr.trim();
        if addr.contains('@') {
            Some(addr.to_lowercase())
        } else {
            None
        }
    }

    /// Domain part of the sender address, lowercased.
    pub fn sender_domain(&self) -> Option<String> {
        self.sender_address()
            .and_then(|a| a.rsplit_once('@').map(|(_, d)| d.to_string()))
            .filter(|d| !d.is_empty())
    }

    /// Display name from the `From` header, without quotes.
    pub fn sender_display_name(&self) -> Option<String> {
        let raw = self.sender.trim();
        let start = raw.find('<')?;
        let name = raw[..start].trim().trim_matches('"').trim();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }
}

/// Output of the Stage 1 gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub is_job_related: bool,
    pub risk_level: RiskLevel,
}

/// Which tier of the fallback chain produced a `ParseResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOrigin {
    Inference,
    Stage1Only,
    Fallback,
    Conservative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub is_job_related: bool,
    pub company: Option<String>,
    pub position: Option<String>,
    pub status: Option<JobStatus>,
    pub location: Option<String>,
    pub confidence: f32,
    pub origin: ResultOrigin,
}

impl ParseResult {
    pub fn not_job_related(confidence: f32, origin: ResultOrigin) -> Self {
        Self {
            is_job_related: false,
            company: None,
            position: None,
            status: None,
            location: None,
            confidence: confidence.clamp(0.0, 1.0),
            origin,
        }
    }

    /// All-null, low-confidence terminal result.
    pub fn conservative() -> Self {
        Self::not_job_related(0.1, ResultOrigin::Conservative)
    }

    /// Null out extracted fields on negative results and clamp confidence.
    pub fn enforce_invariants(mut self) -> Self {
        if !self.is_job_related {
            self.company = None;
            self.position = None;
            self.status = None;
            self.location = None;
        }
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_display_name_and_domain() {
        let e = EmailMessage::new("\"Acme Talent\" <No-Reply@Acme.com>", "s", "b");
        assert_eq!(e.sender_address().as_deref(), Some("no-reply@acme.com"));
        assert_eq!(e.sender_domain().as_deref(), Some("acme.com"));
        assert_eq!(e.sender_display_name().as_deref(), Some("Acme Talent"));
    }

    #[test]
    fn bare_address_has_no_display_name() {
        let e = EmailMessage::new("jobs@lever.co", "s", "b");
        assert_eq!(e.sender_domain().as_deref(), Some("lever.co"));
        assert_eq!(e.sender_display_name(), None);
    }

    #[test]
    fn sender_without_address_has_no_domain() {
        let e = EmailMessage::new("Someone", "s", "b");
        assert_eq!(e.sender_domain(), None);
    }

    #[test]
    fn invariants_null_fields_when_not_job_related() {
        let r = ParseResult {
            is_job_related: false,
            company: Some("Acme".into()),
            position: Some("Engineer".into()),
            status: Some(JobStatus::Applied),
            location: Some("Remote".into()),
            confidence: 1.7,
            origin: ResultOrigin::Inference,
        }
        .enforce_invariants();
        assert!(r.company.is_none() && r.position.is_none() && r.status.is_none());
        assert!(r.location.is_none());
        assert_eq!(r.confidence, 1.0);
    }

    #[test]
    fn conservative_is_not_job_related() {
        let r = ParseResult::conservative();
        assert!(!r.is_job_related);
        assert_eq!(r.origin, ResultOrigin::Conservative);
    }
}
