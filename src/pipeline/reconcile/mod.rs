//! Conflict and duplicate engine.
//!
//! Reads record snapshots, decides, and hands back values to persist. No
//! I/O happens here; the tracker owns the store and the locks.

pub mod conflict;
pub mod duplicate;
pub mod locks;
pub mod merge;
pub mod similarity;

pub use conflict::{classify_field, detect_conflicts, select_strategy, IncomingData};
pub use duplicate::{assess_duplicates, Candidate, DuplicateAssessment, DuplicateMatch, MatchDimension};
pub use locks::KeyedLocks;
pub use merge::{merge_record, resolve_value, set_field_value, MergeOutcome};
pub use similarity::{normalize_company, normalize_title, record_similarity, weighted_similarity};

/// Lock/cache key for a normalized company+title pair.
pub fn identity_key(company: &str, title: Option<&str>) -> String {
    format!(
        "{}|{}",
        normalize_company(company),
        title.map(normalize_title).unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_key_normalizes_both_parts() {
        assert_eq!(
            identity_key("Acme, Inc.", Some("Sr Data Analyst")),
            identity_key("ACME", Some("senior data analyst"))
        );
        assert_eq!(identity_key("Acme", None), "acme|");
    }
}
