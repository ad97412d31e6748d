//! Name normalization and weighted string similarity.

use std::collections::HashSet;

/// Legal-form tokens dropped from the end of company names.
const LEGAL_SUFFIXES: &[&str] = &[
    "inc",
    "incorporated",
    "llc",
    "llp",
    "ltd",
    "limited",
    "corp",
    "corporation",
    "co",
    "company",
    "gmbh",
    "plc",
    "ag",
    "sa",
    "bv",
    "pty",
];

const TITLE_ABBREVIATIONS: &[(&str, &str)] = &[
    ("sr", "senior"),
    ("jr", "junior"),
    ("eng", "engineer"),
    ("engr", "engineer"),
    ("mgr", "manager"),
    ("dev", "developer"),
    ("swe", "software engineer"),
    ("pm", "product manager"),
    ("assoc", "associate"),
];

const EDIT_WEIGHT: f64 = 0.5;
const CHAR_SET_WEIGHT: f64 = 0.2;
const TOKEN_WEIGHT: f64 = 0.3;

const COMPANY_WEIGHT: f64 = 0.6;
const TITLE_WEIGHT: f64 = 0.4;

/// Multiplier applied when one side has no title to compare.
const MISSING_TITLE_FACTOR: f64 = 0.8;

fn alnum_tokens(input: &str) -> Vec<String> {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '&' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Lowercase, punctuation-free company name without trailing legal forms.
pub fn normalize_company(name: &str) -> String {
    let mut tokens = alnum_tokens(name);
    while tokens.len() > 1 && tokens.last().is_some_and(|t| LEGAL_SUFFIXES.contains(&t.as_str())) {
        tokens.pop();
    }
    tokens.join(" ")
}

/// Lowercase, punctuation-free title with common abbreviations expanded.
pub fn normalize_title(title: &str) -> String {
    alnum_tokens(title)
        .into_iter()
        .map(|t| {
            TITLE_ABBREVIATIONS
                .iter()
                .find(|(abbr, _)| *abbr == t)
                .map(|(_, full)| full.to_string())
                .unwrap_or(t)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn jaccard<T: std::hash::Hash + Eq>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

pub fn char_set_similarity(a: &str, b: &str) -> f64 {
    let sa: HashSet<char> = a.chars().filter(|c| !c.is_whitespace()).collect();
    let sb: HashSet<char> = b.chars().filter(|c| !c.is_whitespace()).collect();
    jaccard(&sa, &sb)
}

pub fn token_overlap(a: &str, b: &str) -> f64 {
    let ta: HashSet<&str> = a.split_whitespace().collect();
    let tb: HashSet<&str> = b.split_whitespace().collect();
    jaccard(&ta, &tb)
}

/// Weighted blend of edit distance, character-set and token overlap on
/// already-normalized strings. Range [0, 1].
pub fn weighted_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    EDIT_WEIGHT * strsim::normalized_levenshtein(a, b)
        + CHAR_SET_WEIGHT * char_set_similarity(a, b)
        + TOKEN_WEIGHT * token_overlap(a, b)
}

pub fn company_similarity(a: &str, b: &str) -> f64 {
    weighted_similarity(&normalize_company(a), &normalize_company(b))
}

pub fn title_similarity(a: &str, b: &str) -> f64 {
    weighted_similarity(&normalize_title(a), &normalize_title(b))
}

/// Similarity of two (company, title) pairs.
pub fn record_similarity(
    company_a: &str,
    title_a: Option<&str>,
    company_b: &str,
    title_b: Option<&str>,
) -> f64 {
    let company = company_similarity(company_a, company_b);
    match (title_a, title_b) {
        (Some(a), Some(b)) => COMPANY_WEIGHT * company + TITLE_WEIGHT * title_similarity(a, b),
        _ => company * MISSING_TITLE_FACTOR,
    }
}

/// Whether two free-text values are the same after normalization.
pub fn same_text(a: &str, b: &str) -> bool {
    alnum_tokens(a) == alnum_tokens(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_suffixes_removed() {
        assert_eq!(normalize_company("Acme, Inc."), "acme");
        assert_eq!(normalize_company("Globex Corporation"), "globex");
        assert_eq!(normalize_company("ACME Co. Ltd"), "acme");
        // A lone suffix token is kept.
        assert_eq!(normalize_company("Company"), "company");
    }

    #[test]
    fn title_abbreviations_expanded() {
        assert_eq!(normalize_title("Sr. Software Eng"), "senior software engineer");
        assert_eq!(normalize_title("Data-Analyst"), "data analyst");
    }

    #[test]
    fn identical_is_one_and_disjoint_is_low() {
        assert!((weighted_similarity("acme", "acme") - 1.0).abs() < f64::EPSILON);
        assert!(weighted_similarity("acme", "zyx") < 0.3);
        assert_eq!(weighted_similarity("", "acme"), 0.0);
    }

    #[test]
    fn near_duplicates_score_high() {
        let s = record_similarity("Acme Inc", Some("Senior Data Analyst"), "ACME", Some("Sr Data Analyst"));
        assert!(s > 0.95, "similarity {s}");

        let typo = record_similarity("Acme", Some("Data Analyst"), "Acme", Some("Data Analyts"));
        assert!(typo >= 0.85, "similarity {typo}");
    }

    #[test]
    fn different_roles_at_same_company_score_below_duplicate() {
        let s = record_similarity("Acme", Some("Data Analyst"), "Acme", Some("Backend Engineer"));
        assert!(s < 0.85, "similarity {s}");
    }

    #[test]
    fn missing_title_is_penalized() {
        let s = record_similarity("Acme", None, "Acme", Some("Data Analyst"));
        assert!((s - MISSING_TITLE_FACTOR).abs() < 1e-9);
    }

    #[test]
    fn same_text_ignores_case_and_punctuation() {
        assert!(same_text("San Francisco, CA", "san francisco ca"));
        assert!(!same_text("Austin", "Boston"));
    }
}
