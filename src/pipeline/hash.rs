//! Content fingerprints used as cache and identity keys.
//!
//! A fingerprint covers the sender domain, the normalized subject, a prefix
//! of the normalized body and a logical variant tag (which result the key is
//! for). Whitespace and reply/forward prefixes do not change the hash.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex SHA-256 digest of an email's identifying content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint (sender domain, subject, body prefix, variant).
pub fn content_hash(
    sender_domain: Option<&str>,
    subject: &str,
    body: &str,
    body_prefix_chars: usize,
    variant: &str,
) -> ContentHash {
    let domain = sender_domain.unwrap_or("").trim().to_lowercase();
    let subject = normalize_subject(subject);
    let prefix = body_prefix(body, body_prefix_chars);
    ContentHash(digest_parts(&[&domain, &subject, &prefix, variant]))
}

/// Key for lookups scoped to a company + title pair.
pub fn record_key(company: &str, title: &str, variant: &str) -> ContentHash {
    ContentHash(digest_parts(&[
        &collapse_whitespace(&company.to_lowercase()),
        &collapse_whitespace(&title.to_lowercase()),
        variant,
    ]))
}

/// Lowercase, strip any number of reply/forward prefixes, collapse whitespace.
pub fn normalize_subject(subject: &str) -> String {
    let mut s = collapse_whitespace(&subject.to_lowercase());
    loop {
        let stripped = ["re:", "fw:", "fwd:", "aw:", "re :", "fwd :"]
            .iter()
            .find_map(|p| s.strip_prefix(p).map(|rest| rest.trim_start().to_string()));
        match stripped {
            Some(rest) => s = rest,
            None => break,
        }
    }
    s
}

/// First `max_chars` characters of the whitespace-collapsed body.
pub fn body_prefix(body: &str, max_chars: usize) -> String {
    collapse_whitespace(body).chars().take(max_chars).collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// Length-prefixed so ("ab","c") and ("a","bc") hash differently.
fn digest_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = content_hash(Some("acme.com"), "Your application", "Thanks for applying", 500, "parse");
        let b = content_hash(Some("acme.com"), "Your application", "Thanks for applying", 500, "parse");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn reply_prefixes_and_whitespace_ignored() {
        let a = content_hash(Some("acme.com"), "Re: FWD: Your  application", "Thanks\n\nfor applying", 500, "v");
        let b = content_hash(Some("ACME.com"), "your application", "Thanks for applying", 500, "v");
        assert_eq!(a, b);
    }

    #[test]
    fn variant_changes_hash() {
        let a = content_hash(None, "s", "b", 500, "classification");
        let b = content_hash(None, "s", "b", 500, "parse");
        assert_ne!(a, b);
    }

    #[test]
    fn only_body_prefix_counts() {
        let base = "x".repeat(20);
        let a = content_hash(None, "s", &format!("{base}AAA"), 20, "v");
        let b = content_hash(None, "s", &format!("{base}BBB"), 20, "v");
        assert_eq!(a, b);
    }

    #[test]
    fn parts_are_unambiguous() {
        assert_ne!(digest_parts(&["ab", "c"]), digest_parts(&["a", "bc"]));
    }

    #[test]
    fn record_key_ignores_case() {
        assert_eq!(record_key("Acme", "Data  Analyst", "dup"), record_key("ACME", "data analyst", "dup"));
    }

    #[test]
    fn normalize_subject_strips_nested_prefixes() {
        assert_eq!(normalize_subject("RE: Fwd: re: Interview"), "interview");
    }
}
