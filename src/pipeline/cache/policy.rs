//! TTL policy and invalidation tags.

use std::time::Duration;

use crate::models::RecordSource;
use crate::pipeline_config::{CacheConfig, NamespaceConfig};

/// TTL for an entry derived from data of `source`, or `None` when such data
/// must not be cached at all.
pub fn ttl_for(namespace: &NamespaceConfig, source: RecordSource, config: &CacheConfig) -> Option<Duration> {
    let base = namespace.ttl();
    let ttl = match source {
        RecordSource::ManualCreated => return None,
        RecordSource::AutoInferred => base,
        RecordSource::ManualEdited => base.min(Duration::from_secs(config.manual_edited_max_ttl_secs)),
        RecordSource::Hybrid => base.min(Duration::from_secs(config.hybrid_max_ttl_secs)),
    };
    (!ttl.is_zero()).then_some(ttl)
}

fn normalize_tag_value(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn company_tag(company: &str) -> String {
    format!("company:{}", normalize_tag_value(company))
}

pub fn title_tag(title: &str) -> String {
    format!("title:{}", normalize_tag_value(title))
}

/// Tags for an entry keyed (fully or partly) by company and/or title.
pub fn identity_tags(company: Option<&str>, title: Option<&str>) -> Vec<String> {
    let mut tags = Vec::new();
    if let Some(c) = company.filter(|c| !c.trim().is_empty()) {
        tags.push(company_tag(c));
    }
    if let Some(t) = title.filter(|t| !t.trim().is_empty()) {
        tags.push(title_tag(t));
    }
    tags
}
