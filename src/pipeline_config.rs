//! Engine configuration.
//!
//! Every latency, token and threshold knob of the classification and
//! reconciliation pipeline lives here. Defaults are tuned for a small local
//! model on CPU; hosts override them from a settings file or environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Per-stage inference settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Model identifier handed to the engine (file path or model tag).
    pub model_path: String,
    /// Context window allocated for the session.
    pub context_size: u32,
    /// Prompt evaluation batch size.
    pub batch_size: u32,
    /// Output token budget.
    pub max_tokens: u32,
    pub temperature: f32,
    /// Hard wall-clock deadline for one inference call.
    pub deadline_ms: u64,
    /// Body characters sent to the model before head+tail truncation.
    pub max_body_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPoolConfig {
    /// Uses after which a session is disposed and rebuilt.
    pub max_uses: u32,
    /// Deadline for model load + context allocation + session bind.
    pub init_timeout_ms: u64,
}

/// TTL and size bound of one cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl NamespaceConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub classification: NamespaceConfig,
    pub parse: NamespaceConfig,
    pub manual_lookup: NamespaceConfig,
    pub conflict_check: NamespaceConfig,
    pub duplicate_check: NamespaceConfig,
    /// TTL ceiling for entries derived from manually edited records.
    pub manual_edited_max_ttl_secs: u64,
    /// TTL ceiling for entries derived from hybrid records.
    pub hybrid_max_ttl_secs: u64,
    /// Body characters folded into the content hash.
    pub body_prefix_chars: usize,
    /// Persist the classification namespace to the database.
    pub persist_classifications: bool,
    /// Period of the background expiry sweep.
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Window in which a same company+title record is a certain duplicate.
    pub exact_window_days: i64,
    /// Window searched by the fuzzy, domain and semantic dimensions.
    pub candidate_window_days: i64,
    /// Same-company records created within this many days form a temporal pattern.
    pub temporal_window_days: i64,
    /// Weighted similarity at or above which a fuzzy match is a duplicate.
    pub duplicate_threshold: f64,
    /// Similarity at or above which two field values count as compatible.
    pub similar_threshold: f64,
    /// Confidence above which the `hybrid` strategy accepts new data.
    pub hybrid_confidence_threshold: f32,
    /// Linked emails per record re-extracted by the semantic dimension.
    pub semantic_email_limit: usize,
}

/// Full engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub stage1: StageConfig,
    pub stage2: StageConfig,
    pub session_pool: SessionPoolConfig,
    /// Concurrent inference calls before requests degrade to the fallback.
    pub max_concurrent_inference: usize,
    /// When false, inference failures yield the conservative result.
    pub fallback_enabled: bool,
    /// Confidence ceiling for results built from Stage 1 alone.
    pub stage1_only_confidence_cap: f32,
    pub cache: CacheConfig,
    pub reconcile: ReconcileConfig,
    /// Ollama base URL used by the default engine.
    pub ollama_url: String,
    pub database_path: Option<PathBuf>,
}

// ═══════════════════════════════════════════════════════════
// Defaults
// ═══════════════════════════════════════════════════════════

impl Default for StageConfig {
    fn default() -> Self {
        Self::stage1()
    }
}

impl StageConfig {
    /// Small context, tiny output: a yes/no gate.
    pub fn stage1() -> Self {
        Self {
            model_path: "llama3.2:1b".into(),
            context_size: 1024,
            batch_size: 256,
            max_tokens: 32,
            temperature: 0.0,
            deadline_ms: 3_000,
            max_body_chars: 1_200,
        }
    }

    /// Larger context for field extraction.
    pub fn stage2() -> Self {
        Self {
            model_path: "llama3.2:3b".into(),
            context_size: 2048,
            batch_size: 512,
            max_tokens: 128,
            temperature: 0.1,
            deadline_ms: 6_000,
            max_body_chars: 3_000,
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            max_uses: 10,
            init_timeout_ms: 15_000,
        }
    }
}

impl SessionPoolConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            classification: NamespaceConfig {
                ttl_secs: 24 * 3600,
                max_entries: 5_000,
            },
            parse: NamespaceConfig {
                ttl_secs: 12 * 3600,
                max_entries: 2_000,
            },
            manual_lookup: NamespaceConfig {
                ttl_secs: 15 * 60,
                max_entries: 500,
            },
            conflict_check: NamespaceConfig {
                ttl_secs: 30 * 60,
                max_entries: 500,
            },
            duplicate_check: NamespaceConfig {
                ttl_secs: 30 * 60,
                max_entries: 1_000,
            },
            manual_edited_max_ttl_secs: 30 * 60,
            hybrid_max_ttl_secs: 2 * 3600,
            body_prefix_chars: 500,
            persist_classifications: true,
            sweep_interval_secs: 300,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            exact_window_days: 90,
            candidate_window_days: 180,
            temporal_window_days: 7,
            duplicate_threshold: 0.85,
            similar_threshold: 0.7,
            hybrid_confidence_threshold: 0.85,
            semantic_email_limit: 3,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stage1: StageConfig::stage1(),
            stage2: StageConfig::stage2(),
            session_pool: SessionPoolConfig::default(),
            max_concurrent_inference: 2,
            fallback_enabled: true,
            stage1_only_confidence_cap: 0.6,
            cache: CacheConfig::default(),
            reconcile: ReconcileConfig::default(),
            ollama_url: "http://localhost:11434".into(),
            database_path: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Environment overrides
// ═══════════════════════════════════════════════════════════

impl EngineConfig {
    /// Defaults with `JOBSIFT_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from any key lookup. Unparsable values are ignored
    /// with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("JOBSIFT_OLLAMA_URL") {
            self.ollama_url = v;
        }
        if let Some(v) = lookup("JOBSIFT_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("JOBSIFT_STAGE1_MODEL") {
            self.stage1.model_path = v;
        }
        if let Some(v) = lookup("JOBSIFT_STAGE2_MODEL") {
            self.stage2.model_path = v;
        }
        override_parsed(&lookup, "JOBSIFT_STAGE1_DEADLINE_MS", &mut self.stage1.deadline_ms);
        override_parsed(&lookup, "JOBSIFT_STAGE2_DEADLINE_MS", &mut self.stage2.deadline_ms);
        override_parsed(&lookup, "JOBSIFT_STAGE1_MAX_TOKENS", &mut self.stage1.max_tokens);
        override_parsed(&lookup, "JOBSIFT_STAGE2_MAX_TOKENS", &mut self.stage2.max_tokens);
        override_parsed(&lookup, "JOBSIFT_SESSION_MAX_USES", &mut self.session_pool.max_uses);
        override_parsed(
            &lookup,
            "JOBSIFT_MAX_CONCURRENT_INFERENCE",
            &mut self.max_concurrent_inference,
        );
        override_parsed(&lookup, "JOBSIFT_FALLBACK_ENABLED", &mut self.fallback_enabled);
        override_parsed(
            &lookup,
            "JOBSIFT_PERSIST_CLASSIFICATIONS",
            &mut self.cache.persist_classifications,
        );
        override_parsed(
            &lookup,
            "JOBSIFT_CACHE_SWEEP_INTERVAL_SECS",
            &mut self.cache.sweep_interval_secs,
        );
        override_parsed(
            &lookup,
            "JOBSIFT_DUPLICATE_THRESHOLD",
            &mut self.reconcile.duplicate_threshold,
        );
        override_parsed(
            &lookup,
            "JOBSIFT_EXACT_WINDOW_DAYS",
            &mut self.reconcile.exact_window_days,
        );
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(v) => *target = v,
            Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparsable config override"),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
