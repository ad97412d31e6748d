//! Two-stage classification with a fallback chain.
//!
//! `Start → Stage1 → {NotJobRelated | Stage2 → Done}`, with `Failed`
//! reachable from either stage. Failures never escape: Stage 2 failure
//! degrades to a Stage1-only result, Stage 1 failure to the rule-based
//! classifier, and with fallback disabled to the conservative result.

use std::sync::Arc;

use thiserror::Error;

use crate::models::{ClassificationResult, EmailMessage, ParseResult, RecordSource, ResultOrigin, RiskLevel};
use crate::pipeline::cache::{CacheValue, Namespace, TieredCache};
use crate::pipeline::hash::content_hash;
use crate::pipeline::inference::{invoke, InferenceError, InferenceRequest, SessionPool, Stage};
use crate::pipeline_config::{EngineConfig, StageConfig};

use super::fallback::{classify_with_rules, stage1_only_result};
use super::normalizer::{normalize_classification, normalize_parse, Recovery};
use super::prompt::{stage1_request, stage2_request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierState {
    Start,
    Stage1,
    NotJobRelated,
    Stage2,
    Done,
    Failed,
}

impl ClassifierState {
    fn can_transition_to(self, next: ClassifierState) -> bool {
        use ClassifierState::*;
        matches!(
            (self, next),
            (Start, Stage1)
                | (Stage1, NotJobRelated)
                | (Stage1, Stage2)
                | (Stage1, Failed)
                | (Stage2, Done)
                | (Stage2, Failed)
        )
    }
}

/// Why a stage produced nothing usable.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("{stage} output was not usable JSON")]
    MalformedOutput { stage: Stage },
}

/// Final result plus the states visited, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationOutcome {
    pub result: ParseResult,
    pub path: Vec<ClassifierState>,
}

struct Run {
    path: Vec<ClassifierState>,
}

impl Run {
    fn new() -> Self {
        Self {
            path: vec![ClassifierState::Start],
        }
    }

    fn current(&self) -> ClassifierState {
        self.path.last().copied().unwrap_or(ClassifierState::Start)
    }

    fn advance(&mut self, next: ClassifierState) {
        debug_assert!(
            self.current().can_transition_to(next),
            "invalid transition {:?} -> {:?}",
            self.current(),
            next
        );
        self.path.push(next);
    }

    fn finish(self, result: ParseResult) -> ClassificationOutcome {
        ClassificationOutcome {
            result: result.enforce_invariants(),
            path: self.path,
        }
    }
}

/// Confidence of a negative Stage 1 verdict, from its false-positive risk.
fn negative_confidence(risk: RiskLevel) -> f32 {
    match risk {
        RiskLevel::None => 0.9,
        RiskLevel::Low => 0.8,
        RiskLevel::Medium => 0.6,
        RiskLevel::High => 0.4,
    }
}

pub struct TwoStageClassifier {
    pool: Arc<SessionPool>,
    cache: Arc<TieredCache>,
    config: EngineConfig,
}

impl TwoStageClassifier {
    pub fn new(pool: Arc<SessionPool>, cache: Arc<TieredCache>, config: EngineConfig) -> Self {
        Self { pool, cache, config }
    }

    fn stage_config(&self, stage: Stage) -> &StageConfig {
        match stage {
            Stage::Stage1 => &self.config.stage1,
            Stage::Stage2 => &self.config.stage2,
        }
    }

    fn stage1_key(&self, email: &EmailMessage) -> String {
        content_hash(
            email.sender_domain().as_deref(),
            &email.subject,
            &email.body,
            self.config.cache.body_prefix_chars,
            "classification",
        )
        .to_string()
    }

    async fn generate(&self, request: InferenceRequest) -> Result<String, StageFailure> {
        let stage = request.stage;
        let config = self.stage_config(stage);
        let lease = self
            .pool
            .acquire(stage, &config.model_path)
            .await
            .map_err(InferenceError::from)?;
        let output = invoke(&lease, request, config.deadline()).await;
        self.pool.release(lease);
        Ok(output?)
    }

    async fn run_stage1(&self, email: &EmailMessage) -> Result<ClassificationResult, StageFailure> {
        let key = self.stage1_key(email);
        if let Some(cached) = self.cache.get(Namespace::Classification, &key).and_then(CacheValue::into_classification) {
            tracing::debug!("Stage 1 cache hit");
            return Ok(cached);
        }

        let raw = self.generate(stage1_request(email, &self.config.stage1)).await?;
        let normalized = normalize_classification(&raw);
        if normalized.recovery == Recovery::Conservative {
            return Err(StageFailure::MalformedOutput { stage: Stage::Stage1 });
        }
        if normalized.recovery == Recovery::Regex {
            tracing::debug!(stage = %Stage::Stage1, "Output recovered by regex extraction");
        }

        self.cache.insert(
            Namespace::Classification,
            &key,
            CacheValue::Classification(normalized.value),
            RecordSource::AutoInferred,
            Vec::new(),
        );
        Ok(normalized.value)
    }

    async fn run_stage2(&self, email: &EmailMessage) -> Result<ParseResult, StageFailure> {
        let raw = self.generate(stage2_request(email, &self.config.stage2)).await?;
        let normalized = normalize_parse(&raw);
        match normalized.recovery {
            Recovery::Conservative => Err(StageFailure::MalformedOutput { stage: Stage::Stage2 }),
            Recovery::Regex => {
                tracing::debug!(stage = %Stage::Stage2, "Output recovered by regex extraction");
                Ok(normalized.value)
            }
            Recovery::Strict => Ok(normalized.value),
        }
    }

    /// Classify `email`. Always yields a well-formed result.
    pub async fn classify(&self, email: &EmailMessage) -> ParseResult {
        self.classify_traced(email).await.result
    }

    pub async fn classify_traced(&self, email: &EmailMessage) -> ClassificationOutcome {
        let mut run = Run::new();

        run.advance(ClassifierState::Stage1);
        let gate = match self.run_stage1(email).await {
            Ok(gate) => gate,
            Err(failure) => {
                run.advance(ClassifierState::Failed);
                tracing::warn!(stage = %Stage::Stage1, error = %failure, "Stage 1 failed, using fallback");
                let result = if self.config.fallback_enabled {
                    classify_with_rules(email)
                } else {
                    ParseResult::conservative()
                };
                return run.finish(result);
            }
        };

        if !gate.is_job_related {
            run.advance(ClassifierState::NotJobRelated);
            return run.finish(ParseResult::not_job_related(
                negative_confidence(gate.risk_level),
                ResultOrigin::Inference,
            ));
        }

        run.advance(ClassifierState::Stage2);
        match self.run_stage2(email).await {
            Ok(parsed) => {
                run.advance(ClassifierState::Done);
                run.finish(parsed)
            }
            Err(failure) => {
                run.advance(ClassifierState::Failed);
                tracing::warn!(stage = %Stage::Stage2, error = %failure, "Stage 2 failed, using Stage 1 verdict");
                let result = if self.config.fallback_enabled {
                    stage1_only_result(email, self.config.stage1_only_confidence_cap)
                } else {
                    ParseResult::conservative()
                };
                run.finish(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::models::JobStatus;
    use crate::pipeline::inference::{LazyEngine, MockBehavior, MockInferenceEngine};
    use crate::pipeline_config::{CacheConfig, SessionPoolConfig};

    const STAGE1_JOB: &str = r#"{"is_job_related": true, "risk_level": "low"}"#;
    const STAGE2_ACME: &str = r#"{"is_job_related": true, "company": "Acme", "position": "Data Analyst", "status": "Applied", "location": null, "confidence": 0.93}"#;

    fn email() -> EmailMessage {
        EmailMessage::new(
            "Indeed <indeedapply@indeed.com>",
            "Indeed Application: Data Analyst",
            "Application submitted, Data Analyst, Acme - San Francisco, California",
        )
    }

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.stage1.deadline_ms = 100;
        config.stage2.deadline_ms = 100;
        config.session_pool = SessionPoolConfig {
            max_uses: 10,
            init_timeout_ms: 500,
        };
        config
    }

    fn classifier(mock: Arc<MockInferenceEngine>, config: EngineConfig) -> TwoStageClassifier {
        let pool = Arc::new(SessionPool::new(
            Arc::new(LazyEngine::ready(mock)),
            config.session_pool.clone(),
            config.stage1.clone(),
            config.stage2.clone(),
        ));
        let cache = Arc::new(TieredCache::new(CacheConfig::default()));
        TwoStageClassifier::new(pool, cache, config)
    }

    #[tokio::test]
    async fn full_inference_path() {
        let mock = Arc::new(
            MockInferenceEngine::new()
                .with_behavior(Stage::Stage1, MockBehavior::Respond(STAGE1_JOB.into()))
                .with_behavior(Stage::Stage2, MockBehavior::Respond(STAGE2_ACME.into())),
        );
        let outcome = classifier(mock, config()).classify_traced(&email()).await;

        assert_eq!(outcome.result.origin, ResultOrigin::Inference);
        assert_eq!(outcome.result.company.as_deref(), Some("Acme"));
        assert_eq!(outcome.result.status, Some(JobStatus::Applied));
        assert_eq!(
            outcome.path,
            vec![
                ClassifierState::Start,
                ClassifierState::Stage1,
                ClassifierState::Stage2,
                ClassifierState::Done
            ]
        );
    }

    #[tokio::test]
    async fn negative_gate_skips_stage2() {
        let mock = Arc::new(MockInferenceEngine::new());
        let c = classifier(mock.clone(), config());
        let outcome = c.classify_traced(&email()).await;

        assert!(!outcome.result.is_job_related);
        assert!(outcome.result.company.is_none());
        assert_eq!(outcome.path.last(), Some(&ClassifierState::NotJobRelated));
        assert_eq!(mock.generate_calls(Stage::Stage2), 0);
    }

    #[tokio::test]
    async fn stage1_timeout_equals_rule_based_result() {
        let mock = Arc::new(
            MockInferenceEngine::new().with_behavior(Stage::Stage1, MockBehavior::Hang(Duration::from_millis(400))),
        );
        let start = Instant::now();
        let result = classifier(mock, config()).classify(&email()).await;

        assert!(start.elapsed() < Duration::from_millis(350));
        assert_eq!(result, classify_with_rules(&email()));
        assert_eq!(result.company.as_deref(), Some("Acme"));
    }

    #[tokio::test]
    async fn stage2_timeout_yields_stage1_only() {
        let mock = Arc::new(
            MockInferenceEngine::new()
                .with_behavior(Stage::Stage1, MockBehavior::Respond(STAGE1_JOB.into()))
                .with_behavior(Stage::Stage2, MockBehavior::Hang(Duration::from_millis(400))),
        );
        let result = classifier(mock, config()).classify(&email()).await;

        assert!(result.is_job_related);
        assert_eq!(result.origin, ResultOrigin::Stage1Only);
        assert!(result.confidence <= config().stage1_only_confidence_cap);
    }

    #[tokio::test]
    async fn malformed_stage1_uses_fallback() {
        let mock = Arc::new(
            MockInferenceEngine::new().with_behavior(Stage::Stage1, MockBehavior::Respond("I am not sure.".into())),
        );
        let outcome = classifier(mock, config()).classify_traced(&email()).await;
        assert_eq!(outcome.result.origin, ResultOrigin::Fallback);
        assert_eq!(outcome.path.last(), Some(&ClassifierState::Failed));
    }

    #[tokio::test]
    async fn model_load_failure_uses_fallback() {
        let mock = Arc::new(MockInferenceEngine::new());
        mock.fail_model_load(true);
        let result = classifier(mock, config()).classify(&email()).await;
        assert_eq!(result.origin, ResultOrigin::Fallback);
        assert!(result.is_job_related);
    }

    #[tokio::test]
    async fn disabled_fallback_is_conservative() {
        let mock = Arc::new(
            MockInferenceEngine::new().with_behavior(Stage::Stage1, MockBehavior::Hang(Duration::from_millis(400))),
        );
        let mut cfg = config();
        cfg.fallback_enabled = false;
        let result = classifier(mock, cfg).classify(&email()).await;
        assert_eq!(result, ParseResult::conservative());
    }

    #[tokio::test]
    async fn stage1_verdict_is_cached_for_retry() {
        let mock = Arc::new(
            MockInferenceEngine::new()
                .with_behavior(Stage::Stage1, MockBehavior::Respond(STAGE1_JOB.into()))
                .with_behavior(Stage::Stage2, MockBehavior::Respond("garbage".into())),
        );
        let c = classifier(mock.clone(), config());
        let first = c.classify(&email()).await;
        assert_eq!(first.origin, ResultOrigin::Stage1Only);

        mock.set_behavior(Stage::Stage2, MockBehavior::Respond(STAGE2_ACME.into()));
        let second = c.classify(&email()).await;
        assert_eq!(second.origin, ResultOrigin::Inference);
        assert_eq!(mock.generate_calls(Stage::Stage1), 1);
        assert_eq!(mock.generate_calls(Stage::Stage2), 2);
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        use ClassifierState::*;
        assert!(Start.can_transition_to(Stage1));
        assert!(Stage1.can_transition_to(Failed));
        assert!(!Start.can_transition_to(Stage2));
        assert!(!NotJobRelated.can_transition_to(Stage2));
        assert!(!Done.can_transition_to(Failed));
    }
}
