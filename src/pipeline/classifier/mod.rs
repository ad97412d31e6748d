//! Email classification: prompts, output normalization, the two-stage
//! state machine and the rule-based fallback chain.

pub mod fallback;
pub mod normalizer;
pub mod patterns;
pub mod prompt;
pub mod sanitize;
pub mod two_stage;

pub use fallback::{classify_with_rules, detect_status, extract_fields, stage1_only_result, HeuristicFields};
pub use normalizer::{normalize_classification, normalize_parse, Normalized, Recovery};
pub use prompt::{stage1_request, stage2_request};
pub use sanitize::sanitize_email_text;
pub use two_stage::{ClassificationOutcome, ClassifierState, StageFailure, TwoStageClassifier};
