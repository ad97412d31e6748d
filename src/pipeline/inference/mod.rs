//! Inference plumbing: the engine seam, per-stage session pool and the
//! deadline-bounded invoker.
//!
//! The engine is synchronous and untrusted for latency. Nothing outside this
//! module calls it directly; every call goes through `run_bounded`.

pub mod invoker;
pub mod mock;
pub mod ollama;
pub mod session;

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use invoker::{invoke, run_bounded, Bounded};
pub use mock::{MockBehavior, MockInferenceEngine};
pub use ollama::OllamaEngine;
pub use session::{SessionLease, SessionPool, SessionSnapshot, SessionState};

// ═══════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════

/// Model/context/session construction failure. Fatal for the next call of
/// the affected stage only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionInitError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Context allocation failed: {0}")]
    ContextAllocation(String),

    #[error("Session bind failed: {0}")]
    Bind(String),

    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Session initialization exceeded {0}ms")]
    Timeout(u64),

    #[error("Session pool is shut down")]
    PoolClosed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Session init failed: {0}")]
    SessionInit(#[from] SessionInitError),

    #[error("{stage} inference exceeded {deadline_ms}ms deadline")]
    Timeout { stage: Stage, deadline_ms: u64 },

    #[error("Session handle invalidated: {0}")]
    Invalidated(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Inference task aborted: {0}")]
    Aborted(String),
}

impl InferenceError {
    /// Errors after which the session handle must not be reused.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, Self::Invalidated(_) | Self::Aborted(_))
    }
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Stage1,
    Stage2,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stage1 => "stage1",
            Self::Stage2 => "stage2",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context sizing for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextParams {
    pub context_size: u32,
    pub batch_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle {
    pub id: u64,
    pub model_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextHandle {
    pub id: u64,
    pub model: ModelHandle,
    pub params: ContextParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: u64,
    pub context: ContextHandle,
}

/// One structured-output generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub stage: Stage,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// JSON schema the output must satisfy.
    pub output_schema: serde_json::Value,
}

// ═══════════════════════════════════════════════════════════
// Engine seam
// ═══════════════════════════════════════════════════════════

/// A local token-generation engine. All methods may block for a long time
/// and are only ever called from blocking threads.
pub trait InferenceEngine: Send + Sync {
    fn load_model(&self, model_path: &str) -> Result<ModelHandle, SessionInitError>;

    fn create_context(
        &self,
        model: &ModelHandle,
        params: ContextParams,
    ) -> Result<ContextHandle, SessionInitError>;

    fn bind_session(&self, context: &ContextHandle) -> Result<SessionHandle, SessionInitError>;

    fn generate(
        &self,
        session: &SessionHandle,
        request: &InferenceRequest,
    ) -> Result<String, InferenceError>;

    /// Release the session, its context and its model reference.
    fn dispose(&self, session: &SessionHandle);
}

pub type EngineFactory =
    Box<dyn Fn() -> Result<Arc<dyn InferenceEngine>, SessionInitError> + Send + Sync>;

/// Engine constructed on first use and memoized. A failed construction is
/// retried on the next call.
pub struct LazyEngine {
    factory: EngineFactory,
    engine: Mutex<Option<Arc<dyn InferenceEngine>>>,
}

impl LazyEngine {
    pub fn new(factory: EngineFactory) -> Self {
        Self {
            factory,
            engine: Mutex::new(None),
        }
    }

    /// Wrap an already constructed engine.
    pub fn ready(engine: Arc<dyn InferenceEngine>) -> Self {
        let memo = engine.clone();
        Self {
            factory: Box::new(move || Ok(memo.clone())),
            engine: Mutex::new(Some(engine)),
        }
    }

    /// Engine instance, constructing it if needed. Blocking.
    pub fn get(&self) -> Result<Arc<dyn InferenceEngine>, SessionInitError> {
        let mut guard = self.engine.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(engine) = guard.as_ref() {
            return Ok(engine.clone());
        }
        let engine = (self.factory)()?;
        tracing::info!("Inference engine initialized");
        *guard = Some(engine.clone());
        Ok(engine)
    }

    /// Engine instance only if already constructed.
    pub fn loaded(&self) -> Option<Arc<dyn InferenceEngine>> {
        self.engine
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
