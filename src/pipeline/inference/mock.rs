//! Scripted engine for tests and for hosts running without a model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{
    ContextHandle, ContextParams, InferenceEngine, InferenceError, InferenceRequest, ModelHandle,
    SessionHandle, SessionInitError, Stage,
};

/// What the mock does when asked to generate for a stage.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Respond(String),
    /// Sleep for the duration, then return an engine error.
    Hang(Duration),
    Fail(InferenceError),
}

pub struct MockInferenceEngine {
    behaviors: Mutex<HashMap<Stage, MockBehavior>>,
    calls: Mutex<HashMap<Stage, u32>>,
    fail_load: AtomicBool,
    load_delay_ms: AtomicU64,
    models_loaded: AtomicU32,
    sessions_disposed: AtomicU32,
    next_id: AtomicU64,
}

impl MockInferenceEngine {
    /// Both stages answer "not job related" until scripted otherwise.
    pub fn new() -> Self {
        let mut behaviors = HashMap::new();
        behaviors.insert(
            Stage::Stage1,
            MockBehavior::Respond(r#"{"is_job_related": false, "risk_level": "none"}"#.into()),
        );
        behaviors.insert(
            Stage::Stage2,
            MockBehavior::Respond(
                r#"{"is_job_related": false, "company": null, "position": null, "status": null, "confidence": 0.5}"#.into(),
            ),
        );
        Self {
            behaviors: Mutex::new(behaviors),
            calls: Mutex::new(HashMap::new()),
            fail_load: AtomicBool::new(false),
            load_delay_ms: AtomicU64::new(0),
            models_loaded: AtomicU32::new(0),
            sessions_disposed: AtomicU32::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_behavior(self, stage: Stage, behavior: MockBehavior) -> Self {
        self.set_behavior(stage, behavior);
        self
    }

    pub fn set_behavior(&self, stage: Stage, behavior: MockBehavior) {
        self.behaviors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(stage, behavior);
    }

    pub fn fail_model_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn set_load_delay(&self, delay: Duration) {
        self.load_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn generate_calls(&self, stage: Stage) -> u32 {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&stage)
            .copied()
            .unwrap_or(0)
    }

    pub fn models_loaded(&self) -> u32 {
        self.models_loaded.load(Ordering::SeqCst)
    }

    pub fn sessions_disposed(&self) -> u32 {
        self.sessions_disposed.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for MockInferenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceEngine for MockInferenceEngine {
    fn load_model(&self, model_path: &str) -> Result<ModelHandle, SessionInitError> {
        let delay = self.load_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(SessionInitError::ModelNotFound(model_path.to_string()));
        }
        self.models_loaded.fetch_add(1, Ordering::SeqCst);
        Ok(ModelHandle {
            id: self.next_id(),
            model_path: model_path.to_string(),
        })
    }

    fn create_context(
        &self,
        model: &ModelHandle,
        params: ContextParams,
    ) -> Result<ContextHandle, SessionInitError> {
        if params.context_size == 0 {
            return Err(SessionInitError::ContextAllocation("zero-sized context".into()));
        }
        Ok(ContextHandle {
            id: self.next_id(),
            model: model.clone(),
            params,
        })
    }

    fn bind_session(&self, context: &ContextHandle) -> Result<SessionHandle, SessionInitError> {
        Ok(SessionHandle {
            id: self.next_id(),
            context: context.clone(),
        })
    }

    fn generate(
        &self,
        _session: &SessionHandle,
        request: &InferenceRequest,
    ) -> Result<String, InferenceError> {
        *self
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(request.stage)
            .or_insert(0) += 1;

        let behavior = self
            .behaviors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&request.stage)
            .cloned();

        match behavior {
            Some(MockBehavior::Respond(text)) => Ok(text),
            Some(MockBehavior::Hang(duration)) => {
                std::thread::sleep(duration);
                Err(InferenceError::Engine("mock hang elapsed".into()))
            }
            Some(MockBehavior::Fail(err)) => Err(err),
            None => Err(InferenceError::Engine("no scripted behavior".into())),
        }
    }

    fn dispose(&self, _session: &SessionHandle) {
        self.sessions_disposed.fetch_add(1, Ordering::SeqCst);
    }
}
