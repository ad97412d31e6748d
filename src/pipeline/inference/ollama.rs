//! Ollama HTTP adapter for the inference engine seam.
//!
//! Ollama manages model memory itself, so "loading" a model checks that the
//! tag is installed, and a "context" is the set of per-request options
//! (`num_ctx`, `num_batch`) sent with every generation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{
    ContextHandle, ContextParams, InferenceEngine, InferenceError, InferenceRequest, ModelHandle,
    SessionHandle, SessionInitError,
};

/// Ollama HTTP client for local LLM inference.
pub struct OllamaEngine {
    base_url: String,
    client: reqwest::blocking::Client,
    next_id: AtomicU64,
}

impl OllamaEngine {
    /// Build a client for `base_url`. `request_timeout` bounds how long an
    /// abandoned call can keep its blocking thread busy; it is not the
    /// per-stage deadline.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, SessionInitError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SessionInitError::EngineUnavailable(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    /// Default Ollama instance at localhost:11434.
    pub fn default_local() -> Result<Self, SessionInitError> {
        Self::new("http://localhost:11434", Duration::from_secs(60))
    }

    fn list_models(&self) -> Result<Vec<String>, SessionInitError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().map_err(|e| {
            if e.is_connect() {
                SessionInitError::EngineUnavailable(format!("cannot connect to {}", self.base_url))
            } else {
                SessionInitError::EngineUnavailable(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(SessionInitError::EngineUnavailable(format!(
                "tags request failed with status {}",
                response.status().as_u16()
            )));
        }

        let tags: OllamaTagsResponse = response
            .json()
            .map_err(|e| SessionInitError::EngineUnavailable(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    format: &'a serde_json::Value,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_ctx: u32,
    num_batch: u32,
    num_predict: u32,
    temperature: f32,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Response body from Ollama /api/tags
#[derive(Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

/// `llama3.2` matches `llama3.2:latest`; an explicit tag must match exactly.
fn model_installed(installed: &[String], requested: &str) -> bool {
    installed.iter().any(|name| {
        name == requested || (!requested.contains(':') && name == &format!("{requested}:latest"))
    })
}

impl InferenceEngine for OllamaEngine {
    fn load_model(&self, model_path: &str) -> Result<ModelHandle, SessionInitError> {
        let installed = self.list_models()?;
        if !model_installed(&installed, model_path) {
            return Err(SessionInitError::ModelNotFound(model_path.to_string()));
        }
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
        if params.context_size == 0 || params.batch_size == 0 {
            return Err(SessionInitError::ContextAllocation(format!(
                "invalid sizes ctx={} batch={}",
                params.context_size, params.batch_size
            )));
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
        session: &SessionHandle,
        request: &InferenceRequest,
    ) -> Result<String, InferenceError> {
        let url = format!("{}/api/generate", self.base_url);
        let params = session.context.params;
        let body = OllamaGenerateRequest {
            model: &session.context.model.model_path,
            prompt: &request.user_prompt,
            system: &request.system_prompt,
            stream: false,
            format: &request.output_schema,
            options: OllamaOptions {
                num_ctx: params.context_size,
                num_batch: params.batch_size,
                num_predict: request.max_tokens,
                temperature: request.temperature,
            },
        };

        let response = self.client.post(&url).json(&body).send().map_err(|e| {
            if e.is_connect() {
                InferenceError::Engine(format!("cannot connect to {}", self.base_url))
            } else if e.is_timeout() {
                InferenceError::Engine("request timed out".into())
            } else {
                InferenceError::Engine(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // Model removed while the session was live.
            return Err(InferenceError::Invalidated(format!(
                "model {} no longer available",
                session.context.model.model_path
            )));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(InferenceError::Engine(format!(
                "status {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .map_err(|e| InferenceError::Engine(e.to_string()))?;
        Ok(parsed.response)
    }

    fn dispose(&self, session: &SessionHandle) {
        tracing::debug!(session_id = session.id, "Ollama session released");
    }
}
