//! Per-stage inference session pool.
//!
//! Each stage owns one slot. A slot's session is reused while it targets the
//! requested model, is under its use ceiling and is healthy; otherwise it is
//! disposed and rebuilt (model load → context allocation → session bind).
//! Construction for a stage is serialized by the slot lock and never blocks
//! the other stage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use serde::Serialize;

use super::invoker::{run_bounded, Bounded};
use super::{
    ContextParams, InferenceEngine, LazyEngine, SessionHandle, SessionInitError, Stage,
};
use crate::pipeline_config::{SessionPoolConfig, StageConfig};

/// Lifecycle of one stage's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Ready,
    Unhealthy,
    Disposed,
}

/// Point-in-time view of a slot, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub uses: u32,
    pub generation: u64,
    pub model_path: Option<String>,
}

struct Slot {
    state: SessionState,
    handle: Option<SessionHandle>,
    uses: u32,
    /// Bumped on every rebuild so stale leases cannot poison a new session.
    generation: u64,
    /// Health of the current generation, shared with its leases so a mark
    /// lands even while the slot lock is held elsewhere.
    healthy: Arc<AtomicBool>,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            handle: None,
            uses: 0,
            generation: 0,
            healthy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current state, folding in a health mark not yet seen under the lock.
    fn effective_state(&self) -> SessionState {
        if self.state == SessionState::Ready && !self.healthy.load(Ordering::SeqCst) {
            SessionState::Unhealthy
        } else {
            self.state
        }
    }

    fn reusable_for(&self, model_path: &str, max_uses: u32) -> bool {
        self.effective_state() == SessionState::Ready
            && self.uses < max_uses
            && self
                .handle
                .as_ref()
                .is_some_and(|h| h.context.model.model_path == model_path)
    }
}

struct PoolInner {
    engine: Arc<LazyEngine>,
    config: SessionPoolConfig,
    stage1: Mutex<Slot>,
    stage2: Mutex<Slot>,
    stage1_params: ContextParams,
    stage2_params: ContextParams,
    closed: AtomicBool,
}

impl PoolInner {
    fn slot(&self, stage: Stage) -> &Mutex<Slot> {
        match stage {
            Stage::Stage1 => &self.stage1,
            Stage::Stage2 => &self.stage2,
        }
    }

    fn params(&self, stage: Stage) -> ContextParams {
        match stage {
            Stage::Stage1 => self.stage1_params,
            Stage::Stage2 => self.stage2_params,
        }
    }
}

/// A session handed out by the pool. Cheap to clone.
#[derive(Clone)]
pub struct SessionLease {
    stage: Stage,
    handle: SessionHandle,
    generation: u64,
    healthy: Arc<AtomicBool>,
    engine: Arc<dyn InferenceEngine>,
    pool: Arc<PoolInner>,
}

impl SessionLease {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn engine(&self) -> Arc<dyn InferenceEngine> {
        self.engine.clone()
    }

    /// Clear the health flag of the session this lease came from. A slot
    /// that has since been rebuilt is left alone.
    pub fn mark_unhealthy(&self) {
        if !self.healthy.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::warn!(
            stage = %self.stage,
            session_id = self.handle.id,
            generation = self.generation,
            "Inference session marked unhealthy"
        );
        // The flag is authoritative; the state is synced here when the slot
        // is free and otherwise on the next acquire.
        let mut slot = match self.pool.slot(self.stage).try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        if slot.generation == self.generation && slot.state == SessionState::Ready {
            slot.state = SessionState::Unhealthy;
        }
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("stage", &self.stage)
            .field("handle", &self.handle)
            .field("generation", &self.generation)
            .finish()
    }
}

pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    pub fn new(
        engine: Arc<LazyEngine>,
        config: SessionPoolConfig,
        stage1: StageConfig,
        stage2: StageConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                engine,
                config,
                stage1: Mutex::new(Slot::new()),
                stage2: Mutex::new(Slot::new()),
                stage1_params: ContextParams {
                    context_size: stage1.context_size,
                    batch_size: stage1.batch_size,
                },
                stage2_params: ContextParams {
                    context_size: stage2.context_size,
                    batch_size: stage2.batch_size,
                },
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Ready session for `stage` targeting `model_path`, bounded by the
    /// configured init timeout.
    pub async fn acquire(
        &self,
        stage: Stage,
        model_path: &str,
    ) -> Result<SessionLease, SessionInitError> {
        let inner = self.inner.clone();
        let model_path = model_path.to_string();
        let timeout = self.inner.config.init_timeout();

        match run_bounded(timeout, move || acquire_blocking(&inner, stage, &model_path)).await {
            Bounded::Completed(result) => result,
            Bounded::TimedOut => {
                tracing::warn!(%stage, timeout_ms = timeout.as_millis() as u64, "Session initialization timed out");
                Err(SessionInitError::Timeout(timeout.as_millis() as u64))
            }
            Bounded::Aborted(reason) => Err(SessionInitError::EngineUnavailable(reason)),
        }
    }

    /// Sessions are only disposed at acquire or shutdown.
    pub fn release(&self, _lease: SessionLease) {}

    /// Slot state, or `None` while the slot is locked for construction.
    pub fn snapshot(&self, stage: Stage) -> Option<SessionSnapshot> {
        let slot = match self.inner.slot(stage).try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(SessionSnapshot {
            state: slot.effective_state(),
            uses: slot.uses,
            generation: slot.generation,
            model_path: slot.handle.as_ref().map(|h| h.context.model.model_path.clone()),
        })
    }

    /// Dispose every live session and refuse further acquires. Blocking.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let engine = self.inner.engine.loaded();
        for stage in [Stage::Stage1, Stage::Stage2] {
            let mut slot = self
                .inner
                .slot(stage)
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let (Some(handle), Some(engine)) = (slot.handle.take(), engine.as_ref()) {
                engine.dispose(&handle);
            }
            slot.state = SessionState::Disposed;
        }
        tracing::info!("Session pool shut down");
    }
}

fn acquire_blocking(
    inner: &Arc<PoolInner>,
    stage: Stage,
    model_path: &str,
) -> Result<SessionLease, SessionInitError> {
    if inner.closed.load(Ordering::SeqCst) {
        return Err(SessionInitError::PoolClosed);
    }
    let engine = inner.engine.get()?;
    let mut slot = inner.slot(stage).lock().unwrap_or_else(|e| e.into_inner());

    if slot.reusable_for(model_path, inner.config.max_uses) {
        slot.uses += 1;
        if let Some(handle) = slot.handle.clone() {
            return Ok(SessionLease {
                stage,
                handle,
                generation: slot.generation,
                healthy: slot.healthy.clone(),
                engine,
                pool: inner.clone(),
            });
        }
    }

    if let Some(stale) = slot.handle.take() {
        tracing::debug!(
            %stage,
            session_id = stale.id,
            uses = slot.uses,
            state = ?slot.effective_state(),
            "Disposing stale inference session"
        );
        engine.dispose(&stale);
        slot.state = SessionState::Disposed;
    }
    slot.uses = 0;

    let model = engine.load_model(model_path)?;
    let context = engine.create_context(&model, inner.params(stage))?;
    let handle = engine.bind_session(&context)?;

    slot.generation += 1;
    slot.uses = 1;
    slot.state = SessionState::Ready;
    slot.healthy = Arc::new(AtomicBool::new(true));
    slot.handle = Some(handle.clone());

    tracing::info!(
        %stage,
        model_path,
        session_id = handle.id,
        generation = slot.generation,
        context_size = context.params.context_size,
        "Inference session created"
    );

    Ok(SessionLease {
        stage,
        handle,
        generation: slot.generation,
        healthy: slot.healthy.clone(),
        engine,
        pool: inner.clone(),
    })
}
