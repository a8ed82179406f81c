//! Handler registry: `payload_type` → handler.
//!
//! Blocking handlers run on the [`BoundedExecutor`]; async handlers run on
//! the tokio runtime. Panics from either kind are caught here and surface
//! as [`DispatchError::Panicked`].

use crate::constants::TASK_ID_EXTENSION_KEY;
use crate::executor::{panic_message, BoundedExecutor, ExecutorError, ExecutorSlot};
use asap_core::{
    AsapError, Envelope, Manifest, Payload, TaskRequest, TaskResponse, TaskStatus,
};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A protocol-level error the caller should see as-is.
    #[error(transparent)]
    Protocol(#[from] AsapError),

    /// Any other failure; reported to the caller as a generic internal error.
    #[error("Handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        HandlerError::Failed(reason.into())
    }
}

/// Synchronous handler signature.
pub type BlockingHandlerFn =
    dyn Fn(Envelope, &Manifest) -> Result<Envelope, HandlerError> + Send + Sync;

/// Handler executed inline on the async runtime.
#[async_trait]
pub trait AsyncHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope, manifest: &Manifest)
        -> Result<Envelope, HandlerError>;
}

/// A registered handler.
#[derive(Clone)]
pub enum Handler {
    Blocking(Arc<BlockingHandlerFn>),
    Async(Arc<dyn AsyncHandler>),
}

impl Handler {
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(Envelope, &Manifest) -> Result<Envelope, HandlerError> + Send + Sync + 'static,
    {
        Handler::Blocking(Arc::new(f))
    }

    pub fn from_async<H: AsyncHandler + 'static>(handler: H) -> Self {
        Handler::Async(Arc::new(handler))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Handler::Blocking(_) => "blocking",
            Handler::Async(_) => "async",
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handler::{}", self.kind())
    }
}

/// Dispatch failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No handler registered for payload type '{payload_type}'")]
    HandlerNotFound { payload_type: String },

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("Handler for '{payload_type}' panicked: {message}")]
    Panicked {
        payload_type: String,
        message: String,
    },

    #[error(transparent)]
    Executor(ExecutorError),
}

impl DispatchError {
    /// Protocol error reported to the caller.
    ///
    /// Handler failures and panics collapse to a generic internal error; the
    /// details only go to the logs.
    pub fn to_asap_error(&self) -> AsapError {
        match self {
            DispatchError::HandlerNotFound { payload_type } => AsapError::HandlerNotFound {
                payload_type: payload_type.clone(),
            },
            DispatchError::Handler(HandlerError::Protocol(err)) => err.clone(),
            DispatchError::Handler(HandlerError::Failed(_)) | DispatchError::Panicked { .. } => {
                AsapError::internal("Internal error")
            }
            DispatchError::Executor(ExecutorError::Exhausted { .. }) => {
                AsapError::ExecutorExhausted {
                    reason: "all handler workers are busy".to_string(),
                }
            }
            DispatchError::Executor(_) => AsapError::internal("Internal error"),
        }
    }
}

/// Owned `payload_type` → [`Handler`] map, built before the server starts.
#[derive(Default, Clone, Debug)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing (with a warning) any previous one.
    pub fn register(&mut self, payload_type: impl Into<String>, handler: Handler) -> &mut Self {
        let payload_type = payload_type.into();
        if let Some(previous) = self.handlers.insert(payload_type.clone(), handler) {
            tracing::warn!(
                payload_type = %payload_type,
                previous = previous.kind(),
                "Replacing existing handler"
            );
        }
        self
    }

    pub fn register_blocking<F>(&mut self, payload_type: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Envelope, &Manifest) -> Result<Envelope, HandlerError> + Send + Sync + 'static,
    {
        self.register(payload_type, Handler::blocking(f))
    }

    pub fn register_async<H: AsyncHandler + 'static>(
        &mut self,
        payload_type: impl Into<String>,
        handler: H,
    ) -> &mut Self {
        self.register(payload_type, Handler::from_async(handler))
    }

    pub fn get(&self, payload_type: &str) -> Option<&Handler> {
        self.handlers.get(payload_type)
    }

    pub fn contains(&self, payload_type: &str) -> bool {
        self.handlers.contains_key(payload_type)
    }

    /// Registered payload types, sorted.
    pub fn payload_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Reserve executor room for `payload_type` if its handler is blocking.
    ///
    /// Lets the caller learn about saturation before committing side effects
    /// such as recording a nonce or creating a task.
    pub fn reserve(
        &self,
        payload_type: &str,
        executor: &BoundedExecutor,
    ) -> Result<Option<ExecutorSlot>, DispatchError> {
        match self.get(payload_type) {
            Some(Handler::Blocking(_)) => executor
                .try_reserve()
                .map(Some)
                .map_err(DispatchError::Executor),
            _ => Ok(None),
        }
    }

    /// Route `envelope` to its handler.
    pub async fn dispatch(
        &self,
        envelope: Envelope,
        manifest: Arc<Manifest>,
        executor: &BoundedExecutor,
    ) -> Result<Envelope, DispatchError> {
        let slot = self.reserve(&envelope.payload_type, executor)?;
        self.dispatch_reserved(envelope, manifest, slot, executor).await
    }

    /// Like [`dispatch`](Self::dispatch), running a blocking handler in
    /// `slot` when one was reserved.
    pub async fn dispatch_reserved(
        &self,
        envelope: Envelope,
        manifest: Arc<Manifest>,
        slot: Option<ExecutorSlot>,
        executor: &BoundedExecutor,
    ) -> Result<Envelope, DispatchError> {
        let payload_type = envelope.payload_type.clone();
        let handler = self
            .get(&payload_type)
            .cloned()
            .ok_or_else(|| DispatchError::HandlerNotFound {
                payload_type: payload_type.clone(),
            })?;

        match handler {
            Handler::Blocking(f) => {
                let slot = match slot {
                    Some(slot) => slot,
                    None => executor.try_reserve().map_err(DispatchError::Executor)?,
                };
                let outcome = slot
                    .run(move || f(envelope, &*manifest))
                    .await
                    .map_err(|e| match e {
                        ExecutorError::Panicked(message) => DispatchError::Panicked {
                            payload_type: payload_type.clone(),
                            message,
                        },
                        other => DispatchError::Executor(other),
                    })?;
                Ok(outcome?)
            }
            Handler::Async(h) => {
                let outcome = AssertUnwindSafe(h.handle(envelope, &*manifest))
                    .catch_unwind()
                    .await
                    .map_err(|payload| DispatchError::Panicked {
                        payload_type: payload_type.clone(),
                        message: panic_message(&*payload),
                    })?;
                Ok(outcome?)
            }
        }
    }
}

/// Built-in handler answering `task.request` with a completed
/// `task.response` whose result is the request input.
pub fn echo_handler(envelope: Envelope, _manifest: &Manifest) -> Result<Envelope, HandlerError> {
    let request: TaskRequest = envelope.parse_payload()?;
    let task_id = envelope
        .extensions
        .get(TASK_ID_EXTENSION_KEY)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| asap_core::TaskId::new().to_string());

    let response = TaskResponse {
        task_id,
        status: TaskStatus::Completed,
        result: Some(request.input),
        error: None,
    };
    Ok(envelope.reply(TaskResponse::PAYLOAD_TYPE, response.to_value()?))
}
