//! Request context: cancellation, deadline and correlation metadata.
//!
//! Every engine operation takes a [`Context`]. Awaiting work through
//! [`Context::run`] makes it stop at the first of completion, cancellation or
//! deadline.

use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// An operation stopped before completing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The context's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// The context's deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Cross-cutting request context.
///
/// # Examples
///
/// ```
/// use foldline_core::context::Context;
/// use serde_json::json;
/// use std::time::Duration;
///
/// let ctx = Context::new()
///     .with_timeout(Duration::from_secs(5))
///     .with_actor("user-42")
///     .with_correlation_id("req-abc-123")
///     .with_metadata(json!({"source": "api"}));
///
/// assert_eq!(ctx.actor(), Some("user-42"));
/// assert!(ctx.event_metadata().is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    actor: Option<String>,
    correlation_id: Option<String>,
    metadata: Option<Value>,
}

impl Context {
    /// A context that never expires on its own.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the operation when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Set an absolute deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Set the actor identity.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set the correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Attach arbitrary metadata, copied into every event this request produces.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// A context with the same correlation data but no cancellation or
    /// deadline, for work that outlives the request (asynchronous delivery).
    #[must_use]
    pub fn detached(&self) -> Self {
        Self {
            cancellation: CancellationToken::new(),
            deadline: None,
            actor: self.actor.clone(),
            correlation_id: self.correlation_id.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// The cancellation token of this context.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// The deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The actor identity, if any.
    #[must_use]
    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    /// The correlation ID, if any.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Check the context without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the context is already cancelled or expired.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancellation.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(Interrupted::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `future` until it completes, the context is cancelled, or the
    /// deadline elapses. On interruption the future is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the future did not complete in time.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, Interrupted> {
        self.check()?;
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancellation.cancelled() => Err(Interrupted::Cancelled),
            () = deadline => Err(Interrupted::DeadlineExceeded),
            output = future => Ok(output),
        }
    }

    /// JSON metadata recorded alongside events: correlation ID, actor and the
    /// user-supplied metadata. `None` when the context carries none of them.
    #[must_use]
    pub fn event_metadata(&self) -> Option<Value> {
        if self.actor.is_none() && self.correlation_id.is_none() && self.metadata.is_none() {
            return None;
        }
        let mut map = serde_json::Map::new();
        if let Some(actor) = &self.actor {
            map.insert("actor".to_string(), Value::String(actor.clone()));
        }
        if let Some(id) = &self.correlation_id {
            map.insert("correlation_id".to_string(), Value::String(id.clone()));
        }
        if let Some(metadata) = &self.metadata {
            map.insert("metadata".to_string(), metadata.clone());
        }
        Some(Value::Object(map))
    }
}
