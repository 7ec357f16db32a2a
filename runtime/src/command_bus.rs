//! Explicit command registry.
//!
//! Handlers are registered on a constructed [`CommandBus`] at startup and
//! looked up by (aggregate type, command type). There is no process-wide
//! registration table.

use crate::aggregate::CommandOutcome;
use crate::error::{CommandError, DynCommandError};
use foldline_core::command::CommandEnvelope;
use foldline_core::context::Context;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

/// Something that can execute type-erased commands for one aggregate type.
///
/// # Dyn Compatibility
///
/// Uses `Pin<Box<dyn Future>>` so handlers can be stored as `Arc<dyn CommandHandler>`.
pub trait CommandHandler: Send + Sync {
    /// Aggregate type whose commands this handler executes.
    fn aggregate_type(&self) -> &'static str;

    /// Command types this handler accepts.
    fn command_types(&self) -> &'static [&'static str];

    /// Execute one command.
    ///
    /// # Errors
    ///
    /// Any [`CommandError`], with the domain error boxed.
    fn handle<'a>(
        &'a self,
        ctx: &'a Context,
        envelope: CommandEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<CommandOutcome, DynCommandError>> + Send + 'a>>;
}

type RouteKey = (String, String);

/// Routes command envelopes to their registered handler.
#[derive(Default)]
pub struct CommandBus {
    routes: RwLock<HashMap<RouteKey, Arc<dyn CommandHandler>>>,
}

impl CommandBus {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every command type it declares.
    ///
    /// Registration is all or nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::HandlerAlreadyRegistered`] if any of the
    /// handler's command types already has a handler.
    pub fn register(&self, handler: Arc<dyn CommandHandler>) -> Result<(), DynCommandError> {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let aggregate_type = handler.aggregate_type();

        let keys: Vec<RouteKey> = handler
            .command_types()
            .iter()
            .map(|command_type| (aggregate_type.to_string(), (*command_type).to_string()))
            .collect();
        if let Some((_, command_type)) = keys.iter().find(|key| routes.contains_key(*key)) {
            return Err(CommandError::HandlerAlreadyRegistered {
                command_type: command_type.clone(),
            });
        }

        for key in keys {
            if let Entry::Vacant(slot) = routes.entry(key) {
                slot.insert(Arc::clone(&handler));
            }
        }
        tracing::info!(
            aggregate_type,
            command_types = ?handler.command_types(),
            "Command handler registered"
        );
        Ok(())
    }

    /// Whether a handler accepts `command_type` for `aggregate_type`.
    #[must_use]
    pub fn handles(&self, aggregate_type: &str, command_type: &str) -> bool {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(aggregate_type.to_string(), command_type.to_string()))
    }

    /// Route `envelope` to its handler and execute it.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::UnhandledCommand`] (and emits nothing) if no
    /// handler is registered for the envelope; otherwise the handler's error.
    pub async fn dispatch(
        &self,
        ctx: &Context,
        envelope: CommandEnvelope,
    ) -> Result<CommandOutcome, DynCommandError> {
        let handler = {
            let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
            let key = (
                envelope.target.aggregate_type().to_string(),
                envelope.command_type.clone(),
            );
            routes.get(&key).cloned()
        };

        match handler {
            Some(handler) => handler.handle(ctx, envelope).await,
            None => {
                tracing::warn!(
                    command_type = %envelope.command_type,
                    target = %envelope.target,
                    "No handler for command"
                );
                Err(CommandError::UnhandledCommand {
                    command_type: envelope.command_type,
                })
            }
        }
    }
}

impl std::fmt::Debug for CommandBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("CommandBus")
            .field("routes", &routes.keys().collect::<Vec<_>>())
            .finish()
    }
}
