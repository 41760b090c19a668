//! Handler registry keyed by persisted command type.
//!
//! The registry is assembled once at startup and then shared read-only
//! (`Arc<HandlerRegistry>`) by the dispatcher and the orchestrator. It answers
//! three questions:
//! - which handlers exist for an exact command type,
//! - whether a persisted type identifier still resolves to a known type,
//! - how to decode a persisted payload back into that type.

use super::descriptor::CommandTypeDescriptor;
use super::erased::{ErasedCommandHandler, ScopedHandler};
use super::error::CommandTypeError;
use super::scope::ExecutionScope;
use super::{Command, CommandHandler};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

type DecodeFn = fn(&str) -> Result<Arc<dyn Any + Send + Sync>, serde_json::Error>;

fn decode_as<C: Command>(payload: &str) -> Result<Arc<dyn Any + Send + Sync>, serde_json::Error> {
    let command: C = serde_json::from_str(payload)?;
    Ok(Arc::new(command))
}

struct CommandRegistration {
    decode: DecodeFn,
    handlers: Vec<Arc<dyn ErasedCommandHandler>>,
}

/// A persisted payload decoded back into its registered type.
#[derive(Clone)]
pub struct ResolvedCommand {
    pub descriptor: CommandTypeDescriptor,
    pub command: Arc<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for ResolvedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCommand")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    commands: HashMap<CommandTypeDescriptor, CommandRegistration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `C` resolvable without attaching a handler.
    pub fn register_command<C: Command>(&mut self) -> &mut Self {
        self.entry::<C>();
        self
    }

    /// Registers a handler whose instance is cloned for every execution.
    pub fn register<C, H>(&mut self, handler: H) -> &mut Self
    where
        C: Command,
        H: CommandHandler<C> + Clone,
    {
        self.register_scoped::<C, H, _>(move |_scope: &ExecutionScope| handler.clone())
    }

    /// Registers a handler built by `factory` from each execution's scope.
    pub fn register_scoped<C, H, F>(&mut self, factory: F) -> &mut Self
    where
        C: Command,
        H: CommandHandler<C>,
        F: Fn(&ExecutionScope) -> H + Send + Sync + 'static,
    {
        let wrapper: Arc<dyn ErasedCommandHandler> =
            Arc::new(ScopedHandler::<C, H, F>::new(factory));
        tracing::debug!(
            command_type = %C::command_type(),
            handler = wrapper.handler_name(),
            "Registered command handler"
        );
        self.entry::<C>().handlers.push(wrapper);
        self
    }

    fn entry<C: Command>(&mut self) -> &mut CommandRegistration {
        self.commands
            .entry(C::command_type())
            .or_insert_with(|| CommandRegistration {
                decode: decode_as::<C>,
                handlers: Vec::new(),
            })
    }

    /// Handlers registered for exactly `C`.
    pub fn handlers_for<C: Command>(&self) -> Vec<Arc<dyn ErasedCommandHandler>> {
        self.handlers_for_type(&C::command_type())
    }

    /// Handlers whose registered type is an exact match for `descriptor`.
    pub fn handlers_for_type(
        &self,
        descriptor: &CommandTypeDescriptor,
    ) -> Vec<Arc<dyn ErasedCommandHandler>> {
        self.commands
            .iter()
            .filter(|(registered, _)| registered.is_exact_type_match(descriptor))
            .flat_map(|(_, registration)| registration.handlers.iter().cloned())
            .collect()
    }

    pub fn handler_count<C: Command>(&self) -> usize {
        self.commands
            .get(&C::command_type())
            .map(|registration| registration.handlers.len())
            .unwrap_or(0)
    }

    /// Resolves a persisted identifier back into a known descriptor.
    pub fn resolve(&self, type_id: &str) -> Result<CommandTypeDescriptor, CommandTypeError> {
        let descriptor = CommandTypeDescriptor::from_identifier(type_id);
        if self.commands.contains_key(&descriptor) {
            Ok(descriptor)
        } else {
            Err(CommandTypeError::Unresolvable {
                type_id: type_id.to_string(),
            })
        }
    }

    /// Decodes `payload` as the type registered under `descriptor`.
    pub fn decode(
        &self,
        descriptor: &CommandTypeDescriptor,
        payload: &str,
    ) -> Result<ResolvedCommand, CommandTypeError> {
        let registration =
            self.commands
                .get(descriptor)
                .ok_or_else(|| CommandTypeError::Unresolvable {
                    type_id: descriptor.identifier().to_string(),
                })?;

        let command =
            (registration.decode)(payload).map_err(|e| CommandTypeError::Deserialization {
                type_id: descriptor.identifier().to_string(),
                message: e.to_string(),
            })?;

        Ok(ResolvedCommand {
            descriptor: descriptor.clone(),
            command,
        })
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (descriptor, registration) in &self.commands {
            map.entry(&descriptor.identifier(), &registration.handlers.len());
        }
        map.finish()
    }
}
