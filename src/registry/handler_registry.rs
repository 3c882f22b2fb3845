//! # Handler Registry
//!
//! Owns the command → handler mapping and the handlers' activation status. All mutation
//! happens under a write lock that is never held across an `await`; handler lifecycle
//! hooks run outside the lock and their effects are published in a single locked step.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::handler::{Handler, HandlerStatus, RegisteredHandler};
use super::policy::{ExecutionPolicy, Isolation, IsolationStrategy};
use super::sanitize::sanitize_identifier;
use super::settings::HandlerSettings;
use super::RegistryError;
use crate::config::{EngineConfig, ProxyConfig};
use crate::constants::params;
use crate::execution::{bulkhead_key, InvocationContext};
use crate::logging::log_registry_operation;
use crate::models::{Command, RequestContext};

/// Everything the engine needs to run one command
#[derive(Debug, Clone)]
pub struct Resolution {
    pub handler: Arc<RegisteredHandler>,
    /// Sanitised effective pool name
    pub pool_name: String,
    pub policy: ExecutionPolicy,
}

#[derive(Default)]
struct RegistryState {
    handlers: HashMap<String, Arc<RegisteredHandler>>,
    /// command name → handler name
    commands: HashMap<String, String>,
    /// sanitised pool or command name → worker count
    pool_sizes: HashMap<String, usize>,
}

impl RegistryState {
    fn conflicting_command(&self, handler: &dyn Handler, ignore: Option<&str>) -> Option<(String, String)> {
        handler.commands().into_iter().find_map(|command| {
            self.commands
                .get(&command)
                .filter(|owner| Some(owner.as_str()) != ignore)
                .map(|owner| (command, owner.clone()))
        })
    }

    fn insert(&mut self, registered: Arc<RegisteredHandler>) {
        for command in registered.commands() {
            self.commands
                .insert(command.clone(), registered.name().to_string());
        }
        self.handlers
            .insert(registered.name().to_string(), registered);
        self.rebuild_pool_sizes();
    }

    fn remove(&mut self, name: &str) -> Option<Arc<RegisteredHandler>> {
        let removed = self.handlers.remove(name)?;
        self.commands.retain(|_, owner| owner != name);
        self.rebuild_pool_sizes();
        Some(removed)
    }

    fn rebuild_pool_sizes(&mut self) {
        let mut sizes = HashMap::new();
        let mut handlers: Vec<_> = self.handlers.values().collect();
        handlers.sort_by(|a, b| a.name().cmp(b.name()));

        for registered in handlers {
            let settings = registered.settings();
            for (name, size) in settings
                .command_pool_sizes
                .iter()
                .chain(settings.concurrent_pool_sizes.iter())
            {
                let key = sanitize_identifier(name);
                if let Some(previous) = sizes.insert(key.clone(), *size) {
                    if previous != *size {
                        warn!(
                            pool = %key,
                            previous = previous,
                            size = size,
                            handler = %registered.name(),
                            "Conflicting pool sizes declared; later declaration wins"
                        );
                    }
                }
            }
        }
        self.pool_sizes = sizes;
    }
}

/// Registry statistics
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_handlers: usize,
    pub active_handlers: usize,
    pub total_commands: usize,
    pub pool_sizes: HashMap<String, usize>,
}

pub struct HandlerRegistry {
    state: RwLock<RegistryState>,
    defaults: EngineConfig,
    overrides: HashMap<String, HandlerSettings>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl HandlerRegistry {
    pub fn new(defaults: EngineConfig) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            defaults,
            overrides: HashMap::new(),
        }
    }

    /// Registry using the engine defaults and per-handler overrides from configuration
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.engine.clone()).with_overrides(config.handlers.clone())
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, HandlerSettings>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Register, initialise and activate a handler
    ///
    /// A command already served by another handler is rejected with
    /// [`RegistryError::DuplicateCommand`]; nothing is shadowed.
    pub async fn register(&self, handler: Arc<dyn Handler>) -> Result<(), RegistryError> {
        let name = handler.name().to_string();
        let settings = self.prepare(handler.as_ref())?;

        {
            let state = self.state.read();
            if state.handlers.contains_key(&name) {
                return Err(RegistryError::DuplicateHandler { name });
            }
            if let Some((command, existing)) = state.conflicting_command(handler.as_ref(), None) {
                return Err(RegistryError::DuplicateCommand {
                    command,
                    existing,
                    attempted: name,
                });
            }
        }

        let registered = Arc::new(RegisteredHandler::new(handler.clone(), settings, 0));
        self.initialize(&registered).await?;

        let conflict = {
            let mut state = self.state.write();
            if state.handlers.contains_key(&name) {
                Some(RegistryError::DuplicateHandler { name: name.clone() })
            } else if let Some((command, existing)) =
                state.conflicting_command(handler.as_ref(), None)
            {
                Some(RegistryError::DuplicateCommand {
                    command,
                    existing,
                    attempted: name.clone(),
                })
            } else {
                state.insert(registered.clone());
                registered.set_status(HandlerStatus::Active);
                None
            }
        };

        if let Some(err) = conflict {
            // Lost a registration race after init; undo the init.
            self.shutdown_quietly(&registered).await;
            return Err(err);
        }

        log_registry_operation(
            "register",
            &name,
            registered.commands(),
            registered.generation(),
            "active",
            None,
        );
        Ok(())
    }

    /// Remove a handler and all of its command associations in one step
    ///
    /// The handler is deactivated but not shut down; see [`Self::deregister`].
    pub fn unregister(&self, name: &str) -> Result<Arc<RegisteredHandler>, RegistryError> {
        let removed = self.state.write().remove(name);
        match removed {
            Some(registered) => {
                registered.set_status(HandlerStatus::Inactive);
                log_registry_operation(
                    "unregister",
                    name,
                    registered.commands(),
                    registered.generation(),
                    "inactive",
                    None,
                );
                Ok(registered)
            }
            None => {
                warn!(handler = %name, "Attempted to unregister unknown handler");
                Err(RegistryError::HandlerNotFound {
                    name: name.to_string(),
                })
            }
        }
    }

    /// Unregister, then shut the handler down
    pub async fn deregister(&self, name: &str) -> Result<(), RegistryError> {
        let registered = self.unregister(name)?;
        registered
            .handler()
            .shutdown(&registered.context())
            .await
            .map_err(|e| RegistryError::ShutdownFailed {
                handler: name.to_string(),
                reason: e.to_string(),
            })
    }

    /// Hot-reload: swap in a new instance of an already registered handler
    ///
    /// The replacement is initialised first; the old associations are then removed and
    /// the new ones inserted under one write lock, so a concurrent resolve sees either
    /// the old handler or the new one. The replacement's generation is bumped so it gets
    /// fresh bulkheads sized from its own settings.
    pub async fn replace(&self, handler: Arc<dyn Handler>) -> Result<(), RegistryError> {
        let name = handler.name().to_string();
        let settings = self.prepare(handler.as_ref())?;

        let generation = {
            let state = self.state.read();
            let Some(existing) = state.handlers.get(&name) else {
                return Err(RegistryError::HandlerNotFound { name });
            };
            if let Some((command, owner)) =
                state.conflicting_command(handler.as_ref(), Some(name.as_str()))
            {
                return Err(RegistryError::DuplicateCommand {
                    command,
                    existing: owner,
                    attempted: name,
                });
            }
            existing.generation() + 1
        };

        let replacement = Arc::new(RegisteredHandler::new(handler.clone(), settings, generation));
        self.initialize(&replacement).await?;

        let outcome = {
            let mut state = self.state.write();
            match state.conflicting_command(handler.as_ref(), Some(name.as_str())) {
                Some((command, owner)) => Err(RegistryError::DuplicateCommand {
                    command,
                    existing: owner,
                    attempted: name.clone(),
                }),
                None => {
                    let previous = state.remove(&name);
                    state.insert(replacement.clone());
                    replacement.set_status(HandlerStatus::Active);
                    if let Some(previous) = &previous {
                        previous.set_status(HandlerStatus::Inactive);
                    }
                    Ok(previous)
                }
            }
        };

        let previous = match outcome {
            Ok(previous) => previous,
            Err(err) => {
                self.shutdown_quietly(&replacement).await;
                return Err(err);
            }
        };

        if let Some(previous) = previous {
            self.shutdown_quietly(&previous).await;
        }

        log_registry_operation(
            "replace",
            &name,
            replacement.commands(),
            generation,
            "active",
            None,
        );
        Ok(())
    }

    /// Deactivate, shut down, re-initialise and re-activate a handler in place
    pub async fn reinit(&self, name: &str) -> Result<(), RegistryError> {
        let registered = self
            .handler(name)
            .ok_or_else(|| RegistryError::HandlerNotFound {
                name: name.to_string(),
            })?;

        registered.set_status(HandlerStatus::Inactive);
        self.shutdown_quietly(&registered).await;
        self.initialize(&registered).await?;

        // It may have been unregistered while we were re-initialising.
        let still_registered = self
            .state
            .read()
            .handlers
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, &registered));
        if !still_registered {
            self.shutdown_quietly(&registered).await;
            return Err(RegistryError::HandlerNotFound {
                name: name.to_string(),
            });
        }

        registered.set_status(HandlerStatus::Active);
        log_registry_operation(
            "reinit",
            name,
            registered.commands(),
            registered.generation(),
            "active",
            None,
        );
        Ok(())
    }

    /// Deactivate and shut down every handler; failures are logged and skipped
    pub async fn shutdown_all(&self) {
        let handlers = self.handlers();
        info!(count = handlers.len(), "🛑 Shutting down all handlers");

        for registered in handlers {
            registered.set_status(HandlerStatus::Inactive);
            match registered
                .handler()
                .shutdown(&registered.context())
                .await
            {
                Ok(()) => log_registry_operation(
                    "shutdown",
                    registered.name(),
                    registered.commands(),
                    registered.generation(),
                    "inactive",
                    None,
                ),
                Err(e) => error!(
                    handler = %registered.name(),
                    error = %e,
                    "Handler shutdown failed; continuing with remaining handlers"
                ),
            }
        }
    }

    /// Resolve a command to its handler, effective pool and execution policy
    ///
    /// An empty (after sanitisation) `pool_name` defaults to the sanitised command name.
    pub fn resolve(&self, command_name: &str, pool_name: &str) -> Result<Resolution, RegistryError> {
        let command_key = sanitize_identifier(command_name);
        let requested_pool = sanitize_identifier(pool_name);
        let pool_name = if requested_pool.is_empty() {
            command_key.clone()
        } else {
            requested_pool
        };

        let (registered, max_concurrency) = {
            let state = self.state.read();
            let registered = state
                .commands
                .get(command_name)
                .and_then(|owner| state.handlers.get(owner))
                .cloned()
                .ok_or_else(|| RegistryError::UnknownCommand {
                    command: command_name.to_string(),
                })?;
            let max_concurrency = state
                .pool_sizes
                .get(&pool_name)
                .or_else(|| state.pool_sizes.get(&command_key))
                .copied()
                .unwrap_or(self.defaults.default_max_concurrency);
            (registered, max_concurrency)
        };

        if !registered.is_active() {
            return Err(RegistryError::HandlerInactive {
                handler: registered.name().to_string(),
                command: command_name.to_string(),
            });
        }

        let policy = self.policy_for(
            &registered,
            command_name,
            &command_key,
            &pool_name,
            max_concurrency,
        );
        debug!(
            command = %command_name,
            pool = %pool_name,
            handler = %registered.name(),
            ?policy,
            "Resolved command"
        );

        Ok(Resolution {
            handler: registered,
            pool_name,
            policy,
        })
    }

    pub fn handler(&self, name: &str) -> Option<Arc<RegisteredHandler>> {
        self.state.read().handlers.get(name).cloned()
    }

    pub fn handler_for_command(&self, command_name: &str) -> Option<Arc<RegisteredHandler>> {
        let state = self.state.read();
        state
            .commands
            .get(command_name)
            .and_then(|owner| state.handlers.get(owner))
            .cloned()
    }

    pub fn handlers(&self) -> Vec<Arc<RegisteredHandler>> {
        let mut handlers: Vec<_> = self.state.read().handlers.values().cloned().collect();
        handlers.sort_by(|a, b| a.name().cmp(b.name()));
        handlers
    }

    pub fn commands(&self) -> Vec<String> {
        let mut commands: Vec<_> = self.state.read().commands.keys().cloned().collect();
        commands.sort();
        commands
    }

    /// Worker count for a (sanitised) pool name
    pub fn pool_size(&self, pool_name: &str) -> usize {
        self.state
            .read()
            .pool_sizes
            .get(pool_name)
            .copied()
            .unwrap_or(self.defaults.default_max_concurrency)
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        RegistryStats {
            total_handlers: state.handlers.len(),
            active_handlers: state.handlers.values().filter(|h| h.is_active()).count(),
            total_commands: state.commands.len(),
            pool_sizes: state.pool_sizes.clone(),
        }
    }

    fn prepare(&self, handler: &dyn Handler) -> Result<HandlerSettings, RegistryError> {
        let name = handler.name().to_string();
        let commands = handler.commands();
        if commands.is_empty() {
            return Err(RegistryError::NoCommands { handler: name });
        }
        if let Some(command) = commands
            .iter()
            .find(|command| sanitize_identifier(command).is_empty())
        {
            return Err(RegistryError::InvalidCommandName {
                handler: name,
                command: command.clone(),
            });
        }

        let declared = handler.settings();
        let settings = match self.overrides.get(&name) {
            Some(configured) => declared.overlay(configured),
            None => declared,
        };
        settings
            .validate()
            .map_err(|reason| RegistryError::InvalidSettings {
                handler: name,
                reason,
            })?;
        Ok(settings)
    }

    /// Run `init` and the configured initialization commands
    async fn initialize(&self, registered: &Arc<RegisteredHandler>) -> Result<(), RegistryError> {
        let started = Instant::now();
        let handler = registered.handler();
        let init_failed = |reason: String| RegistryError::InitializationFailed {
            handler: registered.name().to_string(),
            reason,
        };

        handler
            .init(&registered.context())
            .await
            .map_err(|e| init_failed(e.to_string()))?;

        for init_params in &registered.settings().initialization_commands {
            let Some(command_name) = init_params.get(params::COMMAND_NAME) else {
                self.shutdown_quietly(registered).await;
                return Err(init_failed(format!(
                    "initialization command is missing '{}'",
                    params::COMMAND_NAME
                )));
            };

            let mut command = Command::new(command_name.clone());
            command.params = init_params
                .iter()
                .filter(|(k, _)| k.as_str() != params::COMMAND_NAME)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();

            let ctx = InvocationContext::new(RequestContext::new(), sanitize_identifier(command_name));
            let outcome = match handler.invoke(&ctx, &command).await {
                Ok(Some(result)) if !result.success => Err(format!(
                    "initialization command '{command_name}' returned unsuccessful result: {}",
                    result.status_line()
                )),
                Ok(_) => Ok(()),
                Err(e) => Err(format!(
                    "initialization command '{command_name}' failed: {e}"
                )),
            };

            if let Err(reason) = outcome {
                self.shutdown_quietly(registered).await;
                return Err(init_failed(reason));
            }
            debug!(
                handler = %registered.name(),
                command = %command_name,
                "Initialization command completed"
            );
        }

        info!(
            handler = %registered.name(),
            details = %handler.details(),
            duration_ms = started.elapsed().as_millis() as u64,
            "✅ Handler initialized"
        );
        Ok(())
    }

    async fn shutdown_quietly(&self, registered: &RegisteredHandler) {
        if let Err(e) = registered
            .handler()
            .shutdown(&registered.context())
            .await
        {
            warn!(
                handler = %registered.name(),
                error = %e,
                "Handler shutdown failed"
            );
        }
    }

    fn policy_for(
        &self,
        registered: &RegisteredHandler,
        command_name: &str,
        command_key: &str,
        pool_name: &str,
        max_concurrency: usize,
    ) -> ExecutionPolicy {
        let settings = registered.settings();
        let handler = registered.handler();

        let timeout_ms = settings
            .executor_timeouts_ms
            .get(command_name)
            .or_else(|| settings.executor_timeouts_ms.get(command_key))
            .copied()
            .or(settings.default_timeout_ms)
            .unwrap_or(self.defaults.default_timeout_ms);

        let isolation = match settings.isolation.unwrap_or_else(|| handler.isolation_strategy()) {
            IsolationStrategy::ThreadPool => Isolation::ThreadPool {
                queue_capacity: settings
                    .queue_capacity
                    .unwrap_or(self.defaults.default_queue_capacity),
            },
            IsolationStrategy::Semaphore => Isolation::Semaphore {
                acquire_timeout: self.defaults.semaphore_acquire_timeout(),
            },
        };

        ExecutionPolicy {
            isolation,
            pool_name: pool_name.to_string(),
            bulkhead_key: bulkhead_key(pool_name, registered.generation()),
            max_concurrency,
            timeout: Duration::from_millis(timeout_ms),
            fallback_enabled: settings
                .fallback_enabled
                .unwrap_or(self.defaults.fallback_enabled),
            cache_key_fn: handler.cache_key_fn(),
            invocation: settings.invocation_for(command_name),
        }
    }
}
