use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::policy::{InvocationMode, IsolationStrategy};

/// Per-handler tuning, declared by the handler and overridable from configuration
///
/// Every field is optional so a configuration entry only needs to name what it changes;
/// [`HandlerSettings::overlay`] applies such an entry field by field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerSettings {
    /// Worker count per pool name
    pub concurrent_pool_sizes: HashMap<String, usize>,
    /// Worker count per command name
    pub command_pool_sizes: HashMap<String, usize>,
    /// Timeout per command name
    pub executor_timeouts_ms: HashMap<String, u64>,
    pub default_timeout_ms: Option<u64>,
    pub isolation: Option<IsolationStrategy>,
    pub queue_capacity: Option<usize>,
    pub fallback_enabled: Option<bool>,
    pub invocation_mode: Option<InvocationMode>,
    pub invocation_modes: HashMap<String, InvocationMode>,
    /// Commands run once after `init`; each must name its command under `commandName`
    pub initialization_commands: Vec<BTreeMap<String, String>>,
}

impl HandlerSettings {
    /// `over` wins wherever it says something; maps are merged key by key
    pub fn overlay(&self, over: &HandlerSettings) -> HandlerSettings {
        fn merged<V: Clone>(
            base: &HashMap<String, V>,
            over: &HashMap<String, V>,
        ) -> HashMap<String, V> {
            let mut out = base.clone();
            out.extend(over.iter().map(|(k, v)| (k.clone(), v.clone())));
            out
        }

        HandlerSettings {
            concurrent_pool_sizes: merged(&self.concurrent_pool_sizes, &over.concurrent_pool_sizes),
            command_pool_sizes: merged(&self.command_pool_sizes, &over.command_pool_sizes),
            executor_timeouts_ms: merged(&self.executor_timeouts_ms, &over.executor_timeouts_ms),
            default_timeout_ms: over.default_timeout_ms.or(self.default_timeout_ms),
            isolation: over.isolation.or(self.isolation),
            queue_capacity: over.queue_capacity.or(self.queue_capacity),
            fallback_enabled: over.fallback_enabled.or(self.fallback_enabled),
            invocation_mode: over.invocation_mode.or(self.invocation_mode),
            invocation_modes: merged(&self.invocation_modes, &over.invocation_modes),
            initialization_commands: if over.initialization_commands.is_empty() {
                self.initialization_commands.clone()
            } else {
                over.initialization_commands.clone()
            },
        }
    }

    /// Invocation mode for a command: per-command entry, then handler-wide, then `Sync`
    pub fn invocation_for(&self, command: &str) -> InvocationMode {
        self.invocation_modes
            .get(command)
            .copied()
            .or(self.invocation_mode)
            .unwrap_or_default()
    }

    /// Validation shared by the registry and the configuration loader
    pub fn validate(&self) -> Result<(), String> {
        if let Some((name, _)) = self
            .concurrent_pool_sizes
            .iter()
            .chain(self.command_pool_sizes.iter())
            .find(|(_, size)| **size == 0)
        {
            return Err(format!("pool size for '{name}' must be greater than 0"));
        }
        if let Some((name, _)) = self.executor_timeouts_ms.iter().find(|(_, ms)| **ms == 0) {
            return Err(format!("timeout for '{name}' must be greater than 0"));
        }
        if self.default_timeout_ms == Some(0) {
            return Err("default_timeout_ms must be greater than 0".to_string());
        }
        if let Some(index) = self
            .initialization_commands
            .iter()
            .position(|params| !params.contains_key(crate::constants::params::COMMAND_NAME))
        {
            return Err(format!(
                "initialization command #{index} is missing '{}'",
                crate::constants::params::COMMAND_NAME
            ));
        }
        Ok(())
    }
}
