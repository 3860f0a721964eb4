//! Plugin registration and boot ordering.

use std::sync::Arc;

use switchboard_events::{EventBus, EventPayload, names};
use tracing::{debug, info};

use crate::errors::PluginError;
use crate::plugins::plugin::{BootContext, Plugin};

struct Entry {
    plugin: Arc<dyn Plugin>,
    registered: bool,
    booted: bool,
}

/// Owns the plugin list and drives register, boot, and unregister.
#[derive(Default)]
pub struct PluginManager {
    entries: Vec<Entry>,
}

impl PluginManager {
    /// Empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plugin. It takes part in the next register and boot.
    pub fn add_plugin(&mut self, plugin: Arc<dyn Plugin>) {
        debug!(plugin = plugin.name(), "plugin added");
        self.entries.push(Entry {
            plugin,
            registered: false,
            booted: false,
        });
    }

    /// Run every pending register hook in insertion order, emitting
    /// `plugin.registered` after each.
    ///
    /// Already registered plugins are skipped. The first failing hook or
    /// `plugin.registered` listener stops the pass.
    pub fn register_plugins(&mut self, bus: &EventBus) -> Result<(), PluginError> {
        for entry in self.entries.iter_mut().filter(|e| !e.registered) {
            let name = entry.plugin.name().to_owned();
            entry.plugin.register(bus)?;
            entry.registered = true;
            debug!(plugin = %name, "plugin registered");
            bus.dispatch(
                names::PLUGIN_REGISTERED,
                &EventPayload::Plugin { name: name.clone() },
            )
            .map_err(|e| PluginError::new(name, e.to_string()))?;
        }
        Ok(())
    }

    /// Boot every registered plugin that has not booted yet.
    ///
    /// Plugins added after the last register pass are left for the next
    /// one.
    pub fn boot_plugins(&mut self, ctx: &mut BootContext<'_>) -> Result<(), PluginError> {
        for entry in &mut self.entries {
            if entry.booted {
                continue;
            }
            if !entry.registered {
                debug!(plugin = entry.plugin.name(), "plugin not registered, boot deferred");
                continue;
            }
            entry.plugin.boot(ctx)?;
            entry.booted = true;
            info!(plugin = entry.plugin.name(), "plugin booted");
        }
        Ok(())
    }

    /// Run every registered plugin's unregister hook and reset its state.
    pub fn unregister_plugins(&mut self, bus: &EventBus) {
        for entry in self.entries.iter_mut().filter(|e| e.registered) {
            entry.plugin.unregister(bus);
            entry.registered = false;
            entry.booted = false;
            debug!(plugin = entry.plugin.name(), "plugin unregistered");
        }
    }

    /// Number of plugins.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no plugin was added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Plugin names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.plugin.name()).collect()
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.names())
            .finish()
    }
}
