//! Per-plugin command table.

use drover_core::{Command, Registry};
use serde::Serialize;

use crate::error::{PluginError, PluginResult};

/// Commands one plugin exposes, keyed by name and alias.
///
/// Built once from the plugin's metadata answer and never mutated.
#[derive(Debug)]
pub struct CommandRegistry {
    plugin: String,
    commands: Registry<Command>,
}

impl CommandRegistry {
    /// Build the table for `plugin`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Handshake`] if two commands share a name or
    /// alias, or a command has an empty name.
    pub fn from_commands(plugin: &str, commands: Vec<Command>) -> PluginResult<Self> {
        let registry = Registry::new();
        for command in commands {
            if command.name.trim().is_empty() {
                return Err(PluginError::Handshake {
                    plugin: plugin.to_string(),
                    message: "plugin declared a command with an empty name".into(),
                });
            }
            let name = command.name.clone();
            let aliases = command.aliases.clone();
            registry
                .register(name, aliases, command)
                .map_err(|e| PluginError::Handshake {
                    plugin: plugin.to_string(),
                    message: format!("invalid command table: {e}"),
                })?;
        }
        Ok(Self {
            plugin: plugin.to_string(),
            commands: registry,
        })
    }

    /// Look up a command by name or alias.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Command> {
        self.commands.get(name)
    }

    /// Look up a command, failing with [`PluginError::CommandNotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::CommandNotFound`] if nothing matches.
    pub fn resolve(&self, name: &str) -> PluginResult<Command> {
        self.get(name).ok_or_else(|| PluginError::CommandNotFound {
            plugin: self.plugin.clone(),
            command: name.to_string(),
        })
    }

    /// All commands, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<Command> {
        self.commands.values()
    }

    /// Number of commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the plugin exposes no commands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// One row of the host command table handed to the CLI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedCommand {
    /// Owning plugin.
    pub plugin: String,
    /// Command name.
    pub name: String,
    /// Help-listing group.
    pub category: String,
    /// Short description.
    pub description: String,
    /// Usage line.
    pub usage: String,
    /// Alternative names.
    pub aliases: Vec<String>,
    /// Excluded from help listings.
    pub hidden: bool,
    /// Runs as an interactive session.
    pub interactive: bool,
    /// Needs a terminal.
    pub requires_tty: bool,
}

impl ResolvedCommand {
    pub(crate) fn new(plugin: &str, command: Command) -> Self {
        Self {
            plugin: plugin.to_string(),
            name: command.name,
            category: command.category,
            description: command.description,
            usage: command.usage,
            aliases: command.aliases,
            hidden: command.hidden,
            interactive: command.interactive,
            requires_tty: command.requires_tty,
        }
    }
}
