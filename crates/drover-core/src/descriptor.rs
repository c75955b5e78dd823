//! Plugin identity, commands and declared capabilities.

use serde::{Deserialize, Serialize};

use crate::error::InvalidName;

/// Self-reported identity of a plugin.
///
/// Fetched once over RPC right after the handshake and immutable for the
/// lifetime of the loaded instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginDescriptor {
    /// Canonical plugin name. See [`validate_plugin_name`].
    pub name: String,
    /// Semantic version of the plugin itself.
    pub version: String,
    /// Author or maintainer.
    pub author: String,
    /// One-line description.
    pub description: String,
    /// SPDX license identifier.
    pub license: String,
    /// Project homepage, used for the advisory source-trust check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    /// Alternative names the plugin can be addressed by.
    pub aliases: Vec<String>,
    /// Oldest SDK version the plugin works with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_sdk_version: Option<String>,
}

impl PluginDescriptor {
    /// A descriptor with a name and version and everything else empty.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the author.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Set the homepage URL.
    #[must_use]
    pub fn with_homepage(mut self, homepage: impl Into<String>) -> Self {
        self.homepage = Some(homepage.into());
        self
    }

    /// Replace the alias list.
    #[must_use]
    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    /// Set the minimum SDK version.
    #[must_use]
    pub fn with_min_sdk_version(mut self, version: impl Into<String>) -> Self {
        self.min_sdk_version = Some(version.into());
        self
    }
}

/// Check that a string is usable as a plugin name or alias.
///
/// Names are non-empty, made of lowercase ASCII letters, digits and `-`,
/// and neither start nor end with `-`.
///
/// # Errors
///
/// Returns [`InvalidName`] describing the first rule the name breaks.
pub fn validate_plugin_name(name: &str) -> Result<(), InvalidName> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        "must contain only lowercase alphanumeric characters and hyphens"
    } else if name.starts_with('-') || name.ends_with('-') {
        "must not start or end with a hyphen"
    } else {
        return Ok(());
    };
    Err(InvalidName {
        name: name.to_string(),
        reason,
    })
}

/// A command a plugin exposes to the host CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Command {
    /// Name, unique within the plugin.
    pub name: String,
    /// Help-listing group.
    pub category: String,
    /// Short description.
    pub description: String,
    /// Usage line, e.g. `greet <name>`.
    pub usage: String,
    /// Alternative names.
    pub aliases: Vec<String>,
    /// Excluded from help listings.
    pub hidden: bool,
    /// Runs as a bidirectional stream session instead of a unary call.
    pub interactive: bool,
    /// Needs a terminal on the host side.
    pub requires_tty: bool,
}

impl Command {
    /// A visible, non-interactive command with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the usage line.
    #[must_use]
    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    /// Replace the alias list.
    #[must_use]
    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    /// Hide from help listings.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Mark as an interactive session command that needs a terminal.
    #[must_use]
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self.requires_tty = true;
        self
    }
}

/// What a plugin asserts it needs from the host.
///
/// Checked once against host policy at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Capabilities {
    /// Needs an isolated container runtime.
    pub docker: bool,
    /// Needs network access.
    pub network: bool,
    /// Needs filesystem access beyond its working directory.
    pub filesystem: bool,
    /// Filesystem paths the plugin will touch.
    pub paths: Vec<String>,
    /// External commands the plugin will run.
    pub commands: Vec<String>,
    /// Environment variables the plugin reads.
    pub env_vars: Vec<String>,
    /// Host configuration keys the plugin reads.
    pub config_keys: Vec<String>,
}

impl Capabilities {
    /// Whether nothing at all is requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
