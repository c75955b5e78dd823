//! Per-call context handed to plugin code.

use tokio_util::sync::CancellationToken;

/// Who is being called, and whether the host still wants the answer.
#[derive(Debug, Clone)]
pub struct Context {
    plugin: String,
    cancel: CancellationToken,
}

impl Context {
    /// A fresh context for `plugin`.
    #[must_use]
    pub fn new(plugin: impl Into<String>) -> Self {
        Self::with_token(plugin, CancellationToken::new())
    }

    pub(crate) fn with_token(plugin: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            plugin: plugin.into(),
            cancel,
        }
    }

    /// Name of the plugin being served.
    #[must_use]
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Whether the host disconnected or abandoned the call.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the call is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// A context cancelled with this one, or on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self::with_token(self.plugin.clone(), self.cancel.child_token())
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}
