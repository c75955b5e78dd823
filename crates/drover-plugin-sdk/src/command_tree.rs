//! Command tree for in-process plugins.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use drover_core::{Command, ExecuteRequest, ExecuteResponse, Registry};

use crate::context::Context;
use crate::error::{SdkError, SdkResult};

/// Runs one command in the tree.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Execute `request`.
    async fn run(&self, ctx: &Context, request: ExecuteRequest) -> SdkResult<ExecuteResponse>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> CommandHandler for FnHandler<F>
where
    F: Fn(&ExecuteRequest) -> SdkResult<ExecuteResponse> + Send + Sync,
{
    async fn run(&self, _ctx: &Context, request: ExecuteRequest) -> SdkResult<ExecuteResponse> {
        (self.0)(&request)
    }
}

#[derive(Clone)]
struct CommandEntry {
    command: Command,
    handler: Arc<dyn CommandHandler>,
}

/// Commands registered by in-process plugins, keyed by name and alias.
#[derive(Default)]
pub struct CommandTree {
    entries: Registry<CommandEntry>,
}

impl fmt::Debug for CommandTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTree")
            .field("commands", &self.entries.names())
            .finish()
    }
}

impl CommandTree {
    /// An empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a command.
    ///
    /// # Errors
    ///
    /// [`SdkError::Registry`] if the name or an alias is taken.
    pub fn add(&mut self, command: Command, handler: Arc<dyn CommandHandler>) -> SdkResult<()> {
        let name = command.name.clone();
        let aliases = command.aliases.clone();
        self.entries
            .register(name, aliases, CommandEntry { command, handler })?;
        Ok(())
    }

    /// Install a command backed by a synchronous closure.
    ///
    /// # Errors
    ///
    /// As [`add`](Self::add).
    pub fn add_fn<F>(&mut self, command: Command, f: F) -> SdkResult<()>
    where
        F: Fn(&ExecuteRequest) -> SdkResult<ExecuteResponse> + Send + Sync + 'static,
    {
        self.add(command, Arc::new(FnHandler(f)))
    }

    /// Look up a command by name or alias.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<Command> {
        self.entries.with(name, |_, entry| entry.command.clone())
    }

    /// All commands, sorted by name.
    #[must_use]
    pub fn commands(&self) -> Vec<Command> {
        self.entries
            .values()
            .into_iter()
            .map(|entry| entry.command)
            .collect()
    }

    /// Number of commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tree is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run the command `request` names. Aliases are rewritten to the
    /// canonical name before the handler sees the request.
    ///
    /// # Errors
    ///
    /// [`SdkError::UnknownCommand`] if nothing matches, otherwise whatever
    /// the handler returns.
    pub async fn dispatch(
        &self,
        ctx: &Context,
        mut request: ExecuteRequest,
    ) -> SdkResult<ExecuteResponse> {
        let (name, handler) = self
            .entries
            .with(&request.command, |name, entry| {
                (name.to_string(), Arc::clone(&entry.handler))
            })
            .ok_or_else(|| SdkError::UnknownCommand(request.command.clone()))?;
        request.command = name;
        handler.run(ctx, request).await
    }
}
