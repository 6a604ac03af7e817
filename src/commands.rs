//! Command dispatch: a name-to-handler table plus the login-required wrapper.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use crate::config::Config;
use crate::db::{Database, User};
use crate::error::CommandError;

pub type CommandResult = Result<(), CommandError>;

/// A command name and its positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Everything a handler may touch: the store and the loaded configuration.
pub struct State {
    pub db: Arc<Database>,
    pub config: Config,
}

impl State {
    pub fn new(db: Arc<Database>, config: Config) -> Self {
        Self { db, config }
    }

    /// Resolve the configured current user against the store.
    pub async fn current_user(&self) -> Result<User, CommandError> {
        let name = self
            .config
            .current_user_name
            .as_deref()
            .ok_or(CommandError::NoCurrentUser)?;

        self.db
            .get_user_by_name(name)
            .await?
            .ok_or_else(|| CommandError::UserNotFound(name.to_string()))
    }
}

pub type Handler =
    Box<dyn for<'a> Fn(&'a mut State, Command) -> BoxFuture<'a, CommandResult> + Send + Sync>;

fn boxed<F>(handler: F) -> Handler
where
    F: for<'a> Fn(&'a mut State, Command) -> BoxFuture<'a, CommandResult> + Send + Sync + 'static,
{
    Box::new(handler)
}

/// Adapt a handler that needs the acting user into a plain handler. The wrapped
/// handler only runs once the current user resolves.
pub fn logged_in<F>(handler: F) -> Handler
where
    F: for<'a> Fn(&'a mut State, Command, User) -> BoxFuture<'a, CommandResult>
        + Send
        + Sync
        + 'static,
{
    let handler = Arc::new(handler);
    boxed(move |state, cmd| {
        let handler = Arc::clone(&handler);
        Box::pin(async move {
            let user = state.current_user().await?;
            (*handler)(state, cmd, user).await
        })
    })
}

#[derive(Default)]
pub struct Commands {
    handlers: HashMap<String, Handler>,
}

impl Commands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering a name twice replaces the earlier handler.
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: for<'a> Fn(&'a mut State, Command) -> BoxFuture<'a, CommandResult>
            + Send
            + Sync
            + 'static,
    {
        if self.handlers.insert(name.to_string(), boxed(handler)).is_some() {
            debug!("Replaced handler for command '{}'", name);
        }
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub async fn run(&self, state: &mut State, cmd: Command) -> CommandResult {
        let handler = self
            .handlers
            .get(&cmd.name)
            .ok_or_else(|| CommandError::UnknownCommand(cmd.name.clone()))?;

        debug!("Running command '{}' with {} args", cmd.name, cmd.args.len());
        handler(state, cmd).await
    }
}
