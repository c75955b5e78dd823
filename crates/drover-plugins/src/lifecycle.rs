//! Per-instance lifecycle state machine.
//!
//! ```text
//! Uninitialized --init--> Initialized --start--> Started
//!       |                      |                    |
//!       +---------stop---------+--------stop--------+--> Stopped (terminal)
//! ```
//!
//! `configure` is only accepted while `Uninitialized`. `start` before
//! `init` is rejected; there is no implicit init. Health checks never
//! change state.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{PluginError, PluginResult};

/// Lifecycle state of a loaded plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PluginState {
    /// Launched and described, no hooks run yet.
    Uninitialized = 0,
    /// `init` completed.
    Initialized = 1,
    /// `start` completed.
    Started = 2,
    /// Stopped. Terminal.
    Stopped = 3,
}

impl PluginState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Uninitialized,
            1 => Self::Initialized,
            2 => Self::Started,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Started => "started",
            Self::Stopped => "stopped",
        })
    }
}

/// A state-changing lifecycle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Hand over configuration.
    Configure,
    /// Run the init hook.
    Init,
    /// Run the start hook.
    Start,
    /// Run the stop hook.
    Stop,
}

impl LifecycleAction {
    /// The state this action leads to, if allowed from `from`.
    #[must_use]
    pub fn target(self, from: PluginState) -> Option<PluginState> {
        match (self, from) {
            (Self::Configure, PluginState::Uninitialized) => Some(PluginState::Uninitialized),
            (Self::Init, PluginState::Uninitialized) => Some(PluginState::Initialized),
            (Self::Start, PluginState::Initialized) => Some(PluginState::Started),
            (Self::Stop, s) if s != PluginState::Stopped => Some(PluginState::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Configure => "configure",
            Self::Init => "init",
            Self::Start => "start",
            Self::Stop => "stop",
        })
    }
}

/// Atomic holder for a [`PluginState`].
///
/// Transitions are compare-and-swap, so two racing callers cannot both
/// move the same instance out of one state.
#[derive(Debug)]
pub struct Lifecycle {
    plugin: String,
    state: AtomicU8,
}

impl Lifecycle {
    /// A new tracker in [`PluginState::Uninitialized`].
    #[must_use]
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            state: AtomicU8::new(PluginState::Uninitialized as u8),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PluginState {
        PluginState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the instance has reached the terminal state.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state() == PluginState::Stopped
    }

    /// Check that `action` is allowed right now, without changing state.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidTransition`] if it is not.
    pub fn check(&self, action: LifecycleAction) -> PluginResult<PluginState> {
        let from = self.state();
        action
            .target(from)
            .ok_or_else(|| self.invalid(action, from))
    }

    /// Apply `action`, moving to its target state.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidTransition`] if the current state does
    /// not permit it, including when another caller changed the state first.
    pub fn transition(&self, action: LifecycleAction) -> PluginResult<PluginState> {
        let mut from = self.state();
        loop {
            let to = action.target(from).ok_or_else(|| self.invalid(action, from))?;
            match self.state.compare_exchange(
                from as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(to),
                Err(actual) => from = PluginState::from_u8(actual),
            }
        }
    }

    /// Force the terminal state, returning the previous one.
    ///
    /// Used by teardown, which must succeed whatever the current state.
    pub fn mark_stopped(&self) -> PluginState {
        PluginState::from_u8(
            self.state
                .swap(PluginState::Stopped as u8, Ordering::AcqRel),
        )
    }

    fn invalid(&self, action: LifecycleAction, from: PluginState) -> PluginError {
        PluginError::InvalidTransition {
            plugin: self.plugin.clone(),
            action,
            from,
        }
    }
}
