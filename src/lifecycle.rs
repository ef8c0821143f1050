//! Process lifecycle probe.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether the hosting process is in the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Foreground,
    Background,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Foreground => write!(f, "foreground"),
            Self::Background => write!(f, "background"),
        }
    }
}

/// Reports the current lifecycle state. Queried at every hand-off.
pub trait AppLifecycle: Send + Sync {
    fn state(&self) -> LifecycleState;
}

/// Lifecycle flag the host flips on foreground/background transitions.
#[derive(Debug, Default)]
pub struct SharedLifecycle {
    background: AtomicBool,
}

impl SharedLifecycle {
    #[must_use]
    pub fn new(state: LifecycleState) -> Self {
        Self {
            background: AtomicBool::new(state == LifecycleState::Background),
        }
    }

    pub fn set(&self, state: LifecycleState) {
        self.background
            .store(state == LifecycleState::Background, Ordering::SeqCst);
    }
}

impl AppLifecycle for SharedLifecycle {
    fn state(&self) -> LifecycleState {
        if self.background.load(Ordering::SeqCst) {
            LifecycleState::Background
        } else {
            LifecycleState::Foreground
        }
    }
}
