//! Runtime configuration.

use std::fmt;
use std::rc::Rc;

/// Default upper bound on flush passes before the runtime gives up.
pub const DEFAULT_MAX_FLUSH_PASSES: usize = 1000;

/// When queued observers run.
#[derive(Clone, Default)]
pub enum FlushMode {
    /// Observers run as soon as the outermost write or batch completes.
    #[default]
    Immediate,

    /// Observers wait for [`Runtime::flush`](super::Runtime::flush). The hook
    /// fires once each time the queue goes from empty to non-empty, so a host
    /// can schedule the flush on its own loop (an animation frame, a tick).
    Deferred(Rc<dyn Fn()>),
}

impl fmt::Debug for FlushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => f.write_str("Immediate"),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Settings for a [`Runtime`](super::Runtime).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub flush_mode: FlushMode,

    /// A flush pass runs every observer queued before it started. Writes
    /// made by those observers queue the next pass. Exceeding this many
    /// passes aborts the flush with [`Error::FlushLimit`](crate::Error::FlushLimit).
    pub max_flush_passes: usize,
}

impl RuntimeConfig {
    pub fn with_flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }

    /// Shorthand for `FlushMode::Deferred` with the given hook.
    pub fn deferred(self, hook: impl Fn() + 'static) -> Self {
        self.with_flush_mode(FlushMode::Deferred(Rc::new(hook)))
    }

    pub fn with_max_flush_passes(mut self, max_flush_passes: usize) -> Self {
        self.max_flush_passes = max_flush_passes;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_mode: FlushMode::Immediate,
            max_flush_passes: DEFAULT_MAX_FLUSH_PASSES,
        }
    }
}
