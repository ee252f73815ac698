//! Render loop configuration.

use std::env;

const DEFAULT_MAX_PASSES: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderConfig {
    /// Upper bound on render passes a single [`Root::pump`](crate::Root::pump)
    /// may run before giving up with [`RenderError::Runaway`](crate::RenderError::Runaway).
    pub max_passes: usize,
    /// Logs a dump of the committed tree after every commit.
    pub debug_tree: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            debug_tree: false,
        }
    }
}

impl RenderConfig {
    /// Defaults overridden by `TRELLIS_DEBUG` and `TRELLIS_MAX_PASSES`.
    pub fn from_env() -> Self {
        Self::from_vars(|name| env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(value) = var("TRELLIS_DEBUG") {
            config.debug_tree = matches!(value.trim(), "1" | "true" | "yes" | "on");
        }
        if let Some(value) = var("TRELLIS_MAX_PASSES") {
            match value.trim().parse::<usize>() {
                Ok(passes) if passes > 0 => config.max_passes = passes,
                _ => log::warn!("ignoring invalid TRELLIS_MAX_PASSES={value:?}"),
            }
        }
        config
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    pub fn with_debug_tree(mut self, debug_tree: bool) -> Self {
        self.debug_tree = debug_tree;
        self
    }
}
