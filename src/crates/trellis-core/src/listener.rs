//! Run lifecycle listeners

use crate::error::GraphError;
use crate::interrupt::Interruption;
use trellis_checkpoint::{StateData, StateUpdate};

/// Hooks invoked by the runner at run lifecycle points
///
/// All methods default to no-ops; implement only what you need. Listeners
/// are called inline on the runner's path, so they should stay cheap.
pub trait RunListener: Send + Sync {
    /// A step completed and its update was merged
    fn on_step(&self, node: &str, update: &StateUpdate) {
        let _ = (node, update);
    }

    /// The run suspended awaiting external decisions
    fn on_interrupt(&self, interruption: &Interruption) {
        let _ = interruption;
    }

    /// The run reached the terminal sentinel
    fn on_complete(&self, state: &StateData) {
        let _ = state;
    }

    /// The run failed
    fn on_error(&self, node: &str, error: &GraphError) {
        let _ = (node, error);
    }
}

/// Listener that mirrors lifecycle events to `tracing` at info level
#[derive(Debug, Clone, Default)]
pub struct LogListener;

impl RunListener for LogListener {
    fn on_step(&self, node: &str, update: &StateUpdate) {
        tracing::info!(node = %node, keys = update.len(), "step completed");
    }

    fn on_interrupt(&self, interruption: &Interruption) {
        tracing::info!(
            node = %interruption.qualified_node(),
            items = interruption.items.len(),
            "run suspended for feedback"
        );
    }

    fn on_complete(&self, state: &StateData) {
        tracing::info!(keys = state.len(), "run completed");
    }

    fn on_error(&self, node: &str, error: &GraphError) {
        tracing::error!(node = %node, error = %error, "run failed");
    }
}
