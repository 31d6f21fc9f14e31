//! Invoke entry points: drive a run to its terminal outcome

use super::graph::CompiledGraph;
use crate::config::RunConfig;
use crate::error::{GraphError, Result};
use crate::stream::{RunEvent, RunOutcome};
use futures::StreamExt;
use trellis_checkpoint::StateData;

impl CompiledGraph {
    /// Execute the graph to quiescence with default configuration
    ///
    /// The simplest way to run: supply the initial state, get the outcome.
    /// For thread ids, checkpoint pins or resumption use
    /// [`invoke_with_config`](Self::invoke_with_config).
    pub async fn invoke(&self, input: StateData) -> Result<RunOutcome> {
        self.invoke_with_config(input, RunConfig::new()).await
    }

    /// Execute the graph under a run configuration
    ///
    /// Internally drives [`stream`](Self::stream) to its end and returns
    /// either the final state or the interruption the run suspended on.
    /// Streaming branch results are dropped here; use `stream` directly to
    /// consume them.
    #[tracing::instrument(skip(self, input, config), fields(thread = %config.thread()))]
    pub async fn invoke_with_config(
        &self,
        input: StateData,
        config: RunConfig,
    ) -> Result<RunOutcome> {
        let mut events = self.stream(input, config);
        let mut final_state: Option<StateData> = None;

        while let Some(event) = events.next().await {
            match event? {
                RunEvent::Step(step) => {
                    if step.is_final {
                        final_state = Some(step.state);
                    }
                }
                RunEvent::Interrupted(interruption) => {
                    return Ok(RunOutcome::Suspended(interruption));
                }
            }
        }

        final_state.map(RunOutcome::Complete).ok_or_else(|| {
            GraphError::Configuration("run ended without reaching a final step".to_string())
        })
    }

    /// Resume a suspended run
    ///
    /// Loads the thread's stored checkpoint and re-enters the paused node.
    /// The configuration must carry a decision for every pending item (see
    /// [`RunConfig::with_decision`]).
    pub async fn resume(&self, config: RunConfig) -> Result<RunOutcome> {
        self.invoke_with_config(StateData::new(), config.resuming())
            .await
    }
}
