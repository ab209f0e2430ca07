//! Loop runner: drives the automaton and instruments every transition

use std::sync::Arc;

use tokio::time::Instant;
use tracing::Instrument;

use super::{Context, State};
use crate::error::Result;
use crate::metrics::Metrics;

/// Replaces the current state with its successor until none remains
pub struct LoopRunner {
    metrics: Arc<Metrics>,
}

impl LoopRunner {
    /// Create a runner publishing to `metrics`
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }

    /// Metrics this runner publishes to
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Run from `initial` until the automaton finishes or a state fails.
    ///
    /// A shutdown request seen between transitions hands the current session
    /// to Stopping, so cancellation always ends in `Ok(())` with the session
    /// closed. State errors come back annotated with the state's name.
    pub async fn run(&self, ctx: &Context, initial: State) -> Result<()> {
        let mut entered = Instant::now();
        let mut state = initial;
        self.metrics.add_current_state(state.name(), 1.0);
        tracing::info!(state = %state, "Automaton started");

        loop {
            if ctx.cancel.is_cancelled() && !state.is_stopping() {
                let prior = state.name();
                let next = state.into_stopping();
                self.record(prior, &next, &mut entered);
                state = next;
                continue;
            }

            let name = state.name();
            match self.step(ctx, state).await {
                Ok(Some(next)) => {
                    self.record(name, &next, &mut entered);
                    state = next;
                }
                Ok(None) => {
                    self.leave(name, entered);
                    tracing::info!("Automaton finished");
                    return Ok(());
                }
                Err(e) => {
                    self.leave(name, entered);
                    tracing::error!(state = name, "Automaton failed: {}", e);
                    return Err(e.in_state(name));
                }
            }
        }
    }

    pub(crate) async fn step(&self, ctx: &Context, state: State) -> Result<Option<State>> {
        let span = tracing::info_span!("state", name = state.name());
        state.transition(ctx).instrument(span).await
    }

    fn record(&self, prior: &'static str, next: &State, entered: &mut Instant) {
        self.leave(prior, *entered);
        self.metrics.add_current_state(next.name(), 1.0);
        self.metrics.record_state_change(prior, next.name());
        *entered = Instant::now();

        if prior != next.name() {
            tracing::info!(from = prior, to = next.name(), "State change");
        } else {
            tracing::debug!(state = prior, "State repeated");
        }
    }

    fn leave(&self, state: &'static str, entered: Instant) {
        self.metrics.add_current_state(state, -1.0);
        self.metrics.observe_time_in_state(state, entered.elapsed().as_secs_f64());
    }
}
