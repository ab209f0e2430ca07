//! Failover state: bounded recovery of the coordination session

use std::time::Duration;

use super::{AttempterState, Context, State, StoppingState};
use crate::config::FailoverConfig;
use crate::coordination::{Session, SessionStatus};
use crate::error::{Error, Result};

/// Exponential reconnect delay with a ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    multiplier: u32,
    max: Duration,
}

impl Backoff {
    /// Create a backoff policy
    pub fn new(base: Duration, multiplier: u32, max: Duration) -> Self {
        Self { base, multiplier, max }
    }

    /// Build the policy from configuration
    pub fn from_config(config: &FailoverConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            config.backoff_multiplier,
            Duration::from_millis(config.backoff_max_ms),
        )
    }

    /// Delay before attempt `attempt` (0-based): `base * multiplier^attempt`, capped
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.multiplier.checked_pow(attempt) {
            Some(factor) => self.base.saturating_mul(factor).min(self.max),
            None => self.max,
        }
    }
}

/// Entered after losing, or never getting, a live session
pub struct FailoverState {
    lost: Option<Box<dyn Session>>,
}

impl FailoverState {
    /// Create a failover state holding the session that was lost, if any
    pub fn new(lost: Option<Box<dyn Session>>) -> Self {
        Self { lost }
    }

    pub(crate) fn into_lost_session(self) -> Option<Box<dyn Session>> {
        self.lost
    }

    async fn release_lost(&mut self) {
        if let Some(mut session) = self.lost.take() {
            session.close().await;
        }
    }

    /// Reconnect until a session is live or the attempt bound runs out.
    ///
    /// A connect call that errors ends the automaton at once; a session that
    /// is not live only uses up one attempt.
    pub async fn transition(mut self, ctx: &Context) -> Result<State> {
        let max_attempts = ctx.config.failover.max_attempts;
        let backoff = Backoff::from_config(&ctx.config.failover);
        let endpoints = &ctx.config.coordination.endpoints;
        tracing::info!("Attempting to re-establish coordination session ({} attempts)", max_attempts);

        for attempt in 0..max_attempts {
            let delay = backoff.delay(attempt);
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    return Ok(State::Stopping(StoppingState::new(self.lost)));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let mut session = match ctx.coordinator.connect(endpoints, ctx.config.connect_timeout()).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::error!(attempt = attempt + 1, "Reconnect failed: {}", e);
                    self.release_lost().await;
                    return Err(e);
                }
            };

            if session.status() != SessionStatus::Live {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    "Reconnected session not live yet, retrying after {:?}",
                    backoff.delay(attempt + 1)
                );
                session.close().await;
                continue;
            }

            self.release_lost().await;
            tracing::info!(session = %session.id(), attempt = attempt + 1, "Coordination session re-established");
            return Ok(State::Attempter(AttempterState::new(session)));
        }

        self.release_lost().await;
        tracing::error!("Giving up after {} reconnect attempts", max_attempts);
        Err(Error::RetryBoundExceeded { attempts: max_attempts })
    }
}
