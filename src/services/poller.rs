//! Bounded status polling.
//!
//! Repeated `check_status` reads on a constant interval while an
//! attempt sits in an indeterminate state. Terminates on a terminal
//! gateway status, on cancellation, or when the wall-clock budget runs
//! out. Transient gateway outages are swallowed; the next tick still
//! happens under the same budget.

use crate::config::PollConfig;
use crate::error::PaymentError;
use crate::models::{AuthorizationIntent, StatusSnapshot};
use crate::services::gateway::GatewayClient;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct StatusPoller {
    gateway: GatewayClient,
    config: PollConfig,
}

impl StatusPoller {
    pub fn new(gateway: GatewayClient, config: PollConfig) -> Self {
        Self { gateway, config }
    }

    /// Poll until the intent reaches a terminal status. First check
    /// after the configured initial delay.
    pub async fn poll(
        &self,
        intent: &AuthorizationIntent,
        token: &CancellationToken,
    ) -> Result<StatusSnapshot, PaymentError> {
        self.run(intent, token, self.config.initial_delay).await
    }

    /// Single-entry confirming poll used after a challenge resolves:
    /// the first check runs immediately, then the normal cadence
    /// applies if the gateway is still processing.
    pub async fn confirm(
        &self,
        intent: &AuthorizationIntent,
        token: &CancellationToken,
    ) -> Result<StatusSnapshot, PaymentError> {
        self.run(intent, token, Duration::ZERO).await
    }

    async fn run(
        &self,
        intent: &AuthorizationIntent,
        token: &CancellationToken,
        initial_delay: Duration,
    ) -> Result<StatusSnapshot, PaymentError> {
        let started = Instant::now();
        let deadline = started + self.config.budget;
        let mut next_tick = started + initial_delay;
        let mut checks: u32 = 0;

        loop {
            if next_tick > deadline {
                // The charge may still resolve on the gateway side after
                // we give up; this ambiguity is surfaced to reconciliation
                // by the caller, not treated as a clean decline.
                tracing::warn!(
                    intent_id = %intent.id,
                    checks,
                    budget_secs = self.config.budget.as_secs(),
                    "polling budget exhausted without a terminal status"
                );
                return Err(PaymentError::Timeout);
            }

            tokio::select! {
                _ = token.cancelled() => return Err(PaymentError::Cancelled),
                _ = sleep_until(next_tick) => {}
            }

            let result = tokio::select! {
                _ = token.cancelled() => return Err(PaymentError::Cancelled),
                r = self.gateway.check_status(&intent.id, &intent.client_secret) => r,
            };
            checks += 1;

            match result {
                Ok(snapshot) if snapshot.status.is_terminal() => {
                    tracing::info!(
                        intent_id = %intent.id,
                        status = ?snapshot.status,
                        checks,
                        "poll reached terminal status"
                    );
                    return Ok(snapshot);
                }
                Ok(snapshot) => {
                    tracing::debug!(
                        intent_id = %intent.id,
                        status = ?snapshot.status,
                        checks,
                        "intent still settling"
                    );
                }
                Err(err) if err.is_transient() => {
                    tracing::warn!(
                        intent_id = %intent.id,
                        error = %err,
                        "transient gateway failure during poll; will retry on next tick"
                    );
                }
                Err(err) => return Err(err),
            }

            next_tick += self.config.interval;
        }
    }
}
