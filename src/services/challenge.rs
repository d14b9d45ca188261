//! Step-up authentication bridge.
//!
//! Presents the challenge surface (3-D Secure redirect or embedded
//! frame) and waits for a "challenge resolved" event. The event source
//! is abstracted: a cross-document message listener and a timed polling
//! fallback are two implementations of the same channel trait.

use crate::error::PaymentError;
use crate::models::ChallengeDescriptor;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Payload the challenge frame posts back when the payer finishes.
pub const CHALLENGE_COMPLETE_SENTINEL: &str = "3DS-authentication-complete";

/// How a challenge ended, as seen by the event source.
///
/// `Completed` only means the payer finished the surface; the actual
/// authorization result still comes from a confirming status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeResolution {
    Completed,
    Abandoned,
}

/// Source of the "challenge resolved" event.
#[async_trait]
pub trait ChallengeChannel: Send {
    async fn resolved(&mut self) -> ChallengeResolution;
}

/// Host-page integration for showing and removing the challenge
/// surface (embedded frame or full-page redirect).
#[async_trait]
pub trait ChallengeSurface: Send + Sync {
    async fn present(&self, challenge: &ChallengeDescriptor);
    async fn teardown(&self);
}

/// Surface for hosts with nothing to render (batch jobs, tests).
pub struct NullSurface;

#[async_trait]
impl ChallengeSurface for NullSurface {
    async fn present(&self, challenge: &ChallengeDescriptor) {
        tracing::debug!(url = %challenge.url, "challenge presented (null surface)");
    }

    async fn teardown(&self) {}
}

/// Completion signal carried by cross-document messages. Messages that
/// do not match the agreed sentinel payload are ignored; a closed
/// sender means the surface went away without completing.
pub struct MessageChannel {
    rx: mpsc::Receiver<String>,
    sentinel: String,
}

impl MessageChannel {
    pub fn new(rx: mpsc::Receiver<String>, sentinel: impl Into<String>) -> Self {
        Self {
            rx,
            sentinel: sentinel.into(),
        }
    }
}

#[async_trait]
impl ChallengeChannel for MessageChannel {
    async fn resolved(&mut self) -> ChallengeResolution {
        while let Some(message) = self.rx.recv().await {
            if message == self.sentinel {
                return ChallengeResolution::Completed;
            }
            tracing::debug!(message = %message, "ignoring non-sentinel challenge message");
        }
        ChallengeResolution::Abandoned
    }
}

/// Polling fallback for surfaces that emit no explicit signal: wait a
/// grace period, then let the lifecycle run its confirming check.
pub struct CheckAfter {
    grace: Duration,
}

impl CheckAfter {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }
}

#[async_trait]
impl ChallengeChannel for CheckAfter {
    async fn resolved(&mut self) -> ChallengeResolution {
        tokio::time::sleep(self.grace).await;
        ChallengeResolution::Completed
    }
}

/// Drives one attempt's step-up sub-flow.
pub struct AuthenticationBridge {
    surface: Arc<dyn ChallengeSurface>,
    abandon: CancellationToken,
}

impl AuthenticationBridge {
    pub fn new(surface: Arc<dyn ChallengeSurface>, abandon: CancellationToken) -> Self {
        Self { surface, abandon }
    }

    /// Cancel the challenge on behalf of the payer (e.g. the host saw
    /// the challenge window close). The attempt fails with
    /// `ChallengeAbandoned`.
    pub fn cancel(&self) {
        self.abandon.cancel();
    }

    /// Token the host can hold to cancel the challenge later.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.abandon.clone()
    }

    /// Present the challenge and wait for it to resolve. The surface is
    /// torn down on every exit path, including cancellation.
    pub async fn resolve(
        &self,
        challenge: &ChallengeDescriptor,
        channel: &mut dyn ChallengeChannel,
        attempt: &CancellationToken,
    ) -> Result<(), PaymentError> {
        tracing::info!(url = %challenge.url, "presenting step-up challenge");
        self.surface.present(challenge).await;

        let result = tokio::select! {
            _ = attempt.cancelled() => Err(PaymentError::Cancelled),
            _ = self.abandon.cancelled() => {
                tracing::info!("step-up challenge cancelled by payer");
                Err(PaymentError::ChallengeAbandoned)
            }
            resolution = channel.resolved() => match resolution {
                ChallengeResolution::Completed => Ok(()),
                ChallengeResolution::Abandoned => {
                    tracing::info!("challenge surface closed without completing");
                    Err(PaymentError::ChallengeAbandoned)
                }
            },
        };

        self.surface.teardown().await;
        result
    }
}
