//! Authorization attempt lifecycle.
//!
//! One state machine per attempt:
//! `Idle → IntentCreated → InstrumentAttached → {Succeeded | Processing |
//! AwaitingChallenge | Failed}`. `Processing` and `AwaitingChallenge`
//! route through the status poller; `AwaitingChallenge` goes through
//! the authentication bridge first. The orchestrator enforces at most
//! one non-terminal attempt per payment reference and discards stale
//! responses once an attempt is cancelled or superseded.

use crate::config::Config;
use crate::error::PaymentError;
use crate::models::{
    AuthorizationIntent, AuthorizationStatus, BillingDetails, ChallengeDescriptor,
    InstrumentSelection, PaymentInstrument, StatusSnapshot,
};
use crate::services::challenge::{
    AuthenticationBridge, ChallengeChannel, ChallengeSurface, CheckAfter,
};
use crate::services::gateway::GatewayClient;
use crate::services::outcome::{
    BookingStore, MarkDepositPaid, Navigator, NotificationSink, OutcomeHandler, OutcomeHooks,
    PostSuccessHook, ReconciliationOutbox,
};
use crate::services::poller::StatusPoller;
use anyhow::anyhow;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use validator::Validate;

/// What a caller supplies to start an authorization attempt.
#[derive(Debug, Validate)]
pub struct AuthorizeRequest {
    #[validate(length(min = 1, message = "payment reference must not be empty"))]
    pub reference: String,
    /// Amount in the smallest currency unit.
    #[validate(range(min = 1, message = "amount must be positive"))]
    pub amount: u64,
    #[validate(length(equal = 3, message = "currency must be a three-letter code"))]
    pub currency: String,
    pub instrument: InstrumentSelection,
    #[validate(nested)]
    pub billing: BillingDetails,
}

/// External collaborators the orchestrator talks to. All behind
/// narrow traits; storage, notification delivery, and navigation are
/// out of scope here.
pub struct Collaborators {
    pub booking: Arc<dyn BookingStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub navigator: Arc<dyn Navigator>,
    pub surface: Arc<dyn ChallengeSurface>,
    pub outbox: Arc<dyn ReconciliationOutbox>,
}

/// Registry entry for an in-flight attempt.
struct AttemptHandle {
    id: Uuid,
    token: CancellationToken,
    /// Cancelling this abandons only the step-up challenge, failing the
    /// attempt with `ChallengeAbandoned` rather than silently.
    challenge_abandon: CancellationToken,
}

/// An intent left behind by an instrument-rejected attempt, eligible
/// for reuse by a corrected retry until its reuse window lapses.
struct ParkedIntent {
    intent: AuthorizationIntent,
    parked_at: Instant,
}

/// State owned by exactly one in-flight attempt. Never shared across
/// concurrent attempts for the same reference.
struct AttemptContext {
    reference: String,
    attempt_id: Uuid,
    token: CancellationToken,
    intent: Option<AuthorizationIntent>,
    instrument: Option<PaymentInstrument>,
    challenge: Option<ChallengeDescriptor>,
    started_at: Instant,
}

pub struct Orchestrator {
    gateway: GatewayClient,
    poller: StatusPoller,
    handler: OutcomeHandler,
    surface: Arc<dyn ChallengeSurface>,
    booking: Arc<dyn BookingStore>,
    /// In-flight attempts, keyed by payment reference.
    attempts: DashMap<String, AttemptHandle>,
    /// Intents left reusable by an instrument-rejected attempt, so a
    /// corrected retry attaches to the same intent instead of minting
    /// a duplicate. Entries expire after `intent_reuse_ttl`.
    open_intents: DashMap<String, ParkedIntent>,
    intent_reuse_ttl: Duration,
    challenge_grace: Duration,
}

impl Orchestrator {
    pub fn new(config: Config, collaborators: Collaborators) -> anyhow::Result<Self> {
        let gateway = GatewayClient::new(config.gateway.clone())?;
        let poller = StatusPoller::new(gateway.clone(), config.poll.clone());
        let handler = OutcomeHandler::new(
            collaborators.notifier,
            collaborators.navigator,
            collaborators.outbox,
            config.outcome.failure_redirect_delay,
        );
        Ok(Self {
            gateway,
            poller,
            handler,
            surface: collaborators.surface,
            booking: collaborators.booking,
            attempts: DashMap::new(),
            open_intents: DashMap::new(),
            intent_reuse_ttl: config.gateway.intent_reuse_ttl,
            challenge_grace: config.outcome.challenge_grace,
        })
    }

    /// Authorize a full-amount charge.
    ///
    /// `channel` carries the step-up completion signal if the host has
    /// one (e.g. cross-document messages from an embedded frame); with
    /// `None` the orchestrator falls back to a timed confirming check.
    pub async fn authorize(
        &self,
        request: AuthorizeRequest,
        channel: Option<Box<dyn ChallengeChannel>>,
        hooks: OutcomeHooks,
    ) -> Result<AuthorizationIntent, PaymentError> {
        self.run_attempt(request, channel, hooks, None).await
    }

    /// Authorize a deposit charge. Identical engine; on success the
    /// booking's deposit is additionally marked paid before the success
    /// callback fires.
    pub async fn authorize_deposit(
        &self,
        request: AuthorizeRequest,
        channel: Option<Box<dyn ChallengeChannel>>,
        hooks: OutcomeHooks,
    ) -> Result<AuthorizationIntent, PaymentError> {
        let hook = MarkDepositPaid::new(Arc::clone(&self.booking));
        self.run_attempt(request, channel, hooks, Some(&hook)).await
    }

    /// Cancel the in-flight attempt for `reference`, if any: stops the
    /// poll loop, tears down a presented challenge surface, and makes
    /// any in-flight gateway response a no-op. No callbacks fire for a
    /// cancelled attempt.
    pub fn cancel(&self, reference: &str) -> bool {
        self.open_intents.remove(reference);
        match self.attempts.remove(reference) {
            Some((_, handle)) => {
                tracing::info!(reference, "cancelling authorization attempt");
                handle.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Abandon only the step-up challenge of the in-flight attempt
    /// (payer closed the challenge window). The attempt fails with
    /// `ChallengeAbandoned` and the error callback fires.
    pub fn abandon_challenge(&self, reference: &str) -> bool {
        match self.attempts.get(reference) {
            Some(handle) => {
                handle.challenge_abandon.cancel();
                true
            }
            None => false,
        }
    }

    async fn run_attempt(
        &self,
        request: AuthorizeRequest,
        channel: Option<Box<dyn ChallengeChannel>>,
        hooks: OutcomeHooks,
        post_success: Option<&dyn PostSuccessHook>,
    ) -> Result<AuthorizationIntent, PaymentError> {
        request.validate().map_err(PaymentError::from)?;

        let reference = request.reference.clone();
        let attempt_id = Uuid::new_v4();
        let token = CancellationToken::new();

        match self.attempts.entry(reference.clone()) {
            Entry::Occupied(_) => {
                tracing::warn!(reference = %reference, "attempt already in progress; rejecting");
                return Err(PaymentError::AttemptInProgress(reference));
            }
            Entry::Vacant(slot) => {
                slot.insert(AttemptHandle {
                    id: attempt_id,
                    token: token.clone(),
                    challenge_abandon: CancellationToken::new(),
                });
            }
        }

        tracing::info!(
            reference = %reference,
            attempt_id = %attempt_id,
            amount = request.amount,
            currency = %request.currency,
            kind = ?request.instrument.kind(),
            "starting authorization attempt"
        );

        let mut ctx = AttemptContext {
            reference: reference.clone(),
            attempt_id,
            token,
            intent: None,
            instrument: None,
            challenge: None,
            started_at: Instant::now(),
        };

        let result = self.drive(&request, &mut ctx, channel).await;

        // Stale-response guard: if the attempt was cancelled or
        // superseded while a gateway call was in flight, its outcome
        // must not reach the caller or mutate anything.
        let still_current = self.attempts.get(&reference).map(|h| h.id) == Some(attempt_id);
        if !still_current || ctx.token.is_cancelled() {
            tracing::info!(reference = %reference, attempt_id = %attempt_id, "attempt no longer current; outcome discarded");
            return Err(PaymentError::Cancelled);
        }
        self.attempts.remove(&reference);

        let elapsed_ms = ctx.started_at.elapsed().as_millis() as u64;
        match result {
            Ok(intent) => {
                self.open_intents.remove(&reference);
                tracing::info!(reference = %reference, elapsed_ms, "attempt reached terminal state: succeeded");
                self.handler
                    .success(&reference, &intent, post_success, &hooks)
                    .await;
                Ok(intent)
            }
            Err(err @ PaymentError::InvalidInstrument(_)) => {
                // Not terminal: the intent stays open (see drive) so a
                // retry with corrected details reuses it. No failure
                // navigation; the host re-renders its billing form.
                tracing::info!(reference = %reference, error = %err, "instrument rejected; intent kept for retry");
                hooks.emit_failure(&err);
                Err(err)
            }
            Err(PaymentError::Cancelled) => Err(PaymentError::Cancelled),
            Err(err) => {
                self.open_intents.remove(&reference);
                tracing::warn!(
                    reference = %reference,
                    elapsed_ms,
                    error = %err,
                    instrument_id = ?ctx.instrument.as_ref().map(|i| &i.id),
                    challenge_url = ?ctx.challenge.as_ref().map(|c| &c.url),
                    "attempt reached terminal state: failed"
                );
                self.handler
                    .failure(
                        &reference,
                        ctx.intent.as_ref().map(|i| i.id.as_str()),
                        &err,
                        &hooks,
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        request: &AuthorizeRequest,
        ctx: &mut AttemptContext,
        channel: Option<Box<dyn ChallengeChannel>>,
    ) -> Result<AuthorizationIntent, PaymentError> {
        // Idle -> IntentCreated. Never blind-retried; a retry of a
        // lost-but-delivered create would leave a duplicate intent.
        let mut intent = match self.reusable_intent(request) {
            Some(intent) => intent,
            None => {
                self.gateway
                    .create_intent(request.amount, &request.currency, &request.reference)
                    .await?
            }
        };
        ctx.intent = Some(intent.clone());
        self.ensure_current(ctx)?;

        // IntentCreated -> InstrumentAttached. A rejected instrument
        // leaves the intent reusable; the caller corrects the fields
        // and retries against the same intent.
        let instrument = match self
            .gateway
            .create_instrument(&request.instrument, &request.billing)
            .await
        {
            Ok(instrument) => instrument,
            Err(err @ PaymentError::InvalidInstrument(_)) => {
                self.open_intents.insert(
                    ctx.reference.clone(),
                    ParkedIntent {
                        intent,
                        parked_at: Instant::now(),
                    },
                );
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        ctx.instrument = Some(instrument.clone());
        self.ensure_current(ctx)?;

        // Attach is never retried, not even on a transport error: the
        // request may have been delivered, and a repeat could charge
        // twice.
        let attach = self
            .gateway
            .attach_instrument(&intent.id, &intent.client_secret, &instrument.id)
            .await?;
        self.ensure_current(ctx)?;

        match attach.status {
            AuthorizationStatus::Succeeded => {
                intent.status = AuthorizationStatus::Succeeded;
                Ok(intent)
            }
            AuthorizationStatus::Failed => Err(PaymentError::Declined(
                attach
                    .failure_reason
                    .unwrap_or_else(|| "declined by gateway".to_string()),
            )),
            AuthorizationStatus::Processing => {
                let snapshot = self.poller.poll(&intent, &ctx.token).await?;
                self.ensure_current(ctx)?;
                settle(intent, snapshot)
            }
            AuthorizationStatus::AwaitingChallenge => {
                let challenge = attach.challenge.ok_or_else(|| {
                    PaymentError::GatewayUnavailable(anyhow!(
                        "gateway reported awaiting_challenge without a redirect action"
                    ))
                })?;
                ctx.challenge = Some(challenge.clone());

                let abandon = self
                    .attempts
                    .get(&ctx.reference)
                    .filter(|h| h.id == ctx.attempt_id)
                    .map(|h| h.challenge_abandon.clone())
                    .ok_or(PaymentError::Cancelled)?;
                let bridge = AuthenticationBridge::new(Arc::clone(&self.surface), abandon);
                let mut channel = channel
                    .unwrap_or_else(|| Box::new(CheckAfter::new(self.challenge_grace)));
                bridge
                    .resolve(&challenge, channel.as_mut(), &ctx.token)
                    .await?;
                ctx.challenge = None;
                self.ensure_current(ctx)?;

                let snapshot = self.poller.confirm(&intent, &ctx.token).await?;
                self.ensure_current(ctx)?;
                settle(intent, snapshot)
            }
            AuthorizationStatus::AwaitingInstrument => {
                // Attach accepted but the intent still wants an
                // instrument; nothing sane to do with this attempt.
                Err(PaymentError::GatewayUnavailable(anyhow!(
                    "attach left intent {} awaiting an instrument",
                    intent.id
                )))
            }
        }
    }

    /// Reuse the intent left open by a prior instrument-rejected
    /// attempt for this reference, provided the reuse window has not
    /// lapsed and amount and currency still match. A changed amount
    /// means a different charge and gets a fresh intent.
    fn reusable_intent(&self, request: &AuthorizeRequest) -> Option<AuthorizationIntent> {
        let (_, parked) = self.open_intents.remove(&request.reference)?;
        if parked.parked_at.elapsed() >= self.intent_reuse_ttl {
            tracing::info!(
                reference = %request.reference,
                intent_id = %parked.intent.id,
                "open intent outlived its reuse window; discarding"
            );
            return None;
        }
        let intent = parked.intent;
        if intent.amount == request.amount && intent.currency == request.currency {
            tracing::info!(
                reference = %request.reference,
                intent_id = %intent.id,
                "reusing intent from prior attempt"
            );
            Some(intent)
        } else {
            tracing::info!(
                reference = %request.reference,
                intent_id = %intent.id,
                "charge parameters changed; discarding open intent"
            );
            None
        }
    }

    fn ensure_current(&self, ctx: &AttemptContext) -> Result<(), PaymentError> {
        if ctx.token.is_cancelled() {
            return Err(PaymentError::Cancelled);
        }
        let current = self.attempts.get(&ctx.reference).map(|h| h.id);
        if current == Some(ctx.attempt_id) {
            Ok(())
        } else {
            Err(PaymentError::Cancelled)
        }
    }
}

/// Apply a terminal poll snapshot to the attempt's intent.
fn settle(
    mut intent: AuthorizationIntent,
    snapshot: StatusSnapshot,
) -> Result<AuthorizationIntent, PaymentError> {
    intent.status = snapshot.status;
    intent.failure_reason = snapshot.failure_reason;
    match intent.status {
        AuthorizationStatus::Succeeded => Ok(intent),
        AuthorizationStatus::Failed => Err(PaymentError::Declined(
            intent
                .failure_reason
                .unwrap_or_else(|| "declined by gateway".to_string()),
        )),
        other => Err(PaymentError::GatewayUnavailable(anyhow!(
            "poller returned non-terminal status {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayConfig, OutcomeConfig, PollConfig};
    use crate::services::challenge::NullSurface;
    use crate::services::outcome::{InMemoryOutbox, NullNavigator, NullSink};
    use secrecy::Secret;

    struct NoopBooking;

    #[async_trait::async_trait]
    impl BookingStore for NoopBooking {
        async fn mark_deposit_paid(&self, _reference: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn orchestrator(intent_reuse_ttl: Duration) -> Orchestrator {
        let config = Config {
            gateway: GatewayConfig {
                api_base_url: "https://gateway.test/v1".to_string(),
                key_id: "pk_test".to_string(),
                key_secret: Secret::new("sk_test".to_string()),
                request_timeout: Duration::from_secs(5),
                intent_reuse_ttl,
            },
            poll: PollConfig {
                initial_delay: Duration::from_millis(50),
                interval: Duration::from_millis(50),
                budget: Duration::from_secs(1),
            },
            outcome: OutcomeConfig {
                failure_redirect_delay: Duration::from_millis(50),
                challenge_grace: Duration::from_millis(50),
            },
        };
        Orchestrator::new(
            config,
            Collaborators {
                booking: Arc::new(NoopBooking),
                notifier: Arc::new(NullSink),
                navigator: Arc::new(NullNavigator),
                surface: Arc::new(NullSurface),
                outbox: Arc::new(InMemoryOutbox::new()),
            },
        )
        .unwrap()
    }

    fn wallet_request() -> AuthorizeRequest {
        AuthorizeRequest {
            reference: "R1".to_string(),
            amount: 1000,
            currency: "PHP".to_string(),
            instrument: InstrumentSelection::Wallet(crate::models::InstrumentKind::Gcash),
            billing: BillingDetails {
                name: "Juan dela Cruz".to_string(),
                email: "juan@example.com".to_string(),
                phone: None,
            },
        }
    }

    fn intent(status: AuthorizationStatus) -> AuthorizationIntent {
        AuthorizationIntent {
            id: "pi_1".to_string(),
            client_secret: Secret::new("cs_1".to_string()),
            amount: 1000,
            currency: "PHP".to_string(),
            status,
            failure_reason: None,
        }
    }

    #[test]
    fn settle_maps_failed_to_declined_with_reason() {
        let snapshot = StatusSnapshot {
            status: AuthorizationStatus::Failed,
            failure_reason: Some("insufficient funds".to_string()),
        };
        let err = settle(intent(AuthorizationStatus::Processing), snapshot).unwrap_err();
        match err {
            PaymentError::Declined(reason) => assert_eq!(reason, "insufficient funds"),
            other => panic!("expected Declined, got {other:?}"),
        }
    }

    #[test]
    fn settle_carries_succeeded_status_onto_intent() {
        let snapshot = StatusSnapshot {
            status: AuthorizationStatus::Succeeded,
            failure_reason: None,
        };
        let settled = settle(intent(AuthorizationStatus::Processing), snapshot).unwrap();
        assert_eq!(settled.status, AuthorizationStatus::Succeeded);
    }

    #[test]
    fn parked_intent_is_reused_within_its_window() {
        let orchestrator = orchestrator(Duration::from_secs(60));
        orchestrator.open_intents.insert(
            "R1".to_string(),
            ParkedIntent {
                intent: intent(AuthorizationStatus::AwaitingInstrument),
                parked_at: Instant::now(),
            },
        );

        let reused = orchestrator.reusable_intent(&wallet_request());
        assert_eq!(reused.map(|i| i.id), Some("pi_1".to_string()));
        assert!(orchestrator.open_intents.is_empty());
    }

    #[test]
    fn parked_intent_past_its_window_is_discarded() {
        let orchestrator = orchestrator(Duration::ZERO);
        orchestrator.open_intents.insert(
            "R1".to_string(),
            ParkedIntent {
                intent: intent(AuthorizationStatus::AwaitingInstrument),
                parked_at: Instant::now(),
            },
        );

        assert!(orchestrator.reusable_intent(&wallet_request()).is_none());
        // The stale entry is evicted, not left to accumulate.
        assert!(orchestrator.open_intents.is_empty());
    }

    #[test]
    fn request_validation_rejects_empty_reference_and_zero_amount() {
        let request = AuthorizeRequest {
            reference: String::new(),
            amount: 0,
            currency: "PHP".to_string(),
            instrument: InstrumentSelection::Wallet(crate::models::InstrumentKind::Gcash),
            billing: BillingDetails {
                name: "Juan dela Cruz".to_string(),
                email: "juan@example.com".to_string(),
                phone: None,
            },
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("reference"));
        assert!(errors.field_errors().contains_key("amount"));
    }
}
