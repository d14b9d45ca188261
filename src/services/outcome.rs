//! Terminal-state handling.
//!
//! Maps a finished attempt onto caller-visible effects: success and
//! failure callbacks, the post-success bookkeeping hook, best-effort
//! notification, and the delayed redirect to the failure page.

use crate::error::PaymentError;
use crate::models::AuthorizationIntent;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Booking collaborator. External to the orchestrator; only consulted
/// after a successful deposit charge.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn mark_deposit_paid(&self, reference: &str) -> anyhow::Result<()>;
}

/// Fire-and-forget notification delivery. Failures are logged and
/// swallowed; a missed notification never changes a payment outcome.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, reference: &str, outcome: &str) -> anyhow::Result<()>;
}

/// Host navigation, used to land the payer on the failure page keyed
/// by the payment reference.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn to_failure_page(&self, reference: &str);
}

pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn notify(&self, _reference: &str, _outcome: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct NullNavigator;

#[async_trait]
impl Navigator for NullNavigator {
    async fn to_failure_page(&self, reference: &str) {
        tracing::debug!(reference, "failure navigation skipped (null navigator)");
    }
}

/// Post-success bookkeeping strategy. The full-amount and deposit
/// variants share one engine; only this hook differs.
#[async_trait]
pub trait PostSuccessHook: Send + Sync {
    async fn run(&self, reference: &str) -> anyhow::Result<()>;
}

/// Deposit variant: flag the booking's deposit as paid.
pub struct MarkDepositPaid {
    store: Arc<dyn BookingStore>,
}

impl MarkDepositPaid {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PostSuccessHook for MarkDepositPaid {
    async fn run(&self, reference: &str) -> anyhow::Result<()> {
        self.store.mark_deposit_paid(reference).await
    }
}

/// Why an attempt was handed to reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscrepancyKind {
    /// The charge went through but the deposit bookkeeping write failed.
    DepositMarkFailed,
    /// Polling gave up; the gateway may still settle the charge later.
    PollTimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationEntry {
    pub reference: String,
    pub intent_id: String,
    pub kind: DiscrepancyKind,
}

/// Outbox for payment/bookkeeping divergences. A reconciliation worker
/// drains it out-of-band; the orchestrator only records.
pub trait ReconciliationOutbox: Send + Sync {
    fn record(&self, entry: ReconciliationEntry);
}

/// Mutex-guarded in-memory outbox. Suitable for hosts that drain it
/// within the same process.
#[derive(Default)]
pub struct InMemoryOutbox {
    entries: Mutex<Vec<ReconciliationEntry>>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<ReconciliationEntry> {
        std::mem::take(&mut *self.entries.lock().expect("outbox lock poisoned"))
    }
}

impl ReconciliationOutbox for InMemoryOutbox {
    fn record(&self, entry: ReconciliationEntry) {
        tracing::error!(
            reference = %entry.reference,
            intent_id = %entry.intent_id,
            kind = ?entry.kind,
            "recorded reconciliation entry"
        );
        self.entries.lock().expect("outbox lock poisoned").push(entry);
    }
}

type SuccessCallback = Box<dyn Fn(&AuthorizationIntent) + Send + Sync>;
type FailureCallback = Box<dyn Fn(&PaymentError) + Send + Sync>;

/// Caller callbacks for the terminal outcome. Both optional; hosts
/// that only care about the returned `Result` can pass
/// `OutcomeHooks::default()`.
#[derive(Default)]
pub struct OutcomeHooks {
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
}

impl OutcomeHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, f: impl Fn(&AuthorizationIntent) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_failure(mut self, f: impl Fn(&PaymentError) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }

    pub(crate) fn emit_success(&self, intent: &AuthorizationIntent) {
        if let Some(on_success) = &self.on_success {
            on_success(intent);
        }
    }

    pub(crate) fn emit_failure(&self, error: &PaymentError) {
        if let Some(on_failure) = &self.on_failure {
            on_failure(error);
        }
    }
}

pub struct OutcomeHandler {
    notifier: Arc<dyn NotificationSink>,
    navigator: Arc<dyn Navigator>,
    outbox: Arc<dyn ReconciliationOutbox>,
    redirect_delay: Duration,
}

impl OutcomeHandler {
    pub fn new(
        notifier: Arc<dyn NotificationSink>,
        navigator: Arc<dyn Navigator>,
        outbox: Arc<dyn ReconciliationOutbox>,
        redirect_delay: Duration,
    ) -> Self {
        Self {
            notifier,
            navigator,
            outbox,
            redirect_delay,
        }
    }

    /// Resolve a successful attempt. The post-success hook runs first;
    /// if it fails the payment is still reported successful — the
    /// charge already happened and must not be reported failed because
    /// a bookkeeping write did not land. The divergence goes to the
    /// reconciliation outbox instead.
    pub async fn success(
        &self,
        reference: &str,
        intent: &AuthorizationIntent,
        post_success: Option<&dyn PostSuccessHook>,
        hooks: &OutcomeHooks,
    ) {
        if let Some(hook) = post_success {
            if let Err(err) = hook.run(reference).await {
                tracing::error!(
                    reference,
                    intent_id = %intent.id,
                    error = %err,
                    "post-success bookkeeping failed; payment still reported successful"
                );
                self.outbox.record(ReconciliationEntry {
                    reference: reference.to_string(),
                    intent_id: intent.id.clone(),
                    kind: DiscrepancyKind::DepositMarkFailed,
                });
            }
        }

        tracing::info!(reference, intent_id = %intent.id, "authorization succeeded");
        hooks.emit_success(intent);
        self.notify(reference, "succeeded").await;
    }

    /// Resolve a failed attempt: error callback immediately, then after
    /// the configured delay (so the message can render) navigate to the
    /// failure page keyed by the payment reference.
    pub async fn failure(
        &self,
        reference: &str,
        intent_id: Option<&str>,
        error: &PaymentError,
        hooks: &OutcomeHooks,
    ) {
        tracing::warn!(reference, error = %error, code = error.code(), "authorization failed");

        if matches!(error, PaymentError::Timeout) {
            self.outbox.record(ReconciliationEntry {
                reference: reference.to_string(),
                intent_id: intent_id.unwrap_or_default().to_string(),
                kind: DiscrepancyKind::PollTimedOut,
            });
        }

        hooks.emit_failure(error);
        self.notify(reference, error.code()).await;

        let navigator = Arc::clone(&self.navigator);
        let reference = reference.to_string();
        let delay = self.redirect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            navigator.to_failure_page(&reference).await;
        });
    }

    async fn notify(&self, reference: &str, outcome: &str) {
        if let Err(err) = self.notifier.notify(reference, outcome).await {
            tracing::warn!(reference, outcome, error = %err, "notification delivery failed");
        }
    }
}
