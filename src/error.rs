use thiserror::Error;

/// Errors surfaced by the authorization flow.
///
/// Every gateway-call failure is classified at the `GatewayClient`
/// boundary; raw transport errors never reach callers.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Invalid request: {0}")]
    InvalidRequest(anyhow::Error),

    #[error("Instrument rejected by gateway: {0}")]
    InvalidInstrument(anyhow::Error),

    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(anyhow::Error),

    #[error("Authorization intent expired or secret mismatched")]
    IntentExpired,

    #[error("Charge declined by gateway: {0}")]
    Declined(String),

    #[error("Step-up challenge abandoned by payer")]
    ChallengeAbandoned,

    #[error("Status polling budget exhausted without a terminal status")]
    Timeout,

    #[error("An authorization attempt is already in progress for reference {0}")]
    AttemptInProgress(String),

    #[error("Authorization attempt was cancelled")]
    Cancelled,
}

impl PaymentError {
    /// Transient errors may be retried inside the poller's budget;
    /// everything else is final for the current attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, PaymentError::GatewayUnavailable(_))
    }

    /// Whether this error ends the attempt (as opposed to leaving the
    /// intent reusable for a corrected retry).
    pub fn is_terminal_failure(&self) -> bool {
        !matches!(
            self,
            PaymentError::InvalidInstrument(_) | PaymentError::AttemptInProgress(_)
        )
    }

    /// Short machine-readable code used in logs and notifications.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::InvalidRequest(_) => "invalid_request",
            PaymentError::InvalidInstrument(_) => "invalid_instrument",
            PaymentError::GatewayUnavailable(_) => "gateway_unavailable",
            PaymentError::IntentExpired => "intent_expired",
            PaymentError::Declined(_) => "declined",
            PaymentError::ChallengeAbandoned => "challenge_abandoned",
            PaymentError::Timeout => "timeout",
            PaymentError::AttemptInProgress(_) => "attempt_in_progress",
            PaymentError::Cancelled => "cancelled",
        }
    }
}

impl From<validator::ValidationErrors> for PaymentError {
    fn from(err: validator::ValidationErrors) -> Self {
        PaymentError::InvalidRequest(anyhow::Error::new(err))
    }
}
