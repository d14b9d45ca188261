use secrecy::Secret;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Gateway-side record representing one attempt to charge an amount.
///
/// Created once per attempt; only `status` and `failure_reason` change,
/// and only from responses tied to this intent's id + secret pair.
#[derive(Debug, Clone)]
pub struct AuthorizationIntent {
    pub id: String,
    pub client_secret: Secret<String>,
    /// Amount in the smallest currency unit (e.g. centavos for PHP).
    pub amount: u64,
    pub currency: String,
    pub status: AuthorizationStatus,
    pub failure_reason: Option<String>,
}

/// Authoritative status values returned by the gateway.
///
/// The orchestrator never infers status locally; it only relays and
/// polls these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    AwaitingInstrument,
    AwaitingChallenge,
    Processing,
    Succeeded,
    Failed,
}

impl AuthorizationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthorizationStatus::Succeeded | AuthorizationStatus::Failed
        )
    }
}

/// Funding-source kinds accepted by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Card,
    Gcash,
    GrabPay,
    Maya,
}

/// Billing contact attached to a payment instrument.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BillingDetails {
    #[validate(length(min = 1, message = "billing name must not be empty"))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Raw card fields collected by the host. Wallet kinds carry no
/// details; the payer authenticates inside the wallet's own surface.
///
/// Never logged and never serialized outside the gateway request body.
#[derive(Clone)]
pub struct CardDetails {
    pub number: Secret<String>,
    pub exp_month: u8,
    pub exp_year: u16,
    pub cvc: Secret<String>,
}

impl std::fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardDetails")
            .field("exp_month", &self.exp_month)
            .field("exp_year", &self.exp_year)
            .finish_non_exhaustive()
    }
}

/// What the caller wants to pay with.
#[derive(Debug, Clone)]
pub enum InstrumentSelection {
    Card(CardDetails),
    Wallet(InstrumentKind),
}

impl InstrumentSelection {
    pub fn kind(&self) -> InstrumentKind {
        match self {
            InstrumentSelection::Card(_) => InstrumentKind::Card,
            InstrumentSelection::Wallet(kind) => *kind,
        }
    }
}

/// Tokenized single-use funding source created by the gateway.
/// Attached to exactly one intent; never reused across intents.
#[derive(Debug, Clone)]
pub struct PaymentInstrument {
    pub id: String,
    pub kind: InstrumentKind,
    pub billing: BillingDetails,
}

/// Step-up authentication surface the payer must complete.
/// Ephemeral; exists only between an `AwaitingChallenge` attach
/// response and the challenge's resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeDescriptor {
    pub kind: ChallengeKind,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    Redirect,
}

/// Outcome of attaching an instrument to an intent.
#[derive(Debug, Clone)]
pub struct AttachResult {
    pub status: AuthorizationStatus,
    pub challenge: Option<ChallengeDescriptor>,
    pub failure_reason: Option<String>,
}

/// Point-in-time view of an intent returned by a status check.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub status: AuthorizationStatus,
    pub failure_reason: Option<String>,
}
