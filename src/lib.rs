//! Payment authorization orchestrator.
//!
//! Drives a third-party payment gateway through the full lifecycle of
//! authorizing a charge: intent creation, instrument tokenization and
//! attachment, step-up authentication (3-D Secure style redirects),
//! bounded status polling, and terminal outcome handling. Storage,
//! sessions, UI, and notification delivery stay outside, behind the
//! collaborator traits in [`services::outcome`].
//!
//! The same engine serves full-amount and deposit charges; the deposit
//! variant only adds a post-success bookkeeping hook.

pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::PaymentError;
pub use models::{
    AttachResult, AuthorizationIntent, AuthorizationStatus, BillingDetails, CardDetails,
    ChallengeDescriptor, ChallengeKind, InstrumentKind, InstrumentSelection, PaymentInstrument,
    StatusSnapshot,
};
pub use services::{AuthorizeRequest, Collaborators, Orchestrator, OutcomeHooks};
