pub mod challenge;
pub mod gateway;
pub mod lifecycle;
pub mod outcome;
pub mod poller;

pub use challenge::{
    AuthenticationBridge, ChallengeChannel, ChallengeResolution, ChallengeSurface, CheckAfter,
    MessageChannel, NullSurface, CHALLENGE_COMPLETE_SENTINEL,
};
pub use gateway::GatewayClient;
pub use lifecycle::{AuthorizeRequest, Collaborators, Orchestrator};
pub use outcome::{
    BookingStore, DiscrepancyKind, InMemoryOutbox, MarkDepositPaid, Navigator, NotificationSink,
    NullNavigator, NullSink, OutcomeHandler, OutcomeHooks, PostSuccessHook, ReconciliationEntry,
    ReconciliationOutbox,
};
pub use poller::StatusPoller;
