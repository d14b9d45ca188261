#![allow(dead_code)]

use async_trait::async_trait;
use payment_orchestrator::config::{Config, GatewayConfig, OutcomeConfig, PollConfig};
use payment_orchestrator::services::outcome::{
    BookingStore, InMemoryOutbox, Navigator, NotificationSink,
};
use payment_orchestrator::services::NullSurface;
use payment_orchestrator::{
    AuthorizeRequest, BillingDetails, CardDetails, Collaborators, InstrumentKind,
    InstrumentSelection, Orchestrator,
};
use secrecy::Secret;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use wiremock::MockServer;

static TRACING: Once = Once::new();

/// Install the test log subscriber once per binary. Quiet by default;
/// `RUST_LOG=debug cargo test` turns the orchestrator's tracing on.
pub fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

pub const INTENT_ID: &str = "pi_test_1";
pub const CLIENT_SECRET: &str = "cs_test_1";
pub const INSTRUMENT_ID: &str = "pm_test_1";

/// Booking store that records calls and can be told to fail.
pub struct RecordingBookingStore {
    pub calls: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl RecordingBookingStore {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn references(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BookingStore for RecordingBookingStore {
    async fn mark_deposit_paid(&self, reference: &str) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(reference.to_string());
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("booking store unavailable");
        }
        Ok(())
    }
}

pub struct RecordingNavigator {
    pub destinations: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self {
            destinations: Mutex::new(Vec::new()),
        }
    }

    pub fn visited(&self) -> Vec<String> {
        self.destinations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Navigator for RecordingNavigator {
    async fn to_failure_page(&self, reference: &str) {
        self.destinations.lock().unwrap().push(reference.to_string());
    }
}

pub struct RecordingSink {
    pub events: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn outcomes(&self) -> Vec<(String, String)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, reference: &str, outcome: &str) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((reference.to_string(), outcome.to_string()));
        Ok(())
    }
}

pub struct TestHarness {
    pub gateway: MockServer,
    pub orchestrator: Arc<Orchestrator>,
    pub booking: Arc<RecordingBookingStore>,
    pub navigator: Arc<RecordingNavigator>,
    pub sink: Arc<RecordingSink>,
    pub outbox: Arc<InMemoryOutbox>,
}

impl TestHarness {
    pub async fn spawn() -> Self {
        init_tracing();
        let gateway = MockServer::start().await;
        let config = test_config(&gateway.uri());

        let booking = Arc::new(RecordingBookingStore::new());
        let navigator = Arc::new(RecordingNavigator::new());
        let sink = Arc::new(RecordingSink::new());
        let outbox = Arc::new(InMemoryOutbox::new());

        let orchestrator = Arc::new(
            Orchestrator::new(
                config,
                Collaborators {
                    booking: booking.clone(),
                    notifier: sink.clone(),
                    navigator: navigator.clone(),
                    surface: Arc::new(NullSurface),
                    outbox: outbox.clone(),
                },
            )
            .expect("orchestrator should build"),
        );

        Self {
            gateway,
            orchestrator,
            booking,
            navigator,
            sink,
            outbox,
        }
    }
}

/// Config with millisecond-scale timings so polls and redirects settle
/// within a test run.
pub fn test_config(base_url: &str) -> Config {
    Config {
        gateway: GatewayConfig {
            api_base_url: base_url.to_string(),
            key_id: "pk_test_1".to_string(),
            key_secret: Secret::new("sk_test_1".to_string()),
            request_timeout: Duration::from_secs(5),
            intent_reuse_ttl: Duration::from_secs(60),
        },
        poll: PollConfig {
            initial_delay: Duration::from_millis(50),
            interval: Duration::from_millis(50),
            budget: Duration::from_secs(3),
        },
        outcome: OutcomeConfig {
            failure_redirect_delay: Duration::from_millis(50),
            challenge_grace: Duration::from_millis(100),
        },
    }
}

pub fn card_request(reference: &str) -> AuthorizeRequest {
    AuthorizeRequest {
        reference: reference.to_string(),
        amount: 1000,
        currency: "PHP".to_string(),
        instrument: InstrumentSelection::Card(CardDetails {
            number: Secret::new("4242424242424242".to_string()),
            exp_month: 12,
            exp_year: 2030,
            cvc: Secret::new("123".to_string()),
        }),
        billing: billing(),
    }
}

pub fn wallet_request(reference: &str) -> AuthorizeRequest {
    AuthorizeRequest {
        reference: reference.to_string(),
        amount: 1000,
        currency: "PHP".to_string(),
        instrument: InstrumentSelection::Wallet(InstrumentKind::Gcash),
        billing: billing(),
    }
}

pub fn billing() -> BillingDetails {
    BillingDetails {
        name: "Juan dela Cruz".to_string(),
        email: "juan@example.com".to_string(),
        phone: Some("+639170000000".to_string()),
    }
}

pub fn intent_body() -> Value {
    json!({
        "id": INTENT_ID,
        "client_secret": CLIENT_SECRET,
        "status": "awaiting_instrument",
    })
}

pub fn instrument_body() -> Value {
    json!({ "id": INSTRUMENT_ID })
}

pub fn attach_body(status: &str) -> Value {
    json!({ "status": status })
}

pub fn attach_challenge_body(url: &str) -> Value {
    json!({
        "status": "awaiting_challenge",
        "next_action": { "redirect": { "url": url } },
    })
}

pub fn attach_failed_body(reason: &str) -> Value {
    json!({
        "status": "failed",
        "last_error": { "code": "card_declined", "message": reason },
    })
}

pub fn status_body(status: &str) -> Value {
    json!({ "status": status })
}

pub fn status_failed_body(reason: &str) -> Value {
    json!({
        "status": "failed",
        "last_error": { "code": "card_declined", "message": reason },
    })
}

pub fn gateway_error_body(code: &str, message: &str) -> Value {
    json!({ "error": { "code": code, "message": message } })
}
