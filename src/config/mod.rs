use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::Secret;
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub poll: PollConfig,
    pub outcome: OutcomeConfig,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub api_base_url: String,
    pub key_id: String,
    pub key_secret: Secret<String>,
    /// Per-request timeout, distinct from the polling budget.
    pub request_timeout: Duration,
    /// How long an intent parked by a rejected instrument stays
    /// reusable before a retry mints a fresh one.
    pub intent_reuse_ttl: Duration,
}

#[derive(Clone, Debug)]
pub struct PollConfig {
    /// Delay before the first status check after attach reports `processing`.
    pub initial_delay: Duration,
    /// Constant interval between checks. The gateway settles in seconds,
    /// not milliseconds, so exponential backoff buys nothing here.
    pub interval: Duration,
    /// Overall wall-clock budget before the attempt fails with `Timeout`.
    pub budget: Duration,
}

#[derive(Clone, Debug)]
pub struct OutcomeConfig {
    /// How long the failure message stays on screen before the host is
    /// asked to navigate to the failure page.
    pub failure_redirect_delay: Duration,
    /// Grace period the polling-fallback challenge channel waits before
    /// triggering the confirming status check.
    pub challenge_grace: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let api_base_url = env::var("GATEWAY_API_BASE_URL")
            .context("GATEWAY_API_BASE_URL must be set")?;
        let key_id = env::var("GATEWAY_KEY_ID").context("GATEWAY_KEY_ID must be set")?;
        let key_secret =
            env::var("GATEWAY_KEY_SECRET").context("GATEWAY_KEY_SECRET must be set")?;

        Ok(Self {
            gateway: GatewayConfig {
                api_base_url,
                key_id,
                key_secret: Secret::new(key_secret),
                request_timeout: duration_env("GATEWAY_REQUEST_TIMEOUT_SECS", 20)?,
                intent_reuse_ttl: duration_env("GATEWAY_INTENT_REUSE_TTL_SECS", 900)?,
            },
            poll: PollConfig {
                initial_delay: duration_env("POLL_INITIAL_DELAY_SECS", 2)?,
                interval: duration_env("POLL_INTERVAL_SECS", 2)?,
                budget: duration_env("POLL_BUDGET_SECS", 90)?,
            },
            outcome: OutcomeConfig {
                failure_redirect_delay: duration_env("FAILURE_REDIRECT_DELAY_SECS", 2)?,
                challenge_grace: duration_env("CHALLENGE_GRACE_SECS", 5)?,
            },
        })
    }
}

fn duration_env(key: &str, default_secs: u64) -> Result<Duration> {
    let secs = match env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{} must be an integer number of seconds", key))?,
        Err(_) => default_secs,
    };
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_env_falls_back_to_default() {
        let d = duration_env("NO_SUCH_ORCHESTRATOR_VAR", 7).unwrap();
        assert_eq!(d, Duration::from_secs(7));
    }
}
