//! Pipeline configuration.
//!
//! Defaults match the authority's published limits. Every value can be
//! overridden through a `FISCALCHAIN_*` environment variable.

use std::time::Duration;

use anyhow::{Context, bail};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use fiscalchain_remision::RetryPolicy;

const ENV_PREFIX: &str = "FISCALCHAIN_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Minimum gap between two batch creations of one tenant.
    pub flow_control_seconds: u64,
    pub max_records_per_batch: usize,
    pub max_retries: u32,
    pub retry_backoff_base_seconds: u64,
    pub retry_backoff_ceiling_seconds: u64,
    pub signer_timeout_seconds: u64,
    pub transport_timeout_seconds: u64,
    /// Consecutive transport failures that open the circuit breaker.
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_pause_seconds: u64,
    pub worker_poll_millis: u64,
    pub software_id: String,
    pub software_version: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            flow_control_seconds: 60,
            max_records_per_batch: 1000,
            max_retries: 5,
            retry_backoff_base_seconds: 30,
            retry_backoff_ceiling_seconds: 3600,
            signer_timeout_seconds: 10,
            transport_timeout_seconds: 30,
            circuit_breaker_threshold: 5,
            circuit_breaker_pause_seconds: 300,
            worker_poll_millis: 1000,
            software_id: "fiscalchain".to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ChainConfig {
    /// Defaults overridden by any `FISCALCHAIN_*` variables that are set.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        override_parsed(&lookup, "FLOW_CONTROL_SECONDS", &mut config.flow_control_seconds)?;
        override_parsed(&lookup, "MAX_RECORDS_PER_BATCH", &mut config.max_records_per_batch)?;
        override_parsed(&lookup, "MAX_RETRIES", &mut config.max_retries)?;
        override_parsed(
            &lookup,
            "RETRY_BACKOFF_BASE_SECONDS",
            &mut config.retry_backoff_base_seconds,
        )?;
        override_parsed(
            &lookup,
            "RETRY_BACKOFF_CEILING_SECONDS",
            &mut config.retry_backoff_ceiling_seconds,
        )?;
        override_parsed(&lookup, "SIGNER_TIMEOUT_SECONDS", &mut config.signer_timeout_seconds)?;
        override_parsed(
            &lookup,
            "TRANSPORT_TIMEOUT_SECONDS",
            &mut config.transport_timeout_seconds,
        )?;
        override_parsed(
            &lookup,
            "CIRCUIT_BREAKER_THRESHOLD",
            &mut config.circuit_breaker_threshold,
        )?;
        override_parsed(
            &lookup,
            "CIRCUIT_BREAKER_PAUSE_SECONDS",
            &mut config.circuit_breaker_pause_seconds,
        )?;
        override_parsed(&lookup, "WORKER_POLL_MILLIS", &mut config.worker_poll_millis)?;
        override_parsed(&lookup, "SOFTWARE_ID", &mut config.software_id)?;
        override_parsed(&lookup, "SOFTWARE_VERSION", &mut config.software_version)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_records_per_batch == 0 {
            bail!("max_records_per_batch must be at least 1");
        }
        if self.retry_backoff_base_seconds == 0 {
            bail!("retry_backoff_base_seconds must be at least 1");
        }
        if self.retry_backoff_ceiling_seconds < self.retry_backoff_base_seconds {
            bail!(
                "retry_backoff_ceiling_seconds ({}) is below retry_backoff_base_seconds ({})",
                self.retry_backoff_ceiling_seconds,
                self.retry_backoff_base_seconds
            );
        }
        if self.signer_timeout_seconds == 0 || self.transport_timeout_seconds == 0 {
            bail!("collaborator timeouts must be at least 1 second");
        }
        if self.circuit_breaker_threshold == 0 {
            bail!("circuit_breaker_threshold must be at least 1");
        }
        if self.worker_poll_millis == 0 {
            bail!("worker_poll_millis must be at least 1");
        }
        if self.software_id.trim().is_empty() {
            bail!("software_id must not be empty");
        }
        // Every seconds value must fit a chrono delta.
        for (name, secs) in [
            ("flow_control_seconds", self.flow_control_seconds),
            ("circuit_breaker_pause_seconds", self.circuit_breaker_pause_seconds),
            ("retry_backoff_ceiling_seconds", self.retry_backoff_ceiling_seconds),
        ] {
            seconds_delta(secs).with_context(|| format!("{name} is out of range"))?;
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_retries,
            Duration::from_secs(self.retry_backoff_base_seconds),
            Duration::from_secs(self.retry_backoff_ceiling_seconds),
        )
    }

    pub fn flow_control(&self) -> TimeDelta {
        seconds_delta(self.flow_control_seconds).unwrap_or(TimeDelta::MAX)
    }

    pub fn circuit_breaker_pause(&self) -> TimeDelta {
        seconds_delta(self.circuit_breaker_pause_seconds).unwrap_or(TimeDelta::MAX)
    }

    pub fn signer_timeout(&self) -> Duration {
        Duration::from_secs(self.signer_timeout_seconds)
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_secs(self.transport_timeout_seconds)
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_millis)
    }
}

fn seconds_delta(secs: u64) -> anyhow::Result<TimeDelta> {
    let secs = i64::try_from(secs).context("seconds overflow i64")?;
    TimeDelta::try_seconds(secs).context("seconds overflow a time delta")
}

fn override_parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    suffix: &str,
    target: &mut T,
) -> anyhow::Result<()>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let key = format!("{ENV_PREFIX}{suffix}");
    if let Some(raw) = lookup(&key) {
        *target = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}"))?;
    }
    Ok(())
}
