use clap::ValueEnum;
use std::time::Duration;

use crate::error::{Result, ValidatorError};

// What to do when a probe fails for a reason other than a timeout
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, ValueEnum)]
pub enum TransportErrorPolicy {
    /// Record the address as non-existent and log a warning
    #[default]
    Degrade,
    /// Fail the whole batch
    Abort,
}

/// Settings for the validation engine.
#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    /// Number of concurrent probe workers per batch.
    pub workers: usize,
    /// Upper bound on a single mailbox probe. Elapsing counts as "does not exist".
    pub probe_timeout: Duration,
    /// Upper bound on a whole batch. Elapsing fails the batch.
    pub global_deadline: Duration,
    pub verbose: bool,
    pub transport_error_policy: TransportErrorPolicy,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map_or(4, |n| n.get())
                .max(1),
            probe_timeout: Duration::from_secs(30),
            global_deadline: Duration::from_secs(600),
            verbose: false,
            transport_error_policy: TransportErrorPolicy::Degrade,
        }
    }
}

impl ValidatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ValidatorError::Config(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(ValidatorError::Config(
                "probe timeout must be greater than zero".to_string(),
            ));
        }
        if self.global_deadline.is_zero() {
            return Err(ValidatorError::Config(
                "global deadline must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection parameters for the SMTP backend.
#[derive(Clone, Debug)]
pub struct SmtpSettings {
    pub port: u16,
    pub helo: String,
    pub from_mail: String,
    pub starttls: bool,
    pub tls_verify: bool,
    pub command_timeout: Duration,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            port: 25,
            helo: default_helo_domain(),
            from_mail: "verify-probe@example.com".to_string(),
            starttls: false,
            tls_verify: false,
            command_timeout: Duration::from_secs(10),
        }
    }
}

// Local hostname, or a fixed fallback when it cannot be read
pub fn default_helo_domain() -> String {
    hostname::get().map_or_else(
        |_| "mailbadger.local".to_string(),
        |h| h.to_string_lossy().to_string(),
    )
}
