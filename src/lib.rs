//! Filters candidate email addresses down to those a domain's mail server
//! confirms, refusing servers that claim every address exists.

pub mod address;
pub mod backend;
pub mod config;
pub mod detector;
pub mod dns;
pub mod error;
pub mod interrupt;
pub mod output;
pub mod pool;
pub mod probe;
pub mod smtp;
pub mod validator;

pub use address::{Address, ProbeJob, ProbeResult, Verdict};
pub use backend::{MailboxBackend, SmtpBackend};
pub use config::{SmtpSettings, TransportErrorPolicy, ValidatorConfig};
pub use error::{ProbeError, Result, ValidatorError};
pub use interrupt::{Interrupt, InterruptHandle};
pub use validator::{BatchReport, Validator};
