use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use mailbadger::config::{SmtpSettings, TransportErrorPolicy, ValidatorConfig, default_helo_domain};
use mailbadger::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Catch-all aware SMTP mailbox verification",
    long_about = "Filters candidate email addresses down to those the domain's mail server confirms. \
                  Servers that claim every address exists are detected with decoy probes and refused."
)]
pub struct Cli {
    /// Domain whose mail server is queried
    #[arg(help = "Mail domain to validate addresses against (e.g., example.com)")]
    pub domain: String,

    /// Local parts to check
    #[arg(
        short,
        long,
        help = "Single local part, comma-separated list, or path to a wordlist"
    )]
    pub users: Option<String>,

    /// Only check whether the domain's mail server can be trusted
    #[arg(long)]
    pub check_server: bool,

    // Engine Settings
    /// Number of concurrent probe workers (defaults to available parallelism)
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,

    /// Per-probe timeout in seconds
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// Deadline for a whole batch of probes in seconds
    #[arg(long, default_value = "600")]
    pub deadline: u64,

    /// What to do when a probe fails for a reason other than a timeout
    #[arg(long = "transport-errors", value_enum, default_value = "degrade")]
    pub transport_errors: TransportErrorPolicy,

    // Connection Settings
    /// SMTP port of the mail exchangers
    #[arg(long, default_value = "25")]
    pub port: u16,

    /// HELO/EHLO domain (defaults to the local hostname)
    #[arg(short = 'l', long)]
    pub helo: Option<String>,

    /// Sender email address for MAIL FROM
    #[arg(short = 'f', long, default_value = "verify-probe@example.com")]
    pub from_mail: String,

    /// Upgrade with STARTTLS when the server offers it
    #[arg(short = 's', long)]
    pub starttls: bool,

    // Enables TLS certificate verification
    #[arg(long = "tls-verify", default_value = "false", action=clap::ArgAction::SetTrue)]
    pub tls_verify: bool,

    /// Timeout for connecting and for each SMTP command in seconds
    #[arg(long, default_value = "10")]
    pub command_timeout: u64,

    // Output and Display Options
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "standard")]
    pub output: OutputFormat,

    /// Output file for results
    #[arg(long)]
    pub output_file: Option<PathBuf>,

    /// Print every probe verdict and server check step
    #[arg(short, long)]
    pub verbose: bool,

    /// Colorful output (disable for logging to files)
    #[arg(short = 'C', long="no-color", default_value = "true", action=clap::ArgAction::SetFalse)]
    pub is_color: bool,
}

impl Cli {
    pub fn validator_config(&self) -> ValidatorConfig {
        let defaults = ValidatorConfig::default();
        ValidatorConfig {
            workers: self.concurrency.unwrap_or(defaults.workers),
            probe_timeout: Duration::from_secs(self.timeout),
            global_deadline: Duration::from_secs(self.deadline),
            verbose: self.verbose,
            transport_error_policy: self.transport_errors,
        }
    }

    pub fn smtp_settings(&self) -> SmtpSettings {
        SmtpSettings {
            port: self.port,
            helo: self.helo.clone().unwrap_or_else(default_helo_domain),
            from_mail: self.from_mail.clone(),
            starttls: self.starttls,
            tls_verify: self.tls_verify,
            command_timeout: Duration::from_secs(self.command_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_map_to_engine_config() {
        let cli = Cli::parse_from(["mailbadger", "example.com", "-u", "alice,bob"]);
        assert_eq!(cli.domain, "example.com");
        assert!(!cli.check_server);

        let config = cli.validator_config();
        assert!(config.workers >= 1);
        assert_eq!(config.probe_timeout, Duration::from_secs(30));
        assert_eq!(config.global_deadline, Duration::from_secs(600));
        assert_eq!(config.transport_error_policy, TransportErrorPolicy::Degrade);

        let smtp = cli.smtp_settings();
        assert_eq!(smtp.port, 25);
        assert!(!smtp.starttls);
        assert!(!smtp.helo.is_empty());
    }

    #[test]
    fn explicit_flags_override_defaults() {
        let cli = Cli::parse_from([
            "mailbadger",
            "example.com",
            "--check-server",
            "-c",
            "3",
            "--timeout",
            "5",
            "--transport-errors",
            "abort",
            "--port",
            "2525",
            "--helo",
            "probe.example.org",
            "-o",
            "json",
            "-C",
        ]);
        assert!(cli.check_server);
        assert!(!cli.is_color);
        assert_eq!(cli.output, OutputFormat::Json);

        let config = cli.validator_config();
        assert_eq!(config.workers, 3);
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.transport_error_policy, TransportErrorPolicy::Abort);

        let smtp = cli.smtp_settings();
        assert_eq!(smtp.port, 2525);
        assert_eq!(smtp.helo, "probe.example.org");
    }
}
