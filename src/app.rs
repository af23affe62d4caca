use colored::Colorize;
use std::sync::Arc;

use mailbadger::backend::{MailboxBackend, SmtpBackend};
use mailbadger::error::{Result, ValidatorError};
use mailbadger::interrupt::{Interrupt, spawn_ctrl_c_listener};
use mailbadger::output::{OutputFormat, OutputHandler};
use mailbadger::validator::Validator;

use crate::cli::Cli;
use crate::input::{InputSource, local_parts_for};

pub const EXIT_TRUSTED: u8 = 0;
pub const EXIT_UNTRUSTED: u8 = 1;

pub struct App {
    cli: Cli,
    output_handler: OutputHandler,
}

impl App {
    pub fn new(cli: Cli) -> Self {
        let output_handler = OutputHandler::new(cli.output, cli.is_color);
        Self {
            cli,
            output_handler,
        }
    }

    // Main application execution. Returns the process exit code on success.
    pub async fn run(&self) -> Result<u8> {
        let (handle, interrupt) = Interrupt::channel();
        spawn_ctrl_c_listener(handle);

        self.output_handler.print_banner();

        if self.cli.port != 25 && !self.cli.starttls {
            eprintln!(
                "{} Non-standard port {} without STARTTLS. Proceed with caution.",
                "[>]".bold().yellow(),
                self.cli.port.to_string().bold().yellow(),
            );
        }

        let backend: Arc<dyn MailboxBackend> = Arc::new(SmtpBackend::new(self.cli.smtp_settings()));
        let validator = Validator::new(backend, self.cli.validator_config())?
            .with_interrupt(interrupt.clone())
            .with_progress_bar(self.cli.output == OutputFormat::Standard);

        if self.cli.check_server {
            let trusted = validator.validate_server(&self.cli.domain).await?;
            self.output_handler
                .print_server_verdict(&self.cli.domain, trusted);
            return Ok(if trusted { EXIT_TRUSTED } else { EXIT_UNTRUSTED });
        }

        let local_parts = self.load_local_parts(&interrupt).await?;
        self.output_handler.print_target_info(
            &self.cli.domain,
            self.cli.port,
            local_parts.len(),
            validator.config().workers,
        );

        let report = validator
            .validate_addresses_detailed(&local_parts, &self.cli.domain)
            .await?;
        self.output_handler
            .print_server_verdict(&report.domain, report.trusted);
        if report.trusted && self.cli.output == OutputFormat::Standard {
            self.output_handler.print_statistics(&report);
        }

        self.output_handler.print_verified(&report)?;
        if let Some(path) = &self.cli.output_file {
            self.output_handler
                .save_results_to_file(&report, path)
                .await?;
            eprintln!(
                "{} Results saved to {}",
                "[+]".green().bold(),
                path.display()
            );
        }

        Ok(if report.trusted {
            EXIT_TRUSTED
        } else {
            EXIT_UNTRUSTED
        })
    }

    // Load local parts off the runtime threads (interruptible point)
    async fn load_local_parts(&self, interrupt: &Interrupt) -> Result<Vec<String>> {
        let Some(users) = self.cli.users.clone() else {
            return Err(ValidatorError::Config(
                "--users is required unless --check-server is given".to_string(),
            ));
        };

        let values = tokio::select! {
            biased;
            () = interrupt.triggered() => return Err(ValidatorError::Interrupted),
            res = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<String>> {
                InputSource::new(&users)?.load_values()
            }) => {
                match res {
                    Ok(values) => values?,
                    Err(e) => return Err(ValidatorError::Io(std::io::Error::other(format!(
                        "loading local parts panicked: {e}"
                    )))),
                }
            }
        };

        let local_parts = local_parts_for(values, &self.cli.domain);
        if local_parts.is_empty() {
            return Err(ValidatorError::Config(
                "no local parts to validate".to_string(),
            ));
        }
        Ok(local_parts)
    }
}
