use clap::ValueEnum;
use colored::Colorize;
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::address::{ProbeResult, Verdict};
use crate::validator::BatchReport;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    /// Verified addresses, one per line
    #[default]
    Standard,
    /// JSON document with every probe result
    Json,
    /// CSV rows with every probe result
    Csv,
}

/// Live verdict line for one probed address, written to stderr.
pub fn print_probe_verdict(result: &ProbeResult) {
    match result.verdict {
        Verdict::Exists => eprintln!("{} {} exists", "[+]".green().bold(), result.address),
        Verdict::DoesNotExist => {
            eprintln!("{} {} does not exist", "[-]".red().bold(), result.address);
        }
        Verdict::TimedOut => eprintln!(
            "{} Timed out validating {}",
            "[!]".yellow().bold(),
            result.address
        ),
    }
}

// Progress message about the server check
pub fn print_status(msg: &str, ok: bool) {
    let indicator = if ok {
        "[*]".blue().bold()
    } else {
        "[!]".yellow().bold()
    };
    eprintln!("{indicator} {msg}");
}

// Line printed above the progress bar when an address is confirmed
pub fn format_found(result: &ProbeResult) -> String {
    format!(
        "{} {:<30} {}ms",
        "[SUCC]".green().bold(),
        result.address.to_string().green(),
        result.response_time
    )
}

fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn csv_rows(report: &BatchReport) -> String {
    let mut out = String::from("email,verdict,reason,response_time_ms\n");
    for result in &report.results {
        out.push_str(&format!(
            "{},{},{},{}\n",
            csv_field(&result.address.to_string()),
            result.verdict,
            csv_field(result.reason.as_deref().unwrap_or("")),
            result.response_time
        ));
    }
    out
}

fn plain_lines(report: &BatchReport) -> String {
    report
        .existing()
        .iter()
        .map(|address| format!("{address}\n"))
        .collect()
}

#[derive(Clone, Debug)]
pub struct OutputHandler {
    pub format: OutputFormat,
    is_color: bool,
}

impl OutputHandler {
    pub fn new(format: OutputFormat, is_color: bool) -> Self {
        // Structured formats go to pipes and files, never colorize them
        colored::control::set_override(is_color && format == OutputFormat::Standard);
        Self { format, is_color }
    }

    pub fn print_banner(&self) {
        let version = env!("CARGO_PKG_VERSION");

        if self.is_color {
            eprintln!(
                "{} v{}",
                "mailbadger".cyan().bold(),
                version.green().bold()
            );
            eprintln!(
                "{}",
                "Catch-all aware SMTP mailbox verification".dimmed()
            );
        } else {
            eprintln!("mailbadger v{version}");
            eprintln!("Catch-all aware SMTP mailbox verification");
        }
        eprintln!();
    }

    pub fn print_target_info(&self, domain: &str, port: u16, candidates: usize, workers: usize) {
        let label_width = 15;
        let separator_len = label_width + 25;
        let separator = "-".repeat(separator_len).dimmed();

        eprintln!("{separator}");
        let title = "Target Configuration";
        let centered_title = format!("{title:^separator_len$}");
        eprintln!("{}", centered_title.bold());
        eprintln!("{separator}");

        eprintln!(
            "{:<width$}: {}",
            "Domain",
            domain.cyan(),
            width = label_width
        );
        eprintln!("{:<width$}: {}", "SMTP Port", port, width = label_width);
        eprintln!(
            "{:<width$}: {}",
            "Candidates",
            candidates,
            width = label_width
        );
        eprintln!("{:<width$}: {}", "Workers", workers, width = label_width);

        eprintln!("{separator}");
        eprintln!();
    }

    pub fn print_server_verdict(&self, domain: &str, trusted: bool) {
        if trusted {
            eprintln!(
                "{} Mail server for {} can be used for validation",
                "[+]".green().bold(),
                domain.bold()
            );
        } else {
            eprintln!(
                "{} Mail server for {} is missing or accepts every address",
                "[-]".red().bold(),
                domain.bold()
            );
        }
    }

    pub fn print_statistics(&self, report: &BatchReport) {
        let count = |verdict: Verdict| report.results.iter().filter(|r| r.verdict == verdict).count();
        let exists = count(Verdict::Exists);
        let absent = count(Verdict::DoesNotExist);
        let timed_out = count(Verdict::TimedOut);

        eprintln!();
        let separator = "-".repeat(60);
        eprintln!("{}", separator.dimmed());
        eprintln!(
            "{} {} {} | {} {} | {} {} | {} {}",
            "STATS".bold(),
            "Total:".bold(),
            report.results.len().to_string().bold(),
            "Exists:".green().bold(),
            exists.to_string().green().bold(),
            "Absent:".red().bold(),
            absent.to_string().red(),
            "Timeout:".yellow().bold(),
            timed_out.to_string().yellow()
        );
        eprintln!("{}", separator.dimmed());
        eprintln!();
    }

    /// Render the report in the selected format.
    pub fn render(&self, report: &BatchReport) -> Result<String, serde_json::Error> {
        match self.format {
            OutputFormat::Standard => Ok(plain_lines(report)),
            OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string_pretty(report)?)),
            OutputFormat::Csv => Ok(csv_rows(report)),
        }
    }

    // Verified addresses (or the whole report) to stdout
    pub fn print_verified(&self, report: &BatchReport) -> Result<(), serde_json::Error> {
        print!("{}", self.render(report)?);
        Ok(())
    }

    pub async fn save_results_to_file(&self, report: &BatchReport, path: &Path) -> io::Result<()> {
        let rendered = self.render(report).map_err(io::Error::other)?;
        let mut file = File::create(path).await?;
        file.write_all(rendered.as_bytes()).await?;
        file.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;

    fn report() -> BatchReport {
        BatchReport {
            domain: "example.com".to_string(),
            trusted: true,
            results: vec![
                ProbeResult::new(Address::new("alice", "example.com"), Verdict::Exists, 40),
                ProbeResult::new(Address::new("bob", "example.com"), Verdict::DoesNotExist, 35)
                    .with_reason("transport error: connection reset"),
                ProbeResult::new(Address::new("carol", "example.com"), Verdict::TimedOut, 3000),
            ],
        }
    }

    #[test]
    fn plain_output_lists_only_verified_addresses() {
        let handler = OutputHandler::new(OutputFormat::Standard, false);
        assert_eq!(handler.render(&report()).unwrap(), "alice@example.com\n");
    }

    #[test]
    fn json_output_carries_every_result() {
        let handler = OutputHandler::new(OutputFormat::Json, false);
        let rendered = handler.render(&report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["domain"], "example.com");
        assert_eq!(value["trusted"], true);
        assert_eq!(value["results"].as_array().unwrap().len(), 3);
        assert_eq!(value["results"][2]["verdict"], "TIMEOUT");
    }

    #[test]
    fn csv_output_quotes_reasons() {
        let handler = OutputHandler::new(OutputFormat::Csv, false);
        let rendered = handler.render(&report()).unwrap();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "email,verdict,reason,response_time_ms");
        assert_eq!(
            lines[2],
            "\"bob@example.com\",ABSENT,\"transport error: connection reset\",35"
        );
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn csv_email_column_survives_commas_and_quotes() {
        let handler = OutputHandler::new(OutputFormat::Csv, false);
        let report = BatchReport {
            domain: "example.com".to_string(),
            trusted: true,
            results: vec![ProbeResult::new(
                Address::new("o\"neil,jr", "example.com"),
                Verdict::Exists,
                7,
            )],
        };
        let rendered = handler.render(&report).unwrap();
        assert_eq!(
            rendered.lines().nth(1),
            Some("\"o\"\"neil,jr@example.com\",EXISTS,\"\",7")
        );
    }

    #[tokio::test]
    async fn results_saved_to_file() {
        let path = std::env::temp_dir().join(format!("mailbadger-out-{}.txt", std::process::id()));
        let handler = OutputHandler::new(OutputFormat::Standard, false);
        handler.save_results_to_file(&report(), &path).await.unwrap();
        let saved = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(saved, "alice@example.com\n");
        let _ = tokio::fs::remove_file(&path).await;
    }
}
