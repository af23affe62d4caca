use async_trait::async_trait;
use tracing::{debug, info};

use crate::address::Address;
use crate::config::SmtpSettings;
use crate::dns::MxResolver;
use crate::error::ProbeError;
use crate::smtp::{SmtpConnection, response_analysis};

/// The SMTP/DNS collaborator the validation engine relies on.
///
/// Implementations answer two questions and classify their own failures:
/// a timeout must be reported as [`ProbeError::Timeout`], anything else as
/// [`ProbeError::Transport`].
#[async_trait]
pub trait MailboxBackend: Send + Sync {
    /// Whether the probe address's domain has a mail exchanger that answers SMTP.
    async fn has_mail_exchange(&self, probe: &Address) -> Result<bool, ProbeError>;

    /// Whether the server accepts `address` as a recipient.
    async fn mailbox_exists(&self, address: &Address) -> Result<bool, ProbeError>;
}

// Live backend: MX lookup followed by an SMTP dialogue ending at RCPT TO
pub struct SmtpBackend {
    resolver: MxResolver,
    settings: SmtpSettings,
}

impl SmtpBackend {
    pub fn new(settings: SmtpSettings) -> Self {
        Self {
            resolver: MxResolver::new(settings.command_timeout),
            settings,
        }
    }

    async fn exchangers(&self, domain: &str) -> Result<Vec<String>, ProbeError> {
        self.resolver.mail_exchangers(domain).await
    }

    // One RCPT TO check against a single host. None means the host gave no usable answer.
    async fn check_recipient(
        &self,
        conn: &mut SmtpConnection,
        address: &Address,
    ) -> Result<Option<bool>, ProbeError> {
        let mail_reply = conn
            .send_command(&format!("MAIL FROM:<{}>", self.settings.from_mail))
            .await?;
        if !response_analysis::is_success(&mail_reply) {
            return Err(ProbeError::Transport(format!(
                "MAIL FROM rejected: {mail_reply}"
            )));
        }

        let rcpt_reply = conn
            .send_command(&format!("RCPT TO:<{address}>"))
            .await?;
        let verdict = if response_analysis::is_valid_user(&rcpt_reply) {
            Some(true)
        } else if response_analysis::is_invalid_user(&rcpt_reply)
            || response_analysis::is_permanent_error(&rcpt_reply)
        {
            Some(false)
        } else if response_analysis::is_temporary_error(&rcpt_reply) {
            debug!(%address, "Temporary RCPT failure (greylisting?): {rcpt_reply}");
            None
        } else {
            debug!(%address, "Unrecognized RCPT reply: {rcpt_reply}");
            None
        };
        let _ = conn.send_command("RSET").await;
        Ok(verdict)
    }
}

#[async_trait]
impl MailboxBackend for SmtpBackend {
    async fn has_mail_exchange(&self, probe: &Address) -> Result<bool, ProbeError> {
        let hosts = self.exchangers(probe.domain()).await?;
        if hosts.is_empty() {
            info!(domain = probe.domain(), "No MX records");
            return Ok(false);
        }

        for host in &hosts {
            match SmtpConnection::connect(host, &self.settings).await {
                Ok(mut conn) => {
                    debug!(
                        %probe,
                        %host,
                        banner = %conn.server_info.banner,
                        tls = conn.server_info.is_tls,
                        extensions = conn.server_info.capabilities.len(),
                        "Mail exchanger answered"
                    );
                    conn.close().await;
                    return Ok(true);
                }
                Err(e) => {
                    debug!(%probe, %host, "Mail exchanger did not answer: {e}");
                }
            }
        }
        Ok(false)
    }

    async fn mailbox_exists(&self, address: &Address) -> Result<bool, ProbeError> {
        let hosts = self.exchangers(address.domain()).await?;
        if hosts.is_empty() {
            return Err(ProbeError::Transport(format!(
                "no mail exchanger for {}",
                address.domain()
            )));
        }

        let mut last_error = None;
        let mut answered = false;
        for host in &hosts {
            let mut conn = match SmtpConnection::connect(host, &self.settings).await {
                Ok(conn) => conn,
                Err(e) => {
                    last_error = Some(ProbeError::from(e));
                    continue;
                }
            };
            let outcome = self.check_recipient(&mut conn, address).await;
            conn.close().await;
            match outcome {
                Ok(Some(exists)) => return Ok(exists),
                Ok(None) => answered = true,
                Err(e) => last_error = Some(e),
            }
        }

        // A server that answered but never committed is not evidence of existence
        if answered {
            return Ok(false);
        }
        Err(last_error.unwrap_or_else(|| ProbeError::Transport("no mail exchanger answered".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    // Accepts one session and answers RCPT TO with `rcpt_reply`
    async fn fake_exchanger(rcpt_reply: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut reader = BufReader::new(read_half);
            write_half.write_all(b"220 mx.test ESMTP\r\n").await.unwrap();
            let mut line = String::new();
            while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
                let cmd = line.trim().to_uppercase();
                line.clear();
                let reply = if cmd.starts_with("EHLO") {
                    "250-mx.test\r\n250 STARTTLS\r\n"
                } else if cmd.starts_with("RCPT TO") {
                    rcpt_reply
                } else if cmd.starts_with("QUIT") {
                    break;
                } else {
                    "250 Ok\r\n"
                };
                if write_half.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
        port
    }

    async fn rcpt_verdict(rcpt_reply: &'static str) -> Option<bool> {
        let port = fake_exchanger(rcpt_reply).await;
        let backend = SmtpBackend::new(SmtpSettings {
            port,
            helo: "probe.test".to_string(),
            command_timeout: Duration::from_secs(5),
            ..SmtpSettings::default()
        });
        let mut conn = SmtpConnection::connect("127.0.0.1", &backend.settings)
            .await
            .unwrap();
        assert!(conn.server_info.supports_tls);
        assert!(!conn.server_info.is_tls);
        assert_eq!(conn.server_info.capabilities.len(), 2);

        let verdict = backend
            .check_recipient(&mut conn, &Address::new("alice", "example.com"))
            .await
            .unwrap();
        conn.close().await;
        verdict
    }

    #[tokio::test]
    async fn accepted_recipient_exists() {
        assert_eq!(rcpt_verdict("250 2.1.5 Ok\r\n").await, Some(true));
    }

    #[tokio::test]
    async fn unknown_user_does_not_exist() {
        assert_eq!(rcpt_verdict("550 5.1.1 User unknown\r\n").await, Some(false));
    }

    #[tokio::test]
    async fn greylisting_is_inconclusive() {
        assert_eq!(
            rcpt_verdict("450 4.2.0 Greylisted, try again later\r\n").await,
            None
        );
    }
}
