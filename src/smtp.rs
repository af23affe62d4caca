use std::io::{self, ErrorKind};
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

use crate::config::SmtpSettings;

// --- Global Crypto Provider Setup ---
// Install the desired provider ONCE globally
static CRYPTO_PROVIDER_INSTALLATION: OnceLock<Result<(), rustls::Error>> = OnceLock::new();

fn install_crypto_provider() -> Result<(), rustls::Error> {
    CRYPTO_PROVIDER_INSTALLATION
        .get_or_init(|| {
            let provider = rustls::crypto::aws_lc_rs::default_provider();
            match provider.install_default() {
                Ok(()) => debug!("Installed default rustls crypto provider (aws-lc-rs)"),
                Err(current_provider) => {
                    debug!("Default crypto provider already installed: {current_provider:?}");
                }
            }
            Ok(())
        })
        .clone()
}

// Greeting and capabilities the server advertised
#[derive(Clone, Debug, Default)]
pub struct ServerInfo {
    pub banner: String,
    pub capabilities: Vec<String>,
    pub supports_tls: bool,
    pub is_tls: bool,
}

enum StreamType {
    Plain(BufStream<TcpStream>),
    Tls(Box<BufStream<tokio_rustls::client::TlsStream<TcpStream>>>),
}

impl AsyncRead for StreamType {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

// Reads go straight through the BufStream so no buffered bytes are lost between replies
impl AsyncBufRead for StreamType {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_fill_buf(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_fill_buf(cx),
        }
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).consume(amt),
            Self::Tls(s) => Pin::new(s.as_mut()).consume(amt),
        }
    }
}

impl AsyncWrite for StreamType {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

// A single SMTP session with one mail exchanger
pub struct SmtpConnection {
    stream: StreamType,
    pub server_info: ServerInfo,
    host: String,
    command_timeout: Duration,
}

impl SmtpConnection {
    // Connect, read the banner, greet, and upgrade with STARTTLS when requested and offered
    pub async fn connect(host: &str, settings: &SmtpSettings) -> io::Result<Self> {
        let host = host.trim_end_matches('.');
        let timeout_duration = settings.command_timeout;
        debug!(host, port = settings.port, "Opening SMTP connection");

        let tcp_stream = match timeout(timeout_duration, TcpStream::connect((host, settings.port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(io::Error::new(
                    ErrorKind::TimedOut,
                    "TCP Connection timed out",
                ));
            }
        };
        tcp_stream.set_nodelay(true)?;

        let mut buffered_plain = BufStream::new(tcp_stream);

        let banner = Self::read_multiline_response(&mut buffered_plain, timeout_duration).await?;
        let banner = banner.join("\n");
        if !response_analysis::is_success(&banner) {
            return Err(io::Error::new(
                ErrorKind::ConnectionRefused,
                format!("Server refused session: {}", first_line(&banner)),
            ));
        }

        let mut server_info = ServerInfo {
            banner,
            ..ServerInfo::default()
        };

        let mut capabilities =
            Self::send_ehlo(&mut buffered_plain, &settings.helo, timeout_duration).await?;
        if capabilities.is_empty() || !capabilities[0].starts_with("250") {
            capabilities =
                Self::send_helo(&mut buffered_plain, &settings.helo, timeout_duration).await?;
        }
        server_info.supports_tls = capabilities
            .iter()
            .any(|c| c.to_uppercase().contains("STARTTLS"));

        let stream = if settings.starttls && server_info.supports_tls {
            let (tls_stream, tls_caps) =
                Self::try_starttls_upgrade(buffered_plain, host, settings).await?;
            capabilities = tls_caps;
            server_info.is_tls = true;
            tls_stream
        } else {
            if settings.starttls {
                warn!(host, "STARTTLS requested but not offered, continuing in plaintext");
            }
            StreamType::Plain(buffered_plain)
        };
        server_info.capabilities = capabilities;

        Ok(Self {
            stream,
            server_info,
            host: host.to_string(),
            command_timeout: timeout_duration,
        })
    }

    fn build_tls_config(danger_skip_verify: bool) -> io::Result<ClientConfig> {
        install_crypto_provider()
            .map_err(|e| io::Error::other(format!("Crypto provider error: {e}")))?;

        let builder = ClientConfig::builder();

        let config = if danger_skip_verify {
            debug!("Skipping TLS certificate verification");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::NoCertificateVerification {}))
                .with_no_client_auth()
        } else {
            let platform_verifier = rustls_platform_verifier::Verifier::new();
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(platform_verifier))
                .with_no_client_auth()
        };
        Ok(config)
    }

    async fn try_starttls_upgrade(
        // Takes ownership of the plain stream
        mut buffered_plain: BufStream<TcpStream>,
        host: &str,
        settings: &SmtpSettings,
    ) -> io::Result<(StreamType, Vec<String>)> {
        let timeout_duration = settings.command_timeout;
        debug!(host, "Attempting STARTTLS upgrade");

        buffered_plain.write_all(b"STARTTLS\r\n").await?;
        buffered_plain.flush().await?;

        let reply = Self::read_multiline_response(&mut buffered_plain, timeout_duration).await?;
        if !reply.first().is_some_and(|l| l.starts_with("220")) {
            return Err(io::Error::other(format!(
                "Unexpected STARTTLS response: {}",
                reply.join(" ")
            )));
        }

        let tls_config = Self::build_tls_config(!settings.tls_verify)?;
        let connector = TlsConnector::from(Arc::new(tls_config));
        let server_name = ServerName::try_from(host.to_string()).map_err(|e| {
            io::Error::new(
                ErrorKind::InvalidInput,
                format!("Invalid DNS name '{host}': {e}"),
            )
        })?;
        let plain_tcp_stream = buffered_plain.into_inner();

        let tls_stream = match timeout(
            timeout_duration,
            connector.connect(server_name, plain_tcp_stream),
        )
        .await
        {
            Ok(Ok(tls_stream)) => tls_stream,
            Ok(Err(e)) => {
                return Err(io::Error::new(
                    ErrorKind::ConnectionAborted,
                    format!("TLS handshake error: {e}"),
                ));
            }
            Err(_) => {
                return Err(io::Error::new(
                    ErrorKind::TimedOut,
                    "TLS handshake timed out",
                ));
            }
        };

        let mut buffered_tls = BufStream::new(tls_stream);
        let tls_capabilities =
            Self::send_ehlo(&mut buffered_tls, &settings.helo, timeout_duration).await?;
        if tls_capabilities.is_empty() || !tls_capabilities[0].starts_with("250") {
            return Err(io::Error::other(
                "EHLO command failed after successful TLS handshake",
            ));
        }
        debug!(host, "STARTTLS handshake successful");
        Ok((StreamType::Tls(Box::new(buffered_tls)), tls_capabilities))
    }

    async fn send_ehlo<S>(
        stream: &mut S,
        helo_domain: &str,
        timeout_duration: Duration,
    ) -> io::Result<Vec<String>>
    where
        S: AsyncBufRead + AsyncWrite + Unpin,
    {
        debug!("Sending: EHLO {helo_domain}");
        let ehlo_cmd = format!("EHLO {helo_domain}\r\n");
        stream.write_all(ehlo_cmd.as_bytes()).await?;
        stream.flush().await?;
        Self::read_multiline_response(stream, timeout_duration).await
    }

    async fn send_helo<S>(
        stream: &mut S,
        helo_domain: &str,
        timeout_duration: Duration,
    ) -> io::Result<Vec<String>>
    where
        S: AsyncBufRead + AsyncWrite + Unpin,
    {
        debug!("Sending: HELO {helo_domain}");
        let helo_cmd = format!("HELO {helo_domain}\r\n");
        stream.write_all(helo_cmd.as_bytes()).await?;
        stream.flush().await?;
        Self::read_multiline_response(stream, timeout_duration).await
    }

    // Read one reply, following "250-" continuation lines up to the final "250 " line
    async fn read_multiline_response<S>(
        stream: &mut S,
        timeout_duration: Duration,
    ) -> io::Result<Vec<String>>
    where
        S: AsyncBufRead + Unpin,
    {
        let mut lines = Vec::new();
        let mut line_buffer = String::new();

        loop {
            line_buffer.clear();
            match timeout(timeout_duration, stream.read_line(&mut line_buffer)).await {
                Ok(Ok(0)) => {
                    if lines.is_empty() {
                        return Err(io::Error::new(
                            ErrorKind::ConnectionAborted,
                            "Connection closed before response",
                        ));
                    }
                    break;
                }
                Ok(Ok(_)) => {
                    let trimmed_line = line_buffer.trim();
                    if trimmed_line.is_empty() {
                        continue;
                    }
                    lines.push(trimmed_line.to_string());
                    if is_final_line(trimmed_line) {
                        break;
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(io::Error::new(
                        ErrorKind::TimedOut,
                        "Timed out reading response",
                    ));
                }
            }
        }
        debug!("Received: {lines:?}");
        Ok(lines)
    }

    // Send a command and return the full reply joined by newlines
    pub async fn send_command(&mut self, command: &str) -> io::Result<String> {
        let command = command.trim_end();
        // One command per call: an embedded line break would smuggle in another
        if command.contains(['\r', '\n']) {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "SMTP command contains a line break",
            ));
        }
        let started = Instant::now();
        let cmd_with_crlf = format!("{command}\r\n");
        debug!(host = %self.host, "Sending Command: {command}");

        match timeout(self.command_timeout, async {
            self.stream.write_all(cmd_with_crlf.as_bytes()).await?;
            self.stream.flush().await
        })
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(io::Error::new(
                    ErrorKind::TimedOut,
                    "Timeout writing command",
                ));
            }
        }

        let lines = Self::read_multiline_response(&mut self.stream, self.command_timeout).await?;
        debug!(
            host = %self.host,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Reply: {}",
            lines.first().map_or("<empty>", String::as_str)
        );
        Ok(lines.join("\n"))
    }

    // Gracefully close the connection. Errors are ignored, the session is over either way.
    pub async fn close(&mut self) {
        let quit_future = async {
            self.stream.write_all(b"QUIT\r\n").await?;
            self.stream.flush().await
        };
        if let Ok(Err(e)) = timeout(Duration::from_secs(5), quit_future).await {
            debug!(host = %self.host, "Error sending QUIT: {e}");
        }
        let _ = timeout(Duration::from_secs(5), self.stream.shutdown()).await;
    }
}

// A reply line is final when the 3-digit code is followed by a space (or nothing)
fn is_final_line(line: &str) -> bool {
    let bytes = line.as_bytes();
    bytes.len() >= 3
        && bytes[..3].iter().all(u8::is_ascii_digit)
        && (bytes.len() == 3 || bytes[3] == b' ')
}

fn first_line(response: &str) -> &str {
    response.lines().next().unwrap_or(response)
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::verify_tls12_signature;
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoCertificateVerification {}

    impl ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        // Signatures are still checked
        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            verify_tls12_signature(
                message,
                cert,
                dss,
                &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            rustls::crypto::verify_tls13_signature(
                message,
                cert,
                dss,
                &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::aws_lc_rs::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}

// Utility functions for classifying SMTP replies
pub mod response_analysis {
    fn has_code(response: &str, class: char) -> bool {
        response.starts_with(class)
            && response.len() >= 3
            && response.chars().take(3).all(|c| c.is_ascii_digit())
    }

    // 5xx
    pub fn is_permanent_error(response: &str) -> bool {
        has_code(response, '5')
    }

    // 4xx
    pub fn is_temporary_error(response: &str) -> bool {
        has_code(response, '4')
    }

    // 2xx
    pub fn is_success(response: &str) -> bool {
        has_code(response, '2')
    }

    // Reply to RCPT TO that means the mailbox is not there
    pub fn is_invalid_user(response: &str) -> bool {
        let lower = response.to_lowercase();
        response.starts_with("550")
            || response.starts_with("551") // User not local; please try <forward-path>
            || response.starts_with("553") // Mailbox name not allowed
            || lower.contains("user unknown")
            || lower.contains("recipient rejected")
            || lower.contains("recipient address rejected")
            || lower.contains("no such user")
            || lower.contains("invalid mailbox")
            || lower.contains("mailbox unavailable")
            || lower.contains("does not exist")
            || lower.contains("address invalid")
    }

    // Reply to RCPT TO that accepts the mailbox
    pub fn is_valid_user(response: &str) -> bool {
        response.starts_with("250") || response.starts_with("251") // 251 User not local; will forward
    }
}
