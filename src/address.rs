use serde::Serialize;
use std::fmt;

// A candidate mailbox: local part plus domain
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Address {
    local_part: String,
    domain: String,
}

impl Address {
    pub fn new(local_part: impl Into<String>, domain: impl Into<String>) -> Self {
        let domain = domain.into();
        Self {
            local_part: local_part.into(),
            domain: normalize_domain(&domain),
        }
    }

    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    // Full `local@domain` form used on the wire
    pub fn email(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// Strip a leading '@' and trailing dot so "@Example.com." and "example.com" compare equal
pub fn normalize_domain(domain: &str) -> String {
    domain
        .trim()
        .trim_start_matches('@')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

/// Why a local part cannot be put on the wire, if it cannot.
///
/// CR/LF would start a new SMTP command, and `<`, `>`, `@` or whitespace
/// would change the path inside `RCPT TO:<...>`.
pub fn local_part_problem(local_part: &str) -> Option<&'static str> {
    if local_part.is_empty() {
        return Some("empty local part");
    }
    if local_part.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Some("whitespace or control character in local part");
    }
    if local_part.contains(['<', '>', '@']) {
        return Some("'<', '>' or '@' in local part");
    }
    None
}

// A unit of work for the probe pool. Identified only by its address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeJob {
    pub address: Address,
    pub verbose: bool,
}

impl ProbeJob {
    pub fn new(address: Address, verbose: bool) -> Self {
        Self { address, verbose }
    }
}

// Build one job per local part at `domain`
pub fn generate_jobs(local_parts: &[String], domain: &str, verbose: bool) -> Vec<ProbeJob> {
    local_parts
        .iter()
        .map(|local| ProbeJob::new(Address::new(local.as_str(), domain), verbose))
        .collect()
}

// Outcome of a single existence check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Exists,
    DoesNotExist,
    /// The server never answered. Counted as non-existent.
    TimedOut,
}

impl Verdict {
    pub fn from_exists(exists: bool) -> Self {
        if exists { Self::Exists } else { Self::DoesNotExist }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exists => write!(f, "EXISTS"),
            Self::DoesNotExist => write!(f, "ABSENT"),
            Self::TimedOut => write!(f, "TIMEOUT"),
        }
    }
}

impl Serialize for Verdict {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

// Result of probing one address, always paired with the address it belongs to
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub address: Address,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub response_time: u128, // milliseconds
}

impl ProbeResult {
    pub fn new(address: Address, verdict: Verdict, response_time: u128) -> Self {
        Self {
            address,
            verdict,
            reason: None,
            response_time,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    // Only a confirmed `Exists` counts. Timeouts never do.
    pub fn exists(&self) -> bool {
        self.verdict == Verdict::Exists
    }
}
