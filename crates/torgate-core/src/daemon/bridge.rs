//! Bridge line parsing
//!
//! Bridge text comes from the user as free text, one bridge per line. Each
//! line names its pluggable transport as the first token, optionally after a
//! `Bridge` keyword:
//!
//! ```text
//! obfs4 1.2.3.4:443 FINGERPRINT cert=... iat-mode=0
//! Bridge obfs4 5.6.7.8:9001 FINGERPRINT cert=... iat-mode=0
//! # comments and blank lines are ignored
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pluggable transports the daemon can be configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    /// obfs4 obfuscation
    Obfs4,
    /// Domain-fronted meek
    MeekLite,
    /// HTTPS/WebSocket tunnel
    Webtunnel,
    /// WebRTC volunteer proxies
    Snowflake,
}

impl TransportType {
    /// All supported transports
    pub const ALL: [TransportType; 4] = [
        TransportType::Obfs4,
        TransportType::MeekLite,
        TransportType::Webtunnel,
        TransportType::Snowflake,
    ];

    /// Keyword used in bridge lines and config directives
    pub fn keyword(&self) -> &'static str {
        match self {
            TransportType::Obfs4 => "obfs4",
            TransportType::MeekLite => "meek_lite",
            TransportType::Webtunnel => "webtunnel",
            TransportType::Snowflake => "snowflake",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for TransportType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TransportType::ALL
            .into_iter()
            .find(|t| t.keyword().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnsupportedTransport(s.to_string()))
    }
}

/// Parsed bridge set: one transport, one or more bridge lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeSet {
    /// Transport shared by every line
    pub transport: TransportType,
    /// Bridge lines without the transport keyword
    /// (`<addr:port> <fingerprint> [args...]`)
    pub lines: Vec<String>,
}

impl BridgeSet {
    /// Lines in `<transport> <line>` form, as the user would paste them
    pub fn to_text(&self) -> String {
        self.lines
            .iter()
            .map(|line| format!("{} {}", self.transport, line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Parse free-form bridge text
///
/// Fails if no bridge line is present, a line names an unknown transport,
/// a line has no address after the transport, or lines mix transports.
pub fn parse_bridges(text: &str) -> Result<BridgeSet> {
    let mut transport: Option<TransportType> = None;
    let mut lines = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut tokens = line.split_whitespace().peekable();
        if tokens
            .peek()
            .is_some_and(|t| t.eq_ignore_ascii_case("bridge"))
        {
            tokens.next();
        }

        let Some(keyword) = tokens.next() else {
            return Err(Error::Bridge(format!("line {}: empty bridge line", idx + 1)));
        };
        let line_transport: TransportType = keyword.parse()?;

        let rest: Vec<&str> = tokens.collect();
        if rest.is_empty() {
            return Err(Error::Bridge(format!(
                "line {}: missing bridge address after '{keyword}'",
                idx + 1
            )));
        }

        match transport {
            None => transport = Some(line_transport),
            Some(t) if t != line_transport => {
                return Err(Error::Bridge(format!(
                    "line {}: mixed transports '{t}' and '{line_transport}'",
                    idx + 1
                )));
            }
            Some(_) => {}
        }
        lines.push(rest.join(" "));
    }

    match transport {
        Some(transport) => Ok(BridgeSet { transport, lines }),
        None => Err(Error::Bridge("no bridge lines given".into())),
    }
}
