//! HTTP/1.1 proxy request parsing and rewriting

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{Error, Result};

/// Maximum total size of the request line plus headers (64 KiB)
pub const DEFAULT_MAX_HEADER_SIZE: usize = 64 * 1024;

/// Largest request body forwarded for a POST (16 MiB)
pub const DEFAULT_MAX_BODY_SIZE: u64 = 16 * 1024 * 1024;

/// Parsed request line and header block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method, upper-cased
    pub method: String,
    /// Request target as sent (authority for CONNECT, absolute URL otherwise)
    pub target: String,
    /// HTTP version token
    pub version: String,
    /// Headers in arrival order
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parse a request line such as `GET http://a.com/ HTTP/1.1`
    pub fn parse_request_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Protocol(format!("malformed request line: {:?}", line.trim())));
        };

        if !version.starts_with("HTTP/") {
            return Err(Error::Protocol(format!("unsupported protocol version: {version}")));
        }

        Ok(Self {
            method: method.to_ascii_uppercase(),
            target: target.to_string(),
            version: version.to_string(),
            headers: Vec::new(),
        })
    }

    /// First header value with the given name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parsed `Content-Length`, if present
    pub fn content_length(&self) -> Result<Option<u64>> {
        self.header("Content-Length")
            .map(|v| {
                v.trim()
                    .parse::<u64>()
                    .map_err(|_| Error::Protocol(format!("invalid Content-Length: {v}")))
            })
            .transpose()
    }
}

/// Read a request line and header block from `reader`
///
/// Returns `Ok(None)` if the client closed the connection before sending
/// anything.
pub async fn read_head<R>(reader: &mut R, max_size: usize) -> Result<Option<RequestHead>>
where
    R: AsyncBufRead + Unpin,
{
    let mut consumed = 0usize;

    let mut line = String::new();
    let n = read_limited_line(reader, &mut line, max_size).await?;
    if n == 0 {
        return Ok(None);
    }
    consumed += n;

    let mut head = RequestHead::parse_request_line(&line)?;

    loop {
        line.clear();
        let n = read_limited_line(reader, &mut line, max_size.saturating_sub(consumed)).await?;
        if n == 0 {
            return Err(Error::Protocol("connection closed inside header block".into()));
        }
        consumed += n;

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }

        let Some((name, value)) = trimmed.split_once(':') else {
            return Err(Error::Protocol(format!("malformed header line: {trimmed:?}")));
        };
        head.headers
            .push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(Some(head))
}

async fn read_limited_line<R>(reader: &mut R, line: &mut String, limit: usize) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    if limit == 0 {
        return Err(Error::Protocol("request header block too large".into()));
    }

    let mut raw = Vec::new();
    let n = (&mut *reader)
        .take(limit as u64)
        .read_until(b'\n', &mut raw)
        .await
        .map_err(|e| Error::Protocol(format!("unreadable request: {e}")))?;

    if n == limit && !raw.ends_with(b"\n") {
        return Err(Error::Protocol("request header block too large".into()));
    }
    // obs-text bytes are kept as replacement characters
    line.push_str(&String::from_utf8_lossy(&raw));
    Ok(n)
}

/// Split a CONNECT authority into host and port (default 443)
pub fn parse_connect_target(target: &str) -> Result<(String, u16)> {
    split_host_port(target, 443)
}

fn split_host_port(authority: &str, default_port: u16) -> Result<(String, u16)> {
    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        // [v6]:port
        let Some((host, after)) = rest.split_once(']') else {
            return Err(Error::Protocol(format!("invalid IPv6 authority: {authority}")));
        };
        let port = match after.strip_prefix(':') {
            Some(p) => parse_port(p, authority)?,
            None if after.is_empty() => default_port,
            None => return Err(Error::Protocol(format!("invalid authority: {authority}"))),
        };
        (host, port)
    } else {
        match authority.rsplit_once(':') {
            Some((host, p)) => (host, parse_port(p, authority)?),
            None => (authority, default_port),
        }
    };

    if host.is_empty() {
        return Err(Error::Protocol(format!("missing host in {authority:?}")));
    }
    Ok((host.to_lowercase(), port))
}

fn parse_port(value: &str, authority: &str) -> Result<u16> {
    match value.parse::<u16>() {
        Ok(0) | Err(_) => Err(Error::Protocol(format!("invalid port in {authority:?}"))),
        Ok(port) => Ok(port),
    }
}

/// Destination of a plain-HTTP proxy request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTarget {
    /// Destination host, lower-cased
    pub host: String,
    /// Destination port (default 80)
    pub port: u16,
    /// Path plus optional `?query`, never empty
    pub path_and_query: String,
}

impl HttpTarget {
    /// Parse an absolute `http://` request target
    pub fn parse(target: &str) -> Result<Self> {
        let Some(scheme_end) = target.find("://") else {
            return Err(Error::Protocol(format!("expected absolute URL, got {target:?}")));
        };
        let scheme = &target[..scheme_end];
        if !scheme.eq_ignore_ascii_case("http") {
            return Err(Error::Protocol(format!("unsupported scheme {scheme:?} for plain proxying")));
        }

        let rest = &target[scheme_end + 3..];
        let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let authority = &rest[..authority_end];
        // drop userinfo
        let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);

        let (host, port) = split_host_port(authority, 80)?;
        Ok(Self {
            host,
            port,
            path_and_query: normalize_path(&rest[authority_end..]),
        })
    }

    /// Target for `head`; origin-form requests fall back to the Host header
    pub fn from_request(head: &RequestHead) -> Result<Self> {
        if head.target.starts_with('/') {
            let Some(host) = head.header("Host") else {
                return Err(Error::Protocol("origin-form request without Host header".into()));
            };
            let (host, port) = split_host_port(host.trim(), 80)?;
            return Ok(Self {
                host,
                port,
                path_and_query: normalize_path(&head.target),
            });
        }
        Self::parse(&head.target)
    }

    fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == 80 {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

fn normalize_path(raw: &str) -> String {
    let without_fragment = raw.split('#').next().unwrap_or_default();
    if without_fragment.is_empty() {
        "/".to_string()
    } else if without_fragment.starts_with('?') {
        format!("/{without_fragment}")
    } else {
        without_fragment.to_string()
    }
}

/// Hop-by-hop headers that are not forwarded upstream
const DROPPED_HEADERS: &[&str] = &["connection", "proxy-connection", "keep-alive"];

/// Rebuild the request for the upstream server
///
/// Emits an origin-form HTTP/1.1 request line, the client's headers minus
/// hop-by-hop ones, a `Host` header if the client sent none, and a forced
/// `Connection: close`.
pub fn rebuild_request(head: &RequestHead, target: &HttpTarget) -> String {
    let mut out = format!("{} {} HTTP/1.1\r\n", head.method, target.path_and_query);

    if head.header("Host").is_none() {
        out.push_str(&format!("Host: {}\r\n", target.host_header()));
    }

    for (name, value) in &head.headers {
        if DROPPED_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }

    out.push_str("Connection: close\r\n\r\n");
    out
}
