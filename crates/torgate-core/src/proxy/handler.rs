//! Per-connection request handling
//!
//! CONNECT -> blocklist (CONNECT rules) -> SOCKS tunnel -> `200` -> raw relay
//! GET/POST -> blocklist (HTTP rules) -> rewrite -> SOCKS tunnel -> relay
//!
//! Errors end only the connection they occurred on. Before any byte of the
//! upstream response reached the client they are answered with an HTTP
//! status; afterwards the sockets are simply closed.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tracing::debug;

use super::audit::{self, Decision, RequestRecord};
use super::relay::relay;
use super::request::{self, HttpTarget, RequestHead};
use crate::blocklist::{Blocklist, ProtocolPath};
use crate::error::{Error, Result};
use crate::socks::Connector;

/// State shared by all connection tasks of one proxy listener
pub(crate) struct HandlerContext {
    pub blocklist: Arc<Blocklist>,
    pub connector: Arc<dyn Connector>,
    pub feed: broadcast::Sender<RequestRecord>,
    pub max_header_size: usize,
    pub max_body_size: u64,
}

/// Serve one client connection
pub(crate) async fn handle_connection<S>(stream: S, ctx: &HandlerContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut client = BufReader::new(stream);

    let head = match request::read_head(&mut client, ctx.max_header_size).await {
        Ok(Some(head)) => head,
        Ok(None) => return Ok(()),
        Err(e) => return reject(&mut client, ctx, None, e).await,
    };
    debug!(method = %head.method, target = %head.target, "Proxy request");

    match head.method.as_str() {
        "CONNECT" => handle_connect(client, head, ctx).await,
        "GET" | "POST" => handle_http(client, head, ctx).await,
        other => {
            let err = Error::UnsupportedMethod(other.to_string());
            reject(&mut client, ctx, Some(&head), err).await
        }
    }
}

async fn handle_connect<S>(
    mut client: BufReader<S>,
    head: RequestHead,
    ctx: &HandlerContext,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (host, port) = match request::parse_connect_target(&head.target) {
        Ok(hp) => hp,
        Err(e) => return reject(&mut client, ctx, Some(&head), e).await,
    };

    if ctx.blocklist.is_blocked(&host, ProtocolPath::Connect) {
        return reject(&mut client, ctx, Some(&head), Error::Blocked { host }).await;
    }

    let mut upstream = match ctx.connector.connect(&host, port).await {
        Ok(upstream) => upstream,
        Err(e) => return reject(&mut client, ctx, Some(&head), e).await,
    };

    client
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;
    client.flush().await?;

    audit::record(&ctx.feed, record(&head, 0, Decision::Tunneled, 200));

    // the BufReader may already hold early tunnel bytes; relay through it
    let stats = relay(&mut client, &mut upstream).await;
    debug!(host = %host, port, ?stats, "CONNECT tunnel closed");
    Ok(())
}

async fn handle_http<S>(
    mut client: BufReader<S>,
    head: RequestHead,
    ctx: &HandlerContext,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let target = match HttpTarget::from_request(&head) {
        Ok(target) => target,
        Err(e) => return reject(&mut client, ctx, Some(&head), e).await,
    };

    if ctx.blocklist.is_blocked(&target.host, ProtocolPath::Http) {
        let err = Error::Blocked { host: target.host };
        return reject(&mut client, ctx, Some(&head), err).await;
    }

    let body_length = if head.method == "POST" {
        match head.content_length() {
            Ok(length) => length.unwrap_or(0),
            Err(e) => return reject(&mut client, ctx, Some(&head), e).await,
        }
    } else {
        0
    };
    if body_length > ctx.max_body_size {
        let err = Error::Protocol(format!(
            "request body of {body_length} bytes exceeds the {} byte limit",
            ctx.max_body_size
        ));
        return reject(&mut client, ctx, Some(&head), err).await;
    }

    let outgoing = request::rebuild_request(&head, &target);

    let mut upstream = match ctx.connector.connect(&target.host, target.port).await {
        Ok(upstream) => upstream,
        Err(e) => return reject(&mut client, ctx, Some(&head), e).await,
    };

    if let Err(e) = send_all(&mut upstream, outgoing.as_bytes()).await {
        let err = Error::connector(&target.host, target.port, e);
        return reject(&mut client, ctx, Some(&head), err).await;
    }

    // body is streamed, never buffered
    if body_length > 0 {
        let forwarded = {
            let mut body = (&mut client).take(body_length);
            tokio::io::copy(&mut body, &mut upstream).await
        };
        let err = match forwarded {
            Ok(copied) if copied == body_length => None,
            Ok(copied) => Some(Error::Protocol(format!(
                "request body shorter than Content-Length: {copied} of {body_length} bytes"
            ))),
            Err(e) => Some(Error::Protocol(format!("request body not forwarded: {e}"))),
        };
        if let Some(err) = err {
            return reject(&mut client, ctx, Some(&head), err).await;
        }
    }

    audit::record(
        &ctx.feed,
        record(&head, outgoing.len() as u64 + body_length, Decision::Tunneled, 200),
    );

    let stats = relay(&mut client, &mut upstream).await;
    debug!(host = %target.host, port = target.port, ?stats, "HTTP relay closed");
    Ok(())
}

async fn send_all<W>(upstream: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    upstream.write_all(bytes).await?;
    upstream.flush().await
}

fn record(head: &RequestHead, bytes: u64, decision: Decision, status: u16) -> RequestRecord {
    RequestRecord {
        method: head.method.clone(),
        target: head.target.clone(),
        bytes,
        decision,
        status,
    }
}

/// Answer `err` with its HTTP status, log it, and hand the error back
async fn reject<S>(
    client: &mut BufReader<S>,
    ctx: &HandlerContext,
    head: Option<&RequestHead>,
    err: Error,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let status = err.status_code();
    let decision = if status == 403 {
        Decision::Blocked
    } else {
        Decision::Failed
    };

    if let Some(head) = head {
        audit::record(&ctx.feed, record(head, 0, decision, status));
    }

    // client may already be gone
    let _ = write_error(client, status, &err).await;
    Err(err)
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        403 => "Forbidden",
        501 => "Not Implemented",
        _ => "Bad Gateway",
    }
}

async fn write_error<W>(client: &mut W, status: u16, err: &Error) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = format!("{err}\n");
    let response = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        reason_phrase(status),
        body.len(),
    );
    client.write_all(response.as_bytes()).await?;
    client.flush().await?;
    client.shutdown().await
}
