//! TCP listener, framing, and handshake.
//!
//! Every protocol message travels in a frame: a 4-byte big-endian length
//! prefix followed by that many payload bytes. The handshake is the first
//! exchange on a fresh connection: the server greets with its protocol
//! version, the client answers with its version and screen name, and the
//! server either admits the connection or answers `EICV` and hangs up.
//!
//! Frame I/O and the handshake are generic over `AsyncRead + AsyncWrite`
//! so tests can run them over an in-memory duplex pipe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use span_core::protocol::codec::{readf, writef, CodecError, Item, Value};
use span_core::protocol::msgs;
use span_core::protocol::parse::parse_client_message;
use span_core::protocol::version::ProtocolVersion;

use crate::proxy::DisconnectCause;
use crate::server::{AdoptRequest, ServerEvent};

/// How long a client gets to answer the greeting.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Bind retry schedule: doubling backoff, capped.
const BIND_RETRY_INITIAL: Duration = Duration::from_millis(500);
const BIND_RETRY_MAX: Duration = Duration::from_secs(8);
const BIND_ATTEMPTS: u32 = 6;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Errors from the network layer.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("failed to bind {addr} after {attempts} attempts")]
    BindFailed {
        addr: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("connection closed")]
    Closed,

    #[error("frame of {len} bytes exceeds the {max}-byte limit")]
    FrameTooLarge { len: u32, max: u32 },

    #[error("malformed handshake: {0}")]
    BadHello(#[from] CodecError),

    #[error("handshake reply carried a non-UTF-8 screen name")]
    BadName,

    #[error("client speaks {offered}, below the configured minimum {minimum}")]
    Incompatible {
        offered: ProtocolVersion,
        minimum: ProtocolVersion,
    },

    #[error("handshake timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Framing ───────────────────────────────────────────────────────────────────

/// Reads one length-prefixed frame, enforcing `max` on the prefix.
///
/// # Errors
///
/// [`NetError::Closed`] on a clean end-of-stream at a frame boundary,
/// [`NetError::FrameTooLarge`] on an oversized prefix, or [`NetError::Io`].
pub async fn read_frame<R>(reader: &mut R, max: u32) -> Result<Vec<u8>, NetError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(NetError::Closed),
        Err(e) => return Err(NetError::Io(e)),
    }
    let len = u32::from_be_bytes(prefix);
    if len > max {
        return Err(NetError::FrameTooLarge { len, max });
    }
    let mut frame = vec![0u8; len as usize];
    reader.read_exact(&mut frame).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            NetError::Closed
        } else {
            NetError::Io(e)
        }
    })?;
    Ok(frame)
}

/// Writes one frame with its length prefix.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let prefix = (frame.len() as u32).to_be_bytes();
    writer.write_all(&prefix).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

fn encode(fmt: &str, args: &[Item<'_>]) -> Result<Vec<u8>, CodecError> {
    let mut frame = Vec::new();
    writef(&mut frame, fmt, args)?;
    Ok(frame)
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// The admitted peer after a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub name: String,
    /// The version the connection runs at: the lower of the client's
    /// offer and what this server speaks.
    pub version: ProtocolVersion,
}

/// Greets the peer and validates its reply.
///
/// On a version below `minimum`, `EICV` with our version is sent before
/// the error is returned so the client can log something useful.
///
/// # Errors
///
/// [`NetError::Timeout`] if the reply does not arrive in time,
/// [`NetError::Incompatible`] on a version below `minimum`, and the
/// framing/decoding variants for a peer that is not speaking this
/// protocol at all.
pub async fn handshake<S>(stream: &mut S, minimum: ProtocolVersion) -> Result<Greeting, NetError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello = encode(
        msgs::HELLO,
        &[
            Item::U16(ProtocolVersion::CURRENT.major),
            Item::U16(ProtocolVersion::CURRENT.minor),
        ],
    )?;
    write_frame(stream, &hello).await?;

    let reply = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        read_frame(stream, msgs::MAX_HELLO_LENGTH),
    )
    .await
    .map_err(|_| NetError::Timeout)??;

    let values = readf(&mut reply.as_slice(), msgs::HELLO_BACK)?;
    let major = values.first().and_then(Value::as_u16).unwrap_or(0);
    let minor = values.get(1).and_then(Value::as_u16).unwrap_or(0);
    let name = values
        .get(2)
        .cloned()
        .and_then(Value::into_bytes)
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or(NetError::BadName)?;

    let offered = ProtocolVersion::new(major, minor);
    if !offered.satisfies(minimum) {
        let refusal = encode(
            msgs::E_INCOMPATIBLE,
            &[
                Item::U16(ProtocolVersion::CURRENT.major),
                Item::U16(ProtocolVersion::CURRENT.minor),
            ],
        )?;
        write_frame(stream, &refusal).await?;
        return Err(NetError::Incompatible { offered, minimum });
    }

    Ok(Greeting {
        name,
        version: ProtocolVersion::negotiate(offered),
    })
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// Binds `addr`, retrying with doubling backoff: another instance may
/// still be letting go of the port.
///
/// # Errors
///
/// [`NetError::BindFailed`] with the final bind error as source.
pub async fn bind_with_backoff(addr: &str) -> Result<TcpListener, NetError> {
    let mut delay = BIND_RETRY_INITIAL;
    let mut last_err = None;
    for attempt in 1..=BIND_ATTEMPTS {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                warn!(%addr, attempt, error = %e, "bind failed, retrying");
                last_err = Some(e);
            }
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(BIND_RETRY_MAX);
    }
    Err(NetError::BindFailed {
        addr: addr.to_string(),
        attempts: BIND_ATTEMPTS,
        source: last_err
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "bind failed")),
    })
}

/// Accept loop: handshakes every connection and posts the survivors to
/// the coordinator. Runs until the listener errors or the coordinator
/// goes away.
pub async fn serve(
    listener: TcpListener,
    events: mpsc::UnboundedSender<ServerEvent>,
    minimum: ProtocolVersion,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        debug!(%peer, "incoming connection");
        if events.is_closed() {
            return;
        }
        let events = events.clone();
        tokio::spawn(async move {
            handle_connection(stream, events, minimum).await;
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    events: mpsc::UnboundedSender<ServerEvent>,
    minimum: ProtocolVersion,
) {
    let greeting = match handshake(&mut stream, minimum).await {
        Ok(greeting) => greeting,
        Err(e) => {
            info!(error = %e, "handshake failed");
            return;
        }
    };
    let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        screen = %greeting.name,
        version = %greeting.version,
        connection_id,
        "client connected"
    );

    let (read_half, write_half) = stream.into_split();
    let (sink, outbound) = mpsc::unbounded_channel::<Vec<u8>>();

    tokio::spawn(write_loop(write_half, outbound));

    if events
        .send(ServerEvent::Adopt(AdoptRequest {
            name: greeting.name.clone(),
            connection_id,
            version: greeting.version,
            sink: sink.clone(),
        }))
        .is_err()
    {
        return;
    }

    read_loop(read_half, greeting.name, connection_id, events, sink).await;
}

/// Drains the outbound channel onto the socket. Ends when every sender is
/// dropped, which is how the coordinator closes a connection.
async fn write_loop<W>(mut writer: W, mut outbound: mpsc::UnboundedReceiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!(error = %e, "write failed, closing writer");
            return;
        }
    }
    let _ = writer.shutdown().await;
}

/// Reads and parses frames until the connection ends, posting each
/// message to the coordinator. A protocol violation earns the client an
/// `EBAD` before the disconnect is reported.
async fn read_loop<R>(
    mut reader: R,
    name: String,
    connection_id: u64,
    events: mpsc::UnboundedSender<ServerEvent>,
    sink: mpsc::UnboundedSender<Vec<u8>>,
) where
    R: AsyncRead + Unpin,
{
    let cause = loop {
        let frame = match read_frame(&mut reader, msgs::MAX_MESSAGE_LENGTH).await {
            Ok(frame) => frame,
            Err(NetError::Closed) => break DisconnectCause::Dropped,
            Err(NetError::FrameTooLarge { len, max }) => {
                warn!(screen = %name, len, max, "oversized frame");
                break DisconnectCause::ProtocolError;
            }
            Err(e) => {
                debug!(screen = %name, error = %e, "read failed");
                break DisconnectCause::Dropped;
            }
        };
        match parse_client_message(&frame) {
            Ok(message) => {
                if events
                    .send(ServerEvent::FromClient {
                        name: name.clone(),
                        connection_id,
                        message,
                    })
                    .is_err()
                {
                    return;
                }
            }
            Err(e) => {
                warn!(screen = %name, error = %e, "protocol violation");
                if let Ok(frame) = encode(msgs::E_BAD, &[]) {
                    let _ = sink.send(frame);
                }
                break DisconnectCause::ProtocolError;
            }
        }
    };
    let _ = events.send(ServerEvent::ConnectionLost {
        name,
        connection_id,
        cause,
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────────
