//! Per-connection relay sessions.
//!
//! A session moves through three states: awaiting the request header,
//! established, closed. The first binary frame is parsed, authenticated and
//! turned into an outbound TCP connection; every frame after that is
//! forwarded verbatim. The remote-to-client direction runs as its own task
//! so both directions flow concurrently, and either side closing tears the
//! whole session down.

use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio_tungstenite::{
    WebSocketStream, accept_hdr_async,
    tungstenite::{
        Error as TungsteniteError, Message,
        error::ProtocolError,
        handshake::server::{Request, Response},
    },
};
use tracing::{debug, error, info, warn};

use crate::auth::UserId;
use crate::error::RelayError;
use crate::protocol::{ConnectRequest, ResponseFramer};
use crate::security::forwarded_client_ip;
use crate::stream::ClientStream;

pub const BUFFER_SIZE: usize = 8192;

/// Opens the outbound TCP leg of a session. Injected into the session so
/// tests can observe or refuse connection attempts.
pub trait Connector: Send + Sync {
    fn connect(&self, host: &str, port: u16) -> impl Future<Output = io::Result<TcpStream>> + Send;
}

/// Production connector: a plain `TcpStream::connect`.
#[derive(Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        TcpStream::connect((host, port)).await
    }
}

/// Peer address for log fields; never fails even when the socket cannot
/// report one.
fn peer_label(stream: &ClientStream) -> String {
    stream
        .peer_addr()
        .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string())
}

/// Accepts the WebSocket handshake on a client connection and runs the
/// relay session on it until either side closes.
#[tracing::instrument(skip(stream, user_id), fields(client_addr = %peer_label(&stream)))]
pub async fn handle_connection(stream: ClientStream, user_id: Arc<UserId>) -> Result<()> {
    let forwarded_ip = Arc::new(Mutex::new(None::<String>));
    let forwarded_ip_clone = forwarded_ip.clone();

    // Capture the original client IP from X-Forwarded-For during the
    // handshake; behind a reverse proxy the peer address is the proxy.
    let callback = move |req: &Request, response: Response| {
        if let Some(xff) = req.headers().get("x-forwarded-for") {
            if let Ok(value) = xff.to_str() {
                if let Some(ip) = forwarded_client_ip(value) {
                    if let Ok(mut guard) = forwarded_ip_clone.lock() {
                        *guard = Some(ip);
                    }
                }
            }
        }
        Ok(response)
    };

    let ws_stream = accept_hdr_async(stream, callback)
        .await
        .context("Failed to perform WebSocket handshake")?;

    if let Some(ip) = forwarded_ip.lock().unwrap().clone() {
        info!(client_ip = %ip, "WebSocket session opened");
    }

    run_session(ws_stream, TcpConnector, &user_id).await
}

/// Drives one relay session over an established WebSocket: consumes the
/// request header from the first binary frame, opens the outbound
/// connection, then bridges both directions until either side closes.
pub async fn run_session<S, C>(
    websocket: WebSocketStream<S>,
    connector: C,
    user_id: &UserId,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    C: Connector,
{
    let (ws_sender, mut ws_receiver) = websocket.split();

    // Awaiting the header: nothing is forwarded until a complete request
    // header arrives in one binary frame.
    let (request, tcp_stream) = loop {
        let Some(msg) = ws_receiver.next().await else {
            debug!("Client went away before sending a request header");
            return Ok(());
        };
        match msg {
            Ok(Message::Binary(frame)) => break establish(&frame, &connector, user_id).await?,
            Ok(Message::Text(_)) => {
                warn!("Dropping text message (binary only)");
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket closed before a request header arrived");
                return Ok(());
            }
            Err(
                e @ (TungsteniteError::ConnectionClosed
                | TungsteniteError::Protocol(ProtocolError::ResetWithoutClosingHandshake)),
            ) => {
                debug!("Client disconnected: {e}");
                return Ok(());
            }
            Err(e) => {
                return Err(RelayError::TransportError(e))
                    .context("WebSocket failed while awaiting the request header");
            }
            _ => {}
        }
    };

    let destination = request.destination.to_string();
    let port = request.port;
    let (tcp_reader, mut tcp_writer) = tcp_stream.into_split();

    // Established: remote-to-client forwarding runs as its own task; the
    // framer it owns acknowledges the first chunk.
    let framer = ResponseFramer::new(request.version);
    let mut response_task = tokio::spawn(forward_responses(tcp_reader, ws_sender, framer));

    let inbound = async {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    debug!(bytes = data.len(), "Forwarding frame to destination");
                    // Awaiting this write before the next receive is what
                    // gives the session backpressure.
                    if let Err(e) = tcp_writer.write_all(&data).await {
                        error!(error = %e, bytes = data.len(), "Failed to write to destination");
                        return Err(e).context("Failed to write WebSocket data to TCP connection");
                    }
                }
                Ok(Message::Text(_)) => {
                    warn!("Dropping text message (binary only)");
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket connection closed");
                    break;
                }
                Err(e) => {
                    match e {
                        TungsteniteError::ConnectionClosed
                        | TungsteniteError::Protocol(ProtocolError::ResetWithoutClosingHandshake) =>
                        {
                            debug!("Client disconnected: {e}");
                        }
                        _ => {
                            error!("WebSocket error: {e}");
                        }
                    }
                    break;
                }
                _ => {}
            }
        }
        Ok(())
    };

    // Single teardown path: whichever direction finishes first cancels the
    // other, and dropping the halves closes both streams.
    let reason = tokio::select! {
        result = inbound => {
            response_task.abort();
            result?;
            "websocket closed"
        }
        result = &mut response_task => {
            result.context("Response forwarding task failed")??;
            "destination closed"
        }
    };

    info!(destination = %destination, port, reason, "Relay session closed");
    Ok(())
}

/// The one-time transition out of the header-awaiting state: parse,
/// authenticate, connect, and hand the header's trailing payload to the
/// destination as its first write.
async fn establish<C: Connector>(
    frame: &[u8],
    connector: &C,
    user_id: &UserId,
) -> Result<(ConnectRequest, TcpStream)> {
    let request = ConnectRequest::parse(frame)?;
    user_id.verify(&request.user_id)?;

    let destination = request.destination.to_string();
    debug!(destination = %destination, port = request.port, "Connecting to requested destination");
    let mut tcp_stream = connector
        .connect(&destination, request.port)
        .await
        .map_err(|source| RelayError::ConnectFailure {
            destination: destination.clone(),
            port: request.port,
            source,
        })?;

    let payload = request.payload(frame);
    if !payload.is_empty() {
        tcp_stream
            .write_all(payload)
            .await
            .context("Failed to write initial payload to destination")?;
    }

    info!(destination = %destination, port = request.port, "Connected to requested destination");
    Ok((request, tcp_stream))
}

/// Remote-to-client direction: reads from the destination and relays every
/// chunk to the WebSocket, letting the framer prefix the first one.
async fn forward_responses<S>(
    mut tcp_reader: OwnedReadHalf,
    mut ws_sender: SplitSink<WebSocketStream<S>, Message>,
    mut framer: ResponseFramer,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut buffer = [0u8; BUFFER_SIZE];

    loop {
        match tcp_reader.read(&mut buffer).await {
            Ok(0) => {
                info!("TCP connection closed");
                break;
            }
            Ok(n) => {
                debug!(bytes = n, "Forwarding data from destination to WebSocket");
                let data = framer.frame(&buffer[..n]);
                if let Err(e) = ws_sender.send(Message::Binary(data.into())).await {
                    error!(error = %e, bytes = n, "Failed to send WebSocket message");
                    return Err(RelayError::TransportError(e))
                        .context("Failed to send TCP data via WebSocket");
                }
            }
            Err(e) => {
                error!("Failed to read from TCP: {e}");
                break;
            }
        }
    }

    // A destination that closes without ever responding still owes the
    // client its acknowledgment header.
    let ack = framer.frame(&[]);
    if !ack.is_empty() {
        if let Err(e) = ws_sender.send(Message::Binary(ack.into())).await {
            debug!("Failed to send acknowledgment after destination close: {e}");
        }
    }
    Ok(())
}
