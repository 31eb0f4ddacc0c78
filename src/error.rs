use thiserror::Error;

/// Everything that can kill a relay session.
///
/// All variants are fatal to the session that produced them; nothing is
/// retried and no structured error is sent back to the client.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The first frame was shorter than the fixed minimum or a field ran
    /// past the end of the frame.
    #[error("malformed request header: frame too short or truncated")]
    MalformedHeader,

    /// The embedded user id did not match the configured one. Carries no
    /// detail on purpose.
    #[error("client presented an unauthorized user id")]
    Unauthorized,

    /// The request asked for anything other than a single TCP stream.
    #[error("command {0:#04x} is not supported (01-tcp, 02-udp, 03-mux)")]
    UnsupportedCommand(u8),

    /// The address type byte was unrecognized or the address decoded to
    /// nothing.
    #[error("request header carries no usable destination address")]
    EmptyDestination,

    /// The outbound TCP connect failed.
    #[error("failed to connect to {destination}:{port}")]
    ConnectFailure {
        destination: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The WebSocket side errored while the session was active.
    #[error("websocket transport failed")]
    TransportError(#[from] tokio_tungstenite::tungstenite::Error),
}
