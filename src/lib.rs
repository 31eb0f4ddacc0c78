//! VLESS-over-WebSocket Relay Server
//!
//! Accepts WebSocket connections carrying the VLESS tunneling protocol,
//! authenticates the user id embedded in the first binary frame, opens the
//! requested outbound TCP connection, and bridges both byte streams for the
//! rest of the session. Supports TLS termination and client IP extraction
//! from X-Forwarded-For headers.

pub mod auth;
pub mod config;
pub mod error;
pub mod protocol;
pub mod security;
pub mod session;
pub mod stream;
pub mod tls;

// Re-export commonly used types and functions
pub use auth::UserId;
pub use config::{Config, ListenConfig, TlsConfig, load_config, resolve_user_id};
pub use error::RelayError;
pub use protocol::{Address, Command, ConnectRequest, MIN_HEADER_LEN, ResponseFramer};
pub use security::{ProxyAllowlist, forwarded_client_ip};
pub use session::{BUFFER_SIZE, Connector, TcpConnector, handle_connection, run_session};
pub use stream::ClientStream;
pub use tls::load_tls_config;
