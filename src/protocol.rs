//! VLESS request-header parsing and response framing.
//!
//! The first binary frame of every session carries a request header:
//!
//! ```text
//! +---------+----------+---------+---------+---------+------+------+---------+---------+
//! | version | user id  | opt len | options | command | port | type | address | payload |
//! +---------+----------+---------+---------+---------+------+------+---------+---------+
//! |   1B    |   16B    |   1B    | opt len |   1B    | 2 BE |  1B  |   var   |  rest   |
//! +---------+----------+---------+---------+---------+------+------+---------+---------+
//! ```
//!
//! The options block is skipped, never interpreted; its length only moves
//! the offsets of the fields behind it. Everything after the address is the
//! initial payload, forwarded verbatim to the destination. The first chunk
//! flowing back to the client gets a two-byte acknowledgment header
//! `[version, 0x00]` prepended by [`ResponseFramer`].

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::RelayError;

/// Shortest frame that can hold a complete header. Anything below this is
/// rejected before any field is read.
pub const MIN_HEADER_LEN: usize = 24;

/// Status byte in the acknowledgment header. The protocol defines no other
/// value.
pub const STATUS_OK: u8 = 0x00;

const COMMAND_OFFSET: usize = 18;
const ADDR_IPV4: u8 = 0x01;
const ADDR_DOMAIN: u8 = 0x02;
const ADDR_IPV6: u8 = 0x03;

/// Connection commands a client can request. Only [`Command::Tcp`] is
/// served; the other two are recognized so the rejection can name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Tcp,
    Udp,
    Mux,
}

impl Command {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Tcp),
            0x02 => Some(Self::Udp),
            0x03 => Some(Self::Mux),
            _ => None,
        }
    }
}

/// Destination address as encoded in the request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Domain(String),
    Ipv6(Ipv6Addr),
}

impl Address {
    /// Decodes one address from `buf`, which must start right after the
    /// address-type byte. Returns the address and how many bytes it
    /// occupied.
    fn decode(kind: u8, buf: &[u8]) -> Result<(Self, usize), RelayError> {
        match kind {
            ADDR_IPV4 => {
                let octets: [u8; 4] = buf
                    .get(..4)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(RelayError::MalformedHeader)?;
                Ok((Self::Ipv4(Ipv4Addr::from(octets)), 4))
            }
            ADDR_DOMAIN => {
                let len = *buf.first().ok_or(RelayError::MalformedHeader)? as usize;
                if len == 0 {
                    return Err(RelayError::EmptyDestination);
                }
                let name = buf.get(1..1 + len).ok_or(RelayError::MalformedHeader)?;
                let name =
                    std::str::from_utf8(name).map_err(|_| RelayError::MalformedHeader)?;
                Ok((Self::Domain(name.to_string()), 1 + len))
            }
            ADDR_IPV6 => {
                let octets: [u8; 16] = buf
                    .get(..16)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(RelayError::MalformedHeader)?;
                Ok((Self::Ipv6(Ipv6Addr::from(octets)), 16))
            }
            _ => Err(RelayError::EmptyDestination),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4(ip) => write!(f, "{ip}"),
            Self::Domain(name) => f.write_str(name),
            // Full uncompressed form, e.g. 2001:0db8:0000:...:0001. The
            // compressed form would also resolve, but the full one keeps
            // logs aligned with what was on the wire.
            Self::Ipv6(ip) => {
                let mut first = true;
                for group in ip.segments() {
                    if !first {
                        f.write_str(":")?;
                    }
                    write!(f, "{group:04x}")?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}

/// One parsed request header. Immutable after [`ConnectRequest::parse`].
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Echoed back unchanged in the acknowledgment header.
    pub version: u8,
    /// The 16-byte identifier the client authenticated with.
    pub user_id: [u8; 16],
    /// Always [`Command::Tcp`]; other commands fail the parse.
    pub command: Command,
    /// Destination port, big-endian on the wire.
    pub port: u16,
    pub destination: Address,
    /// Total header size. The frame's bytes from this offset on are the
    /// initial payload.
    pub header_len: usize,
}

impl ConnectRequest {
    /// Parses the request header out of the first binary frame.
    pub fn parse(frame: &[u8]) -> Result<Self, RelayError> {
        if frame.len() < MIN_HEADER_LEN {
            return Err(RelayError::MalformedHeader);
        }
        let version = frame[0];
        let mut user_id = [0u8; 16];
        user_id.copy_from_slice(&frame[1..17]);

        // The options block sits between the user id and the command byte;
        // skip it entirely.
        let opt_len = frame[17] as usize;
        let command_index = COMMAND_OFFSET + opt_len;
        // command + port (2) + address type must all be present.
        if frame.len() < command_index + 4 {
            return Err(RelayError::MalformedHeader);
        }

        let command = match Command::from_byte(frame[command_index]) {
            Some(Command::Tcp) => Command::Tcp,
            _ => return Err(RelayError::UnsupportedCommand(frame[command_index])),
        };

        let port = u16::from_be_bytes([frame[command_index + 1], frame[command_index + 2]]);
        let addr_type = frame[command_index + 3];
        let (destination, addr_len) = Address::decode(addr_type, &frame[command_index + 4..])?;

        Ok(Self {
            version,
            user_id,
            command,
            port,
            destination,
            header_len: command_index + 4 + addr_len,
        })
    }

    /// The initial payload trailing the header inside the same frame.
    #[must_use]
    pub fn payload<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        &frame[self.header_len..]
    }
}

/// Attaches the acknowledgment header to the first response chunk of a
/// session and passes every later chunk through untouched.
#[derive(Debug)]
pub struct ResponseFramer {
    version: u8,
    acknowledged: bool,
}

impl ResponseFramer {
    #[must_use]
    pub fn new(version: u8) -> Self {
        Self {
            version,
            acknowledged: false,
        }
    }

    /// Frames one chunk. The `[version, 0x00]` prefix is emitted exactly
    /// once, on the first call, even if that chunk is empty.
    pub fn frame(&mut self, chunk: &[u8]) -> Vec<u8> {
        if self.acknowledged {
            return chunk.to_vec();
        }
        self.acknowledged = true;
        let mut framed = Vec::with_capacity(2 + chunk.len());
        framed.push(self.version);
        framed.push(STATUS_OK);
        framed.extend_from_slice(chunk);
        framed
    }
}
