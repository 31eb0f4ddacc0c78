//! The single authorized user id and its verification.

use std::str::FromStr;

use anyhow::{anyhow, bail};

use crate::error::RelayError;

/// The 16-byte identifier every client must embed in its request header.
///
/// Configured once at startup and shared read-only across sessions. Treated
/// as a secret: no `Display`, and a mismatch reveals nothing about which
/// byte differed.
#[derive(Clone, PartialEq, Eq)]
pub struct UserId([u8; 16]);

impl UserId {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Byte-exact comparison against the id a client presented.
    pub fn verify(&self, presented: &[u8; 16]) -> Result<(), RelayError> {
        if self.0 == *presented {
            Ok(())
        } else {
            Err(RelayError::Unauthorized)
        }
    }
}

impl std::fmt::Debug for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("UserId(..)")
    }
}

impl FromStr for UserId {
    type Err = anyhow::Error;

    /// Parses the canonical hyphenated UUID form (8-4-4-4-12 hex digits).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const GROUP_LENS: [usize; 5] = [8, 4, 4, 4, 12];

        let groups: Vec<&str> = s.split('-').collect();
        if groups.len() != GROUP_LENS.len()
            || groups.iter().zip(GROUP_LENS).any(|(g, len)| g.len() != len)
        {
            bail!("user id must be a hyphenated UUID (8-4-4-4-12 hex digits)");
        }

        let hex: String = groups.concat();
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| anyhow!("user id contains a non-hex digit"))?;
        }
        Ok(Self(bytes))
    }
}
