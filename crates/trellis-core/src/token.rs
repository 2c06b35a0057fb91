use std::fmt;

/// Maximum CoAP token length in bytes.
pub const MAX_TOKEN_LEN: usize = 8;

/// Fixed-width token correlating a request, its response, and every
/// notification derived from the same subscription.
///
/// Wire tokens are 0..=8 bytes; the storage is always 8 bytes with an
/// explicit length so round-tripping preserves the exact wire value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    bytes: [u8; MAX_TOKEN_LEN],
    len: u8,
}

impl Token {
    /// The empty token (length 0), used by piggybacked empty messages.
    pub const EMPTY: Token = Token {
        bytes: [0; MAX_TOKEN_LEN],
        len: 0,
    };

    /// Generate a fresh random full-width token for a locally-originated
    /// request.
    pub fn generate() -> Self {
        Self {
            bytes: rand::random(),
            len: MAX_TOKEN_LEN as u8,
        }
    }

    /// Build a token from wire bytes. Fails if longer than 8 bytes.
    pub fn from_slice(raw: &[u8]) -> Option<Self> {
        if raw.len() > MAX_TOKEN_LEN {
            return None;
        }
        let mut bytes = [0u8; MAX_TOKEN_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Some(Self {
            bytes,
            len: raw.len() as u8,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        for b in self.as_slice() {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({self})")
    }
}
