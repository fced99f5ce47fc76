//! Session codes
//!
//! The host shares a short code out of band; everyone who enters it ends up
//! on the same gossip topic.

use rand::Rng;
use std::fmt;
use std::str::FromStr;

/// Unambiguous uppercase characters (no 0/O, 1/I/L, 2/Z, 5/S)
const ALPHABET: &[u8] = b"346789ABCDEFGHJKMNPQRTUVWXY";

const CODE_LENGTH: usize = 8;

/// Code identifying one watch session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionCode(String);

/// The input could not be read as a session code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid session code: {0}")]
pub struct InvalidSessionCode(pub String);

impl SessionCode {
    /// Generate a fresh code for a new session
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..CODE_LENGTH)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        SessionCode(code)
    }

    /// Normalized code without separators
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse user input, ignoring case, spaces and dashes
    pub fn parse(input: &str) -> Result<Self, InvalidSessionCode> {
        let normalized: String = input
            .chars()
            .filter(|c| c.is_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if normalized.len() == CODE_LENGTH && normalized.bytes().all(|b| ALPHABET.contains(&b)) {
            Ok(SessionCode(normalized))
        } else {
            Err(InvalidSessionCode(input.to_string()))
        }
    }

    /// Gossip topic name under `prefix`
    pub fn topic(&self, prefix: &str) -> String {
        format!("{}/{}", prefix, self.0)
    }
}

impl FromStr for SessionCode {
    type Err = InvalidSessionCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionCode::parse(s)
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", &self.0[..4], &self.0[4..])
    }
}
