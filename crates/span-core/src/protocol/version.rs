//! Protocol version negotiation.
//!
//! The server greets with the newest version it speaks; the client answers
//! with its own. The connection proceeds at the lower of the two, provided
//! the client is not below the server's configured minimum. Incompatibility
//! is decided on the major first, then the minor within an equal major —
//! a newer major with any minor always satisfies an older minimum.

use std::fmt;
use std::str::FromStr;

use crate::protocol::msgs::{PROTOCOL_MAJOR, PROTOCOL_MINOR};

/// A protocol version as carried in the handshake (`major.minor`).
///
/// The derived ordering is lexicographic on (major, minor), which is
/// exactly the compatibility ordering the handshake needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    /// The newest version this codebase speaks.
    pub const CURRENT: ProtocolVersion = ProtocolVersion {
        major: PROTOCOL_MAJOR,
        minor: PROTOCOL_MINOR,
    };

    /// The oldest version this codebase can still encode.
    pub const OLDEST: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// True if a peer at `self` may be admitted given `minimum`.
    pub fn satisfies(self, minimum: ProtocolVersion) -> bool {
        self >= minimum
    }

    /// The version a connection actually runs at: the lower of the peer's
    /// offer and what we speak ourselves.
    pub fn negotiate(peer: ProtocolVersion) -> ProtocolVersion {
        peer.min(Self::CURRENT)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Error parsing a `"major.minor"` version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVersionError(String);

impl fmt::Display for ParseVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid protocol version {:?}, expected \"major.minor\"", self.0)
    }
}

impl std::error::Error for ParseVersionError {}

impl FromStr for ProtocolVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ParseVersionError(s.to_string());
        let (major, minor) = s.split_once('.').ok_or_else(bad)?;
        Ok(ProtocolVersion {
            major: major.parse().map_err(|_| bad())?,
            minor: minor.parse().map_err(|_| bad())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_major_lower_minor_is_incompatible() {
        let minimum = ProtocolVersion::new(1, 2);
        assert!(!ProtocolVersion::new(1, 1).satisfies(minimum));
        assert!(ProtocolVersion::new(1, 2).satisfies(minimum));
        assert!(ProtocolVersion::new(1, 3).satisfies(minimum));
    }

    #[test]
    fn test_newer_major_always_satisfies() {
        let minimum = ProtocolVersion::new(1, 3);
        assert!(ProtocolVersion::new(2, 0).satisfies(minimum));
    }

    #[test]
    fn test_older_major_never_satisfies() {
        let minimum = ProtocolVersion::new(1, 0);
        assert!(!ProtocolVersion::new(0, 9).satisfies(minimum));
    }

    #[test]
    fn test_parse_from_string() {
        assert_eq!("1.3".parse::<ProtocolVersion>(), Ok(ProtocolVersion::new(1, 3)));
        assert!("1".parse::<ProtocolVersion>().is_err());
        assert!("one.two".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn test_negotiation_clamps_to_what_we_speak() {
        assert_eq!(
            ProtocolVersion::negotiate(ProtocolVersion::new(9, 9)),
            ProtocolVersion::CURRENT
        );
        assert_eq!(
            ProtocolVersion::negotiate(ProtocolVersion::new(1, 1)),
            ProtocolVersion::new(1, 1)
        );
    }
}
