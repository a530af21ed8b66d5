//! Stable directory identifiers.
//!
//! A directory principal is identified by a 128-bit GUID (Active Directory
//! `objectGUID`). On the wire it arrives either as the 16 raw bytes (LDAP) or
//! as base64 of those bytes (SAML NameID). Locally it is stored in the AD
//! string form: first three groups little-endian, upper-case, hyphenated.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::DirsyncError;

/// Length in bytes of a binary identifier.
pub const IDENTIFIER_LEN: usize = 16;

/// Reasons an identifier fails to decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("identifier decodes to printable text, not a binary GUID")]
    Printable,

    #[error("expected 16 identifier bytes, got {0}")]
    InvalidLength(usize),

    #[error("identifier is not valid base64: {0}")]
    Encoding(String),

    #[error("not a valid GUID string: {0}")]
    InvalidFormat(String),
}

impl From<IdentifierError> for DirsyncError {
    fn from(err: IdentifierError) -> Self {
        DirsyncError::MalformedIdentifier(err.to_string())
    }
}

/// Immutable identifier joining a remote principal to its local entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StableIdentifier(Uuid);

impl StableIdentifier {
    /// Decode the raw binary form delivered by the directory.
    ///
    /// A value made entirely of printable ASCII is rejected before the length
    /// check: a text attribute (or a text NameID) is never a binary GUID.
    pub fn from_wire_bytes(bytes: &[u8]) -> Result<Self, IdentifierError> {
        if is_printable(bytes) {
            return Err(IdentifierError::Printable);
        }
        if bytes.len() != IDENTIFIER_LEN {
            return Err(IdentifierError::InvalidLength(bytes.len()));
        }
        Uuid::from_slice_le(bytes)
            .map(Self)
            .map_err(|_| IdentifierError::InvalidLength(bytes.len()))
    }

    /// Decode a base64 wire value (SAML NameID, LDIF exports).
    pub fn from_base64(encoded: &str) -> Result<Self, IdentifierError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| IdentifierError::Encoding(e.to_string()))?;
        Self::from_wire_bytes(&bytes)
    }

    /// Parse the canonical hyphenated string form.
    pub fn parse(canonical: &str) -> Result<Self, IdentifierError> {
        let bad = || IdentifierError::InvalidFormat(canonical.to_string());
        if canonical.len() != 36 {
            return Err(bad());
        }
        let hyphens_ok = canonical
            .char_indices()
            .all(|(i, c)| matches!(i, 8 | 13 | 18 | 23) == (c == '-'));
        if !hyphens_ok {
            return Err(bad());
        }
        Uuid::try_parse(canonical).map(Self).map_err(|_| bad())
    }

    /// The raw bytes in directory (mixed-endian) order.
    pub fn to_wire_bytes(&self) -> [u8; IDENTIFIER_LEN] {
        self.0.to_bytes_le()
    }

    /// Base64 of the raw bytes, as carried in a SAML NameID.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_wire_bytes())
    }
}

impl fmt::Display for StableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.0.hyphenated())
    }
}

impl FromStr for StableIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StableIdentifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StableIdentifier> for String {
    fn from(id: StableIdentifier) -> Self {
        id.to_string()
    }
}

/// True when every byte is printable ASCII (space through tilde).
pub fn is_printable(bytes: &[u8]) -> bool {
    !bytes.is_empty() && bytes.iter().all(|b| (0x20..=0x7e).contains(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIRE: [u8; 16] = [
        0x3C, 0x2D, 0x1E, 0x0F, 0x5A, 0x4B, 0x78, 0x69, 0x87, 0x96, 0xA5, 0xB4, 0xC3, 0xD2, 0xE1,
        0xF0,
    ];
    const CANONICAL: &str = "0F1E2D3C-4B5A-6978-8796-A5B4C3D2E1F0";

    #[test]
    fn wire_bytes_render_in_directory_order() {
        let id = StableIdentifier::from_wire_bytes(&WIRE).unwrap();
        assert_eq!(id.to_string(), CANONICAL);
        assert_eq!(id.to_wire_bytes(), WIRE);
    }

    #[test]
    fn printable_bytes_are_rejected() {
        let err = StableIdentifier::from_wire_bytes(b"abcdefghijklmnop").unwrap_err();
        assert_eq!(err, IdentifierError::Printable);
    }

    #[test]
    fn printable_check_runs_before_length_check() {
        let err = StableIdentifier::from_wire_bytes(b"jbloggs").unwrap_err();
        assert_eq!(err, IdentifierError::Printable);
    }

    #[test]
    fn short_binary_is_rejected() {
        let err = StableIdentifier::from_wire_bytes(&[0x00, 0x01, 0x02]).unwrap_err();
        assert_eq!(err, IdentifierError::InvalidLength(3));
    }

    #[test]
    fn empty_is_invalid_length() {
        let err = StableIdentifier::from_wire_bytes(&[]).unwrap_err();
        assert_eq!(err, IdentifierError::InvalidLength(0));
    }

    #[test]
    fn base64_name_id_decodes() {
        let encoded = BASE64.encode(WIRE);
        let id = StableIdentifier::from_base64(&encoded).unwrap();
        assert_eq!(id.to_string(), CANONICAL);
        assert_eq!(id.to_base64(), encoded);
    }

    #[test]
    fn base64_of_text_is_rejected_as_printable() {
        let encoded = BASE64.encode("joe@bloggs.com");
        assert_eq!(
            StableIdentifier::from_base64(&encoded).unwrap_err(),
            IdentifierError::Printable
        );
    }

    #[test]
    fn invalid_base64_is_encoding_error() {
        assert!(matches!(
            StableIdentifier::from_base64("%%%not base64%%%"),
            Err(IdentifierError::Encoding(_))
        ));
    }

    #[test]
    fn parse_accepts_canonical_and_lowercase() {
        let upper = StableIdentifier::parse(CANONICAL).unwrap();
        let lower = StableIdentifier::parse(&CANONICAL.to_lowercase()).unwrap();
        assert_eq!(upper, lower);
        assert_eq!(lower.to_string(), CANONICAL);
    }

    #[test]
    fn parse_rejects_other_shapes() {
        assert!(StableIdentifier::parse("0F1E2D3C4B5A69788796A5B4C3D2E1F0").is_err());
        assert!(StableIdentifier::parse("{0F1E2D3C-4B5A-6978-8796-A5B4C3D2E1F0}").is_err());
        assert!(StableIdentifier::parse("0F1E2D3C-4B5A-6978-8796-A5B4C3D2E1FZ").is_err());
        assert!(StableIdentifier::parse("0F1E2D3C-4B5A6-978-8796-A5B4C3D2E1F0").is_err());
    }

    #[test]
    fn serde_uses_canonical_string() {
        let id = StableIdentifier::parse(CANONICAL).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{CANONICAL}\""));
        let back: StableIdentifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn converts_into_malformed_identifier_error() {
        let err: DirsyncError = IdentifierError::Printable.into();
        assert!(matches!(err, DirsyncError::MalformedIdentifier(_)));
    }
}
