use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::token::SequenceToken;

/// 16-byte dataset identifier in UUIDv7 layout, minted by a change store from
/// its own token clock: bytes [0..6] carry the creation wall-clock
/// milliseconds (big-endian) and the low 12 bits of bytes [6..8] carry the
/// creation counter. The remaining bits are random. A listener recovers the
/// embedded ranges via `creation_token` and subscribes from there with no
/// separate lookup.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatasetId(Uuid);

impl DatasetId {
    /// Mint an id embedding the given clock state. The counter is truncated
    /// to the 12 bits the v7 layout leaves free, so the embedded token is
    /// always <= the minting token.
    pub fn mint(token: SequenceToken) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..6].copy_from_slice(&token.wall_ms().to_be_bytes()[2..]);
        bytes[6] = 0x70 | ((token.counter() >> 8) & 0x0F) as u8;
        bytes[7] = (token.counter() & 0xFF) as u8;
        let tail: [u8; 8] = rand::random();
        bytes[8..].copy_from_slice(&tail);
        bytes[8] = 0x80 | (bytes[8] & 0x3F); // RFC 4122 variant
        Self(Uuid::from_bytes(bytes))
    }

    /// Recover the creation-time ordering hint embedded at mint time.
    pub fn creation_token(&self) -> SequenceToken {
        let b = self.0.as_bytes();
        let mut wall_ms = 0u64;
        for byte in &b[..6] {
            wall_ms = (wall_ms << 8) | u64::from(*byte);
        }
        let counter = (u32::from(b[6] & 0x0F) << 8) | u32::from(b[7]);
        SequenceToken::new(wall_ms, counter)
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| CoreError::InvalidData(format!("malformed dataset id: {s:?}")))
    }
}

impl fmt::Debug for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatasetId({})", &self.0.to_string()[..8])
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied collaborator identifier. Opaque to the engine; records
/// and shadow tables are keyed by it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AuthorId(String);

impl AuthorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AuthorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AuthorId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Debug for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthorId({:?})", self.0)
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_embeds_clock_state() {
        let token = SequenceToken::new(1_700_000_000_000, 42);
        let id = DatasetId::mint(token);
        assert_eq!(id.creation_token(), token);
    }

    #[test]
    fn counter_truncation_never_raises_the_derived_token() {
        let token = SequenceToken::new(1_700_000_000_000, 5_000); // > 12 bits
        let id = DatasetId::mint(token);
        let derived = id.creation_token();
        assert!(derived <= token);
        assert_eq!(derived.wall_ms(), token.wall_ms());
        assert_eq!(derived.counter(), 5_000 & 0x0FFF);
    }

    #[test]
    fn minted_ids_are_valid_v7_uuids() {
        let id = DatasetId::mint(SequenceToken::new(1_700_000_000_000, 1));
        let uuid = id.as_uuid();
        assert_eq!(uuid.get_version_num(), 7);
        let bytes = uuid.as_bytes();
        assert_eq!(bytes[8] & 0xC0, 0x80, "variant bits must be RFC 4122");
    }

    #[test]
    fn distinct_mints_same_token_differ() {
        let token = SequenceToken::new(1_700_000_000_000, 1);
        let a = DatasetId::mint(token);
        let b = DatasetId::mint(token);
        assert_ne!(a, b, "random tail should distinguish same-token mints");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(DatasetId::parse("not-a-uuid").is_err());
        let id = DatasetId::mint(SequenceToken::new(1_700_000_000_000, 0));
        assert_eq!(DatasetId::parse(&id.to_string()).unwrap(), id);
    }
}
