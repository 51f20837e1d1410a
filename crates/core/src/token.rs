use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

pub const MAX_DRIFT_MS: u64 = 300_000; // 5 minutes

/// Returns the current wall-clock time as milliseconds since Unix epoch.
pub fn physical_now() -> Result<u64, CoreError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|_| CoreError::InvalidData("system clock before epoch".into()))
}

/// A 12-byte per-dataset ordering token: 8 bytes wall_ms (big-endian u64)
/// followed by 4 bytes counter (big-endian u32). Tokens from one store are
/// strictly monotonic; comparing tokens resolves delivery-order ambiguity.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct SequenceToken {
    wall_ms: u64,
    counter: u32,
}

impl SequenceToken {
    pub fn new(wall_ms: u64, counter: u32) -> Self {
        Self { wall_ms, counter }
    }

    pub fn wall_ms(&self) -> u64 {
        self.wall_ms
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn to_bytes(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[..8].copy_from_slice(&self.wall_ms.to_be_bytes());
        buf[8..].copy_from_slice(&self.counter.to_be_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; 12]) -> Result<Self, CoreError> {
        let wall_ms = u64::from_be_bytes(bytes[..8].try_into().unwrap());
        let counter = u32::from_be_bytes(bytes[8..].try_into().unwrap());
        Ok(Self { wall_ms, counter })
    }
}

impl Ord for SequenceToken {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl PartialOrd for SequenceToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for SequenceToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for SequenceToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        let arr: [u8; 12] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| serde::de::Error::invalid_length(v.len(), &"12 bytes"))?;
        SequenceToken::from_bytes(&arr).map_err(serde::de::Error::custom)
    }
}

/// A clock that generates monotonically increasing sequence tokens.
/// One lives inside each change store; every append and every dataset id
/// minted by that store draws from it.
pub struct TokenClock {
    wall_ms: u64,
    counter: u32,
}

impl TokenClock {
    pub fn new() -> Self {
        Self {
            wall_ms: 0,
            counter: 0,
        }
    }

    /// Generate the next monotonically increasing token.
    pub fn tick(&mut self) -> Result<SequenceToken, CoreError> {
        let now = physical_now()?;

        let token = if now > self.wall_ms {
            SequenceToken::new(now, 0)
        } else {
            SequenceToken::new(self.wall_ms, self.counter + 1)
        };

        self.wall_ms = token.wall_ms;
        self.counter = token.counter;
        Ok(token)
    }

    /// Fast-forward past an already-issued token, so the next tick compares
    /// greater than it. Used when a store reopens over persisted records.
    pub fn observe(&mut self, seen: &SequenceToken) -> Result<(), CoreError> {
        let now = physical_now()?;

        // Reject tokens too far in the future; they indicate a corrupt
        // record or a badly skewed clock, not normal operation.
        if seen.wall_ms > now + MAX_DRIFT_MS {
            return Err(CoreError::TokenDriftTooLarge {
                delta_ms: seen.wall_ms - now,
                max_ms: MAX_DRIFT_MS,
            });
        }

        if (seen.wall_ms, seen.counter) > (self.wall_ms, self.counter) {
            self.wall_ms = seen.wall_ms;
            self.counter = seen.counter;
        }
        Ok(())
    }
}

impl Default for TokenClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_monotonicity() {
        let mut clock = TokenClock::new();
        let mut prev = clock.tick().unwrap();
        for _ in 0..100 {
            let next = clock.tick().unwrap();
            assert!(next > prev, "expected {next:?} > {prev:?}");
            prev = next;
        }
    }

    #[test]
    fn same_wall_time_increments_counter() {
        let mut clock = TokenClock::new();
        // Park the clock ahead of physical time so ticks share a wall_ms
        let future_ms = physical_now().unwrap() + 100_000;
        clock.wall_ms = future_ms;
        clock.counter = 0;

        let t1 = clock.tick().unwrap();
        assert_eq!(t1.wall_ms(), future_ms);
        assert_eq!(t1.counter(), 1);

        let t2 = clock.tick().unwrap();
        assert_eq!(t2.wall_ms(), future_ms);
        assert_eq!(t2.counter(), 2);
    }

    #[test]
    fn byte_roundtrip() {
        let token = SequenceToken::new(1_700_000_000_000, 42);
        let bytes = token.to_bytes();
        let recovered = SequenceToken::from_bytes(&bytes).unwrap();
        assert_eq!(token, recovered);
    }

    #[test]
    fn ordering_matches_bytes() {
        let pairs = vec![
            (SequenceToken::new(100, 0), SequenceToken::new(200, 0)),
            (SequenceToken::new(100, 0), SequenceToken::new(100, 1)),
            (SequenceToken::new(100, 999), SequenceToken::new(101, 0)),
            (SequenceToken::new(0, 0), SequenceToken::new(0, 1)),
        ];

        for (a, b) in &pairs {
            let bytes_a = a.to_bytes();
            let bytes_b = b.to_bytes();
            assert_eq!(
                a.cmp(b),
                bytes_a.cmp(&bytes_b),
                "token ordering doesn't match byte ordering for {a:?} vs {b:?}"
            );
            assert!(a < b, "expected {a:?} < {b:?}");
        }
    }

    #[test]
    fn observe_fast_forwards() {
        let mut clock = TokenClock::new();
        let now = physical_now().unwrap();
        let seen = SequenceToken::new(now + 5_000, 17);

        clock.observe(&seen).unwrap();
        let next = clock.tick().unwrap();
        assert!(next > seen, "tick after observe must exceed the observed token");
    }

    #[test]
    fn observe_ignores_stale_tokens() {
        let mut clock = TokenClock::new();
        let t1 = clock.tick().unwrap();
        clock.observe(&SequenceToken::new(0, 0)).unwrap();
        let t2 = clock.tick().unwrap();
        assert!(t2 > t1, "observing an old token must not rewind the clock");
    }

    #[test]
    fn drift_rejection() {
        let mut clock = TokenClock::new();
        let now = physical_now().unwrap();
        let seen = SequenceToken::new(now + MAX_DRIFT_MS + 1, 0);
        let result = clock.observe(&seen);
        assert!(result.is_err());
        match result.unwrap_err() {
            CoreError::TokenDriftTooLarge { delta_ms, max_ms } => {
                assert!(delta_ms > MAX_DRIFT_MS);
                assert_eq!(max_ms, MAX_DRIFT_MS);
            }
            other => panic!("expected TokenDriftTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn within_drift_accepted() {
        let mut clock = TokenClock::new();
        let now = physical_now().unwrap();
        // Exactly at the boundary should be accepted
        let seen = SequenceToken::new(now + MAX_DRIFT_MS, 5);
        clock.observe(&seen).unwrap();
        let next = clock.tick().unwrap();
        assert!(next > seen);
    }
}
