//! Build identity.
//!
//! A [`BuildId`] names one build's workspace and output files, so two builds
//! whose files coexist on disk must never share one. The default generator
//! packs a millisecond timestamp, a process-wide monotonic counter and 32 random
//! bits into a single `u128` and renders it in base62. The counter alone
//! guarantees uniqueness within a process; the random bits separate processes
//! sharing an output directory.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const COUNTER_BITS: u32 = 32;
const RANDOM_BITS: u32 = 32;

/// Opaque identifier for one build. Always a safe single filename segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(String);

impl BuildId {
    /// Parse an id received from a caller (e.g. a download URL).
    ///
    /// Returns `None` for anything that could escape the output directory or
    /// that no generator would produce.
    pub fn parse(raw: &str) -> Option<Self> {
        let ok = !raw.is_empty()
            && raw.len() <= 64
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        ok.then(|| BuildId(raw.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: &str) -> Self {
        BuildId(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of build ids. Injected into the coordinator so tests can pin ids.
pub trait BuildIdGenerator: Send + Sync {
    fn next_id(&self) -> BuildId;
}

/// Timestamp + monotonic counter + random salt.
#[derive(Debug, Default)]
pub struct MonotonicIdGenerator {
    counter: AtomicU64,
}

impl MonotonicIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BuildIdGenerator for MonotonicIdGenerator {
    fn next_id(&self) -> BuildId {
        let millis = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).max(0) as u128;
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) as u128 & 0xFFFF_FFFF;
        let salt = rand::random::<u32>() as u128;
        let packed = (millis << (COUNTER_BITS + RANDOM_BITS)) | (seq << RANDOM_BITS) | salt;
        BuildId(base62_fixed(packed))
    }
}

/// Hands out a fixed list of ids in order, then repeats the last one.
///
/// Useful for deterministic tests, including deliberate collisions.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    ids: Mutex<Vec<String>>,
    last: Mutex<Option<String>>,
}

impl SequenceIdGenerator {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        ids.reverse();
        Self {
            ids: Mutex::new(ids),
            last: Mutex::new(None),
        }
    }
}

impl BuildIdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> BuildId {
        let mut ids = self.ids.lock().unwrap_or_else(|p| p.into_inner());
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        let id = match ids.pop() {
            Some(id) => {
                *last = Some(id.clone());
                id
            }
            None => last.clone().unwrap_or_else(|| "0".to_string()),
        };
        BuildId(id)
    }
}

const BASE62: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Digits needed for any `u128` (62^22 > 2^128).
const ID_WIDTH: usize = 22;

/// Zero-padded base62, so ids compare as strings in creation order.
fn base62_fixed(mut value: u128) -> String {
    let mut digits = [b'0'; ID_WIDTH];
    for digit in digits.iter_mut().rev() {
        *digit = BASE62[(value % 62) as usize];
        value /= 62;
    }
    digits.iter().map(|&b| char::from(b)).collect()
}
