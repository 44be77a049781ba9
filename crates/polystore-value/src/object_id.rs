//! 12-byte document identifiers.
//!
//! Layout follows the document-store convention: a 4-byte big-endian
//! creation time in seconds, a 5-byte per-process random value, and a 3-byte
//! big-endian counter seeded randomly at startup.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};

use crate::error::ValueError;

/// Counter values wrap at 24 bits.
const COUNTER_MASK: u32 = 0x00FF_FFFF;

/// A 12-byte document identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generate a new identifier for the current time.
    pub fn new() -> Self {
        let seconds = u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX);
        let process = process_unique();
        let counter = next_counter().to_be_bytes();

        let mut bytes = [0_u8; 12];
        let (time_part, rest) = bytes.split_at_mut(4);
        let (process_part, counter_part) = rest.split_at_mut(5);
        time_part.copy_from_slice(&seconds.to_be_bytes());
        process_part.copy_from_slice(&process);
        // Lowest three bytes of the big-endian counter.
        if let Some(low) = counter.get(1..) {
            counter_part.copy_from_slice(low);
        }
        Self(bytes)
    }

    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Return the raw bytes.
    pub const fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Creation time encoded in the first four bytes.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let [a, b, c, d, ..] = self.0;
        let seconds = u32::from_be_bytes([a, b, c, d]);
        DateTime::from_timestamp(i64::from(seconds), 0)
    }

    /// Lower-case hexadecimal representation (24 characters).
    pub fn to_hex(&self) -> String {
        use std::fmt::Write;
        self.0.iter().fold(String::with_capacity(24), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
    }

    /// Parse a 24-character hexadecimal string.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::UnsupportedType`] if the string is not exactly
    /// 24 hexadecimal digits.
    pub fn parse_str(s: &str) -> Result<Self, ValueError> {
        let invalid = || ValueError::unsupported("object id", "string");
        if s.len() != 24 || !s.is_ascii() {
            return Err(invalid());
        }
        let mut bytes = [0_u8; 12];
        for (slot, pair) in bytes.iter_mut().zip(s.as_bytes().chunks(2)) {
            let text = std::str::from_utf8(pair).ok().ok_or_else(invalid)?;
            *slot = u8::from_str_radix(text, 16).ok().ok_or_else(invalid)?;
        }
        Ok(Self(bytes))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

fn process_unique() -> [u8; 5] {
    static PROCESS_UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();
    *PROCESS_UNIQUE.get_or_init(rand::random)
}

fn next_counter() -> u32 {
    static COUNTER: OnceLock<AtomicU32> = OnceLock::new();
    let counter = COUNTER.get_or_init(|| AtomicU32::new(rand::random::<u32>() & COUNTER_MASK));
    counter.fetch_add(1, Ordering::Relaxed) & COUNTER_MASK
}
