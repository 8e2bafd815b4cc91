//! Reader identity: names the data channel and travels over the control channel.
//!
//! Wire format: exactly 4 bytes, little-endian u32. The decimal text of the
//! same value is the data channel's file name.

use crate::error::{FifoError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

/// Size of the identifier payload on the control channel
pub const WIRE_LEN: usize = 4;

/// Largest accepted identifier (a `pid_t` must hold it)
pub const MAX_IDENTIFIER: u32 = i32::MAX as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identifier(NonZeroU32);

impl Identifier {
    /// Checked constructor. Zero, negative and out-of-range values are naming errors.
    pub fn new(raw: i64) -> Result<Self> {
        if raw <= 0 || raw > MAX_IDENTIFIER as i64 {
            return Err(FifoError::Naming { raw });
        }
        NonZeroU32::new(raw as u32)
            .map(Self)
            .ok_or(FifoError::Naming { raw })
    }

    /// Identifier of the calling process.
    pub fn current() -> Result<Self> {
        Self::new(std::process::id() as i64)
    }

    pub fn get(&self) -> u32 {
        self.0.get()
    }

    /// File name of the data channel owned by this identifier.
    pub fn channel_name(&self) -> String {
        self.0.to_string()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(WIRE_LEN);
        buf.put_u32_le(self.get());
        buf.freeze()
    }

    pub fn decode(mut payload: Bytes) -> Result<Self> {
        if payload.remaining() < WIRE_LEN {
            return Err(FifoError::rendezvous(format!(
                "identifier payload too short: {} of {} bytes",
                payload.remaining(),
                WIRE_LEN
            )));
        }
        let raw = payload.get_u32_le();
        Self::new(raw as i64).map_err(|_| {
            FifoError::rendezvous(format!("identifier {} out of range", raw))
        })
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Identifier {
    type Err = FifoError;

    fn from_str(s: &str) -> Result<Self> {
        let raw: i64 = s
            .trim()
            .parse()
            .map_err(|_| FifoError::rendezvous(format!("not a decimal identifier: {:?}", s)))?;
        Self::new(raw)
    }
}
