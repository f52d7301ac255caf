// SPDX-License-Identifier: Apache-2.0

//! Enclave measurement (MRENCLAVE)
//!
//! The measurement is a SHA-256 digest over a log of 64-byte records, one
//! for each structural operation applied to the enclave: ECREATE once, EADD
//! for every page, and EEXTEND for every 256-byte chunk of each measured
//! page. Every backend feeds the same records in the same order, so the
//! digest does not depend on where (or whether) the enclave was built.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::types::{SecInfo, Secs, PAGE_SIZE};

const EEXTEND_CHUNK: usize = 256;

/// A finished enclave measurement
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Measurement([u8; 32]);

impl Measurement {
    /// The raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Measurement {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for Measurement {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Measurement({})", hex::encode(self.0))
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Accumulates the measurement of an enclave under construction
///
/// Calls must be made in build order: `create` once, `add_page` for every
/// page, then `finish`.
pub trait Measure {
    /// Records enclave creation (ECREATE)
    fn create(&mut self, secs: &Secs) -> Result<()>;

    /// Records the addition of one page (EADD, plus EEXTEND if `extend`)
    fn add_page(
        &mut self,
        base: u64,
        addr: u64,
        page: &[u8],
        secinfo: SecInfo,
        extend: bool,
    ) -> Result<()>;

    /// Returns the digest of every operation recorded so far (EINIT)
    fn finish(&self) -> Measurement;
}

/// The SHA-256 MRENCLAVE accumulator used by real hardware
#[derive(Clone, Debug, Default)]
pub struct Hasher(Sha256);

impl Hasher {
    /// Creates an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, tag: &[u8; 8], first: u64, second: u64) {
        let mut block = [0u8; 64];
        block[..8].copy_from_slice(tag);
        block[8..16].copy_from_slice(&first.to_le_bytes());
        block[16..24].copy_from_slice(&second.to_le_bytes());
        self.0.update(block);
    }
}

impl Measure for Hasher {
    fn create(&mut self, secs: &Secs) -> Result<()> {
        // "ECREATE\0", SSAFRAMESIZE (u32), SIZE (u64), zero padding
        let mut block = [0u8; 64];
        block[..8].copy_from_slice(b"ECREATE\0");
        block[8..12].copy_from_slice(&secs.ssa_frame_size().to_le_bytes());
        block[12..20].copy_from_slice(&secs.size().to_le_bytes());
        self.0.update(block);
        Ok(())
    }

    fn add_page(
        &mut self,
        base: u64,
        addr: u64,
        page: &[u8],
        secinfo: SecInfo,
        extend: bool,
    ) -> Result<()> {
        if page.len() != PAGE_SIZE {
            return Err(Error::InvalidParameter("page must be exactly one page long"));
        }

        let offset = addr
            .checked_sub(base)
            .ok_or(Error::InvalidParameter("page address is below the enclave base"))?;

        // "EADD\0\0\0\0", page offset, SECINFO flags, zero padding
        self.record(b"EADD\0\0\0\0", offset, secinfo.raw());

        if extend {
            for (i, chunk) in page.chunks(EEXTEND_CHUNK).enumerate() {
                // "EEXTEND\0", chunk offset, zero padding, chunk contents
                let chunk_offset = offset + (i * EEXTEND_CHUNK) as u64;
                let mut block = [0u8; 64];
                block[..8].copy_from_slice(b"EEXTEND\0");
                block[8..16].copy_from_slice(&chunk_offset.to_le_bytes());
                self.0.update(block);
                self.0.update(chunk);
            }
        }

        Ok(())
    }

    fn finish(&self) -> Measurement {
        Measurement(self.0.clone().finalize().into())
    }
}
