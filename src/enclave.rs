// SPDX-License-Identifier: Apache-2.0

use std::fmt;

#[cfg(unix)]
use std::sync::Arc;

use log::debug;
#[cfg(unix)]
use mmarinus::{perms, Map};

#[cfg(unix)]
use crate::backend::library::Api;
use crate::error::Result;

/// The address reported for enclaves that are only measured
pub const PHONY_BASE: u64 = 0x0000_ffff_0000_0000;

/// Who owns an enclave's address range
pub(crate) enum Memory {
    /// Nothing was created; the enclave was only measured
    Phony,

    /// Mapped by the host; unmapped when dropped
    #[cfg(unix)]
    Mapped(Map<perms::Unknown>),

    /// Created by the user-mode enclave library
    #[cfg(unix)]
    Library(Arc<Api>),

    /// Created by the OS enclave API
    #[cfg(windows)]
    Os,

    /// Committed by the allocator for a simulated enclave
    #[cfg(windows)]
    Reserved,
}

/// A created enclave
///
/// The handle owns the enclave's address range until it is destroyed.
/// Dropping a host-mapped handle unmaps its memory; enclaves created by the
/// enclave library or the OS must be released with [`Enclave::destroy`].
pub struct Enclave {
    addr: u64,
    size: usize,
    simulate: bool,
    memory: Memory,
}

impl fmt::Debug for Enclave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enclave")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("size", &format_args!("{:#x}", self.size))
            .field("simulate", &self.simulate)
            .finish()
    }
}

impl Enclave {
    pub(crate) fn new(addr: u64, size: usize, simulate: bool, memory: Memory) -> Self {
        Self {
            addr,
            size,
            simulate,
            memory,
        }
    }

    pub(crate) fn phony(size: usize) -> Self {
        Self::new(PHONY_BASE, size, false, Memory::Phony)
    }

    /// The enclave base address
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// The enclave size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the enclave is simulated
    pub fn is_simulation(&self) -> bool {
        self.simulate
    }

    /// Whether the enclave exists only as a measurement
    pub fn is_phony(&self) -> bool {
        matches!(self.memory, Memory::Phony)
    }

    /// Releases the enclave and its address range
    pub fn destroy(self) -> Result<()> {
        debug!("destroying {:?}", self);

        match self.memory {
            Memory::Phony => Ok(()),

            #[cfg(unix)]
            Memory::Mapped(map) => {
                drop(map);
                Ok(())
            }

            #[cfg(unix)]
            Memory::Library(api) => api.delete(self.addr),

            #[cfg(windows)]
            Memory::Os => crate::backend::windows::release(self.addr),

            #[cfg(windows)]
            Memory::Reserved => crate::alloc::release(self.addr as usize, self.size),
        }
    }
}
