// SPDX-License-Identifier: Apache-2.0

use super::attr::{Attributes, Flags, Xfrm};

/// The number of pages in a single State Save Area frame
///
/// Fixed at one page; the measurement of every enclave built by this loader
/// depends on this value.
pub const SSA_FRAME_SIZE: u32 = 1;

/// The SGX Enclave Control Structure (SECS)
///
/// This structure defines the address range and global attributes of an
/// enclave. It is handed to ECREATE (via the driver, the enclave library or
/// the OS) and is the first structure measured for every enclave.
///
/// Section 38.7
#[repr(C, align(4096))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Secs {
    size: u64,
    base: u64,
    ssa_frame_size: u32,
    misc_select: u32,
    reserved1: [u8; 24],
    attributes: Attributes,
    mrenclave: [u8; 32],
    reserved2: [u8; 32],
    mrsigner: [u8; 32],
    reserved3: [u8; 96],
    isv_prod_id: u16,
    isv_svn: u16,
    reserved4: [u8; 3836],
}

impl Secs {
    /// Creates the SECS for an enclave of `size` bytes at `base`
    ///
    /// A `base` of zero lets the platform choose the location.
    pub fn new(base: u64, size: u64, debug: bool) -> Self {
        let mut flags = Flags::MODE64BIT;
        if debug {
            flags |= Flags::DEBUG;
        }

        Self {
            size,
            base,
            ssa_frame_size: SSA_FRAME_SIZE,
            misc_select: 0,
            reserved1: [0; 24],
            attributes: Attributes::new(flags, Xfrm::default()),
            mrenclave: [0; 32],
            reserved2: [0; 32],
            mrsigner: [0; 32],
            reserved3: [0; 96],
            isv_prod_id: 0,
            isv_svn: 0,
            reserved4: [0; 3836],
        }
    }

    /// The enclave size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The enclave base address
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Records the base address chosen by the platform
    pub fn set_base(&mut self, base: u64) {
        self.base = base;
    }

    /// The SSA frame size in pages
    pub fn ssa_frame_size(&self) -> u32 {
        self.ssa_frame_size
    }

    /// The enclave attributes
    pub fn attributes(&self) -> Attributes {
        self.attributes
    }

    /// Views the structure as its raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        // Every field is an integer or a byte array and there is no padding.
        unsafe { super::bytes_of(self) }
    }
}
