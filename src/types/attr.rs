// SPDX-License-Identifier: Apache-2.0

use bitflags::bitflags;

bitflags! {
    /// Enclave attribute flags
    ///
    /// Section 38.7.1
    pub struct Flags: u64 {
        /// The enclave has been initialized by EINIT
        const INIT = 1 << 0;
        /// The enclave permits debugger access
        const DEBUG = 1 << 1;
        /// The enclave runs in 64-bit mode
        const MODE64BIT = 1 << 2;
        /// The enclave may request the provisioning key
        const PROVISION_KEY = 1 << 4;
        /// The enclave may request the EINIT token key
        const EINIT_TOKEN_KEY = 1 << 5;
        /// Key separation and sharing is enabled
        const KSS = 1 << 7;
    }
}

bitflags! {
    /// XSAVE feature request mask
    ///
    /// Section 38.7.2.1
    pub struct Xfrm: u64 {
        /// x87 FPU state (must be set)
        const X87 = 1 << 0;
        /// SSE state (must be set)
        const SSE = 1 << 1;
        /// AVX state
        const AVX = 1 << 2;
    }
}

impl Default for Xfrm {
    fn default() -> Self {
        Xfrm::X87 | Xfrm::SSE
    }
}

/// The `ATTRIBUTES` field of the SECS and SIGSTRUCT
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Attributes {
    flags: u64,
    xfrm: u64,
}

impl Attributes {
    /// Creates attributes from flags and a feature mask
    pub const fn new(flags: Flags, xfrm: Xfrm) -> Self {
        Self {
            flags: flags.bits(),
            xfrm: xfrm.bits(),
        }
    }

    /// Creates attributes from raw values, preserving unknown bits
    pub const fn from_raw(flags: u64, xfrm: u64) -> Self {
        Self { flags, xfrm }
    }

    /// The attribute flags
    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(self.flags)
    }

    /// The raw attribute flags, including unknown bits
    pub fn raw_flags(&self) -> u64 {
        self.flags
    }

    /// The raw feature request mask
    pub fn xfrm(&self) -> u64 {
        self.xfrm
    }

    /// The 16-byte wire encoding used by the AESM protocol
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.flags.to_le_bytes());
        bytes[8..].copy_from_slice(&self.xfrm.to_le_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testaso::testaso;

    testaso! {
        struct Attributes: 8, 16 => {
            flags: 0,
            xfrm: 8
        }
    }

    #[test]
    fn default_xfrm() {
        assert_eq!(Xfrm::default().bits(), 0x3);
    }

    #[test]
    fn encoding() {
        let attr = Attributes::new(Flags::MODE64BIT | Flags::DEBUG, Xfrm::default());
        assert_eq!(
            attr.to_bytes(),
            [6, 0, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(attr.flags(), Flags::MODE64BIT | Flags::DEBUG);
    }
}
