// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;

use bitflags::bitflags;

bitflags! {
    /// Page access permissions and state
    ///
    /// Section 38.11.1
    pub struct Flags: u64 {
        /// The page can be read from inside the enclave
        const READ = 1 << 0;
        /// The page can be written from inside the enclave
        const WRITE = 1 << 1;
        /// The page can be executed from inside the enclave
        const EXECUTE = 1 << 2;
        /// The page is pending acceptance
        const PENDING = 1 << 3;
        /// The page has been modified
        const MODIFIED = 1 << 4;
        /// A permission restriction is in progress
        const PR = 1 << 5;
    }
}

/// The class of an enclave page
///
/// Section 38.11.2
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Class {
    /// The SGX Enclave Control Structure
    Secs = 0,
    /// A Thread Control Structure
    Tcs = 1,
    /// A regular page of code or data
    Reg = 2,
    /// A version array page
    Va = 3,
    /// A page being trimmed
    Trim = 4,
}

impl Class {
    fn from_raw(class: u8) -> Option<Self> {
        Some(match class {
            0 => Self::Secs,
            1 => Self::Tcs,
            2 => Self::Reg,
            3 => Self::Va,
            4 => Self::Trim,
            _ => return None,
        })
    }
}

/// Security information for a page (SECINFO)
///
/// The first quadword carries the permission bits in bits 0-7 and the page
/// class in bits 8-15; the remainder is reserved and must be zero.
///
/// Section 38.11
#[repr(C, align(64))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SecInfo {
    flags: u64,
    reserved: [u64; 7],
}

impl SecInfo {
    /// Creates a SECINFO for a regular page with the given permissions
    pub const fn reg(flags: Flags) -> Self {
        Self::new(Class::Reg, flags)
    }

    /// Creates a SECINFO for a thread control page
    pub const fn tcs() -> Self {
        Self::new(Class::Tcs, Flags::empty())
    }

    const fn new(class: Class, flags: Flags) -> Self {
        Self {
            flags: flags.bits() | (class as u64) << 8,
            reserved: [0; 7],
        }
    }

    /// Creates a SECINFO from its raw first quadword
    pub const fn from_raw(flags: u64) -> Self {
        Self {
            flags,
            reserved: [0; 7],
        }
    }

    /// The page permissions
    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(self.flags & 0xff)
    }

    /// The page class, if it is a known one
    pub fn class(&self) -> Option<Class> {
        Class::from_raw((self.flags >> 8) as u8)
    }

    /// The raw first quadword, as measured by EADD
    pub fn raw(&self) -> u64 {
        self.flags
    }
}

impl Display for SecInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let letter = |b, c| if b { c } else { '-' };

        write!(
            f,
            "{}{}{}{}",
            letter(self.flags().contains(Flags::READ), 'r'),
            letter(self.flags().contains(Flags::WRITE), 'w'),
            letter(self.flags().contains(Flags::EXECUTE), 'x'),
            match self.class() {
                Some(Class::Tcs) => 't',
                Some(Class::Reg) => ' ',
                _ => '?',
            }
        )
    }
}
