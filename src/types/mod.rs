// SPDX-License-Identifier: Apache-2.0

//! Hardware structure layouts shared by every backend
//!
//! These structures are consumed byte-for-byte by the CPU, the kernel driver,
//! the enclave library and the Windows enclave API, so their layouts are
//! fixed. Section references refer to the Intel SDM, Volume 3D.

mod attr;
mod secinfo;
mod secs;
mod sigstruct;
mod token;

pub use attr::{Attributes, Flags as AttributeFlags, Xfrm};
pub use secinfo::{Class, Flags as PageFlags, SecInfo};
pub use secs::{Secs, SSA_FRAME_SIZE};
pub use sigstruct::{SigStruct, HEADER1, HEADER2, MODULUS_SIZE};
pub use token::{LaunchToken, TOKEN_SIZE};

use primordial::Page;

/// The size of a single enclave page
pub const PAGE_SIZE: usize = Page::SIZE;

/// Views a plain-old-data structure as its raw bytes.
///
/// # Safety
///
/// `T` must be `repr(C)` and must not contain uninitialized padding.
pub(crate) unsafe fn bytes_of<T>(value: &T) -> &[u8] {
    std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>())
}

/// Views a plain-old-data structure as its raw, mutable bytes.
///
/// # Safety
///
/// `T` must be `repr(C)`, must not contain padding, and every byte pattern
/// must be a valid `T`.
pub(crate) unsafe fn bytes_of_mut<T>(value: &mut T) -> &mut [u8] {
    std::slice::from_raw_parts_mut(value as *mut T as *mut u8, std::mem::size_of::<T>())
}
