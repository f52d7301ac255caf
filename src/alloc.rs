// SPDX-License-Identifier: Apache-2.0

//! Naturally aligned enclave reservations
//!
//! An enclave's base must be aligned to its (power-of-two) size, but the OS
//! offers no "N bytes aligned to N" primitive. So twice the size is reserved
//! and the unused head and tail are released:
//!
//! ```text
//! [............xxxxxxxxxxxxxxxxxxxxxxxx...............]
//!  ^           ^                       ^              ^
//!  raw         base            base + size     raw + 2 * size
//! ```
//!
//! When the mapping is backed by the SGX device, the driver aligns it
//! already and exactly `size` bytes are mapped.

use crate::error::{Error, Result};

/// Where an aligned region falls inside a double-sized reservation
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    raw: usize,
    base: usize,
    size: usize,
}

impl Layout {
    /// Places a region of `size` bytes inside a reservation starting at `raw`
    pub fn new(raw: usize, size: usize) -> Result<Self> {
        if !size.is_power_of_two() {
            return Err(Error::InvalidParameter("enclave size must be a power of two"));
        }

        let overflow = Error::InvalidParameter("enclave size overflows the address space");
        let reserved = size.checked_mul(2).ok_or(overflow)?;
        let end = raw
            .checked_add(reserved)
            .ok_or(Error::InvalidParameter("reservation overflows the address space"))?;

        // Cannot overflow: base + size <= raw + 2 * size == end
        let base = (raw + (size - 1)) & !(size - 1);
        debug_assert!(base + size <= end);

        Ok(Self { raw, base, size })
    }

    /// The size of the double-sized reservation
    pub fn reserved(&self) -> usize {
        self.size * 2
    }

    /// The aligned base address
    pub fn base(&self) -> usize {
        self.base
    }

    /// The number of unused bytes before `base`
    pub fn prefix(&self) -> usize {
        self.base - self.raw
    }

    /// The number of unused bytes after `base + size`
    pub fn suffix(&self) -> usize {
        self.raw + self.reserved() - (self.base + self.size)
    }
}

#[cfg(unix)]
pub use self::unix::{reserve, reserve_backed};

#[cfg(unix)]
mod unix {
    use super::Layout;
    use crate::error::{Error, Result};

    use std::fs::File;

    use log::trace;
    use mmarinus::{perms, Kind, Map};

    const RWX: libc::c_int = libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC;

    /// Reserves an anonymous, readable, writable and executable region of
    /// `size` bytes aligned to `size`
    ///
    /// The region is unmapped when the returned map is dropped.
    pub fn reserve(size: usize) -> Result<Map<perms::Unknown>> {
        if !size.is_power_of_two() {
            return Err(Error::InvalidParameter("enclave size must be a power of two"));
        }

        let reserved = size
            .checked_mul(2)
            .ok_or(Error::InvalidParameter("enclave size overflows the address space"))?;

        // Any failure in `trim` drops (and so unmaps) whatever is left of
        // the reservation.
        let map = Map::map(reserved)
            .anywhere()
            .anonymously()
            .unknown(Kind::Private, RWX)
            .map_err(|_| Error::OutOfMemory)?;

        trim(map, size)
    }

    /// Releases the unaligned head and tail of a double-sized reservation
    pub(super) fn trim(map: Map<perms::Unknown>, size: usize) -> Result<Map<perms::Unknown>> {
        let layout = Layout::new(map.addr(), size)?;
        debug_assert_eq!(map.size(), layout.reserved());
        trace!(
            "aligning {:#x} bytes at {:#x}: releasing {:#x} before, {:#x} after",
            size,
            layout.base(),
            layout.prefix(),
            layout.suffix()
        );

        let map = match layout.prefix() {
            0 => map,
            _ => {
                let (_, map) = map
                    .split_at(layout.base())
                    .map_err(|_| Error::OutOfMemory)?;
                map
            }
        };

        let map = match layout.suffix() {
            0 => map,
            _ => {
                let (map, _) = map.split(size).map_err(|_| Error::OutOfMemory)?;
                map
            }
        };

        Ok(map)
    }

    /// Maps exactly `size` bytes of the SGX device
    ///
    /// The driver places device mappings at naturally aligned addresses;
    /// anything else is reported as an internal error.
    pub fn reserve_backed(size: usize, file: &mut File) -> Result<Map<perms::Unknown>> {
        if !size.is_power_of_two() {
            return Err(Error::InvalidParameter("enclave size must be a power of two"));
        }

        let map = Map::map(size)
            .anywhere()
            .from(file, 0)
            .unknown(Kind::Shared, RWX)
            .map_err(|_| Error::OutOfMemory)?;

        if map.addr() % size != 0 {
            return Err(Error::Unexpected("device mapping is not naturally aligned"));
        }

        trace!("mapped {:#x} device bytes at {:#x}", size, map.addr());
        Ok(map)
    }
}

#[cfg(windows)]
pub use self::windows::{release, reserve};

#[cfg(windows)]
mod windows {
    use super::Layout;
    use crate::backend::windows::ffi::*;
    use crate::backend::windows::{
        MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READWRITE,
    };
    use crate::error::{Error, Result};

    use log::trace;

    /// Reserves and commits a region of `size` bytes aligned to `size`
    ///
    /// Returns the aligned base, which must later be passed to [`release`].
    pub fn reserve(size: usize) -> Result<usize> {
        if !size.is_power_of_two() {
            return Err(Error::InvalidParameter("enclave size must be a power of two"));
        }

        let reserved = size
            .checked_mul(2)
            .ok_or(Error::InvalidParameter("enclave size overflows the address space"))?;

        let raw = unsafe {
            VirtualAlloc(
                std::ptr::null_mut(),
                reserved,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_EXECUTE_READWRITE,
            )
        };
        if raw.is_null() {
            return Err(Error::OutOfMemory);
        }

        let abandon = |err| {
            unsafe { VirtualFree(raw, 0, MEM_RELEASE) };
            err
        };

        let layout = Layout::new(raw as usize, size).map_err(abandon)?;
        trace!(
            "aligning {:#x} bytes at {:#x}: decommitting {:#x} before, {:#x} after",
            size,
            layout.base(),
            layout.prefix(),
            layout.suffix()
        );

        // Only the reservation's first address can be released, so the
        // unused ends are decommitted instead.
        if layout.prefix() != 0 && unsafe { VirtualFree(raw, layout.prefix(), MEM_DECOMMIT) } == 0
        {
            return Err(abandon(Error::OutOfMemory));
        }

        let tail = (layout.base() + size) as *mut _;
        if layout.suffix() != 0 && unsafe { VirtualFree(tail, layout.suffix(), MEM_DECOMMIT) } == 0
        {
            return Err(abandon(Error::OutOfMemory));
        }

        Ok(layout.base())
    }

    /// Decommits a region returned by [`reserve`]
    pub fn release(base: usize, size: usize) -> Result<()> {
        match unsafe { VirtualFree(base as *mut _, size, MEM_DECOMMIT) } {
            0 => Err(Error::Platform {
                call: "VirtualFree",
                code: unsafe { GetLastError() },
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn already_aligned() {
        let layout = Layout::new(0x10000, 0x10000).unwrap();
        assert_eq!(layout.base(), 0x10000);
        assert_eq!(layout.prefix(), 0);
        assert_eq!(layout.suffix(), 0x10000);
    }

    #[test]
    fn unaligned() {
        let layout = Layout::new(0x7f00_0000_3000, 0x10000).unwrap();
        assert_eq!(layout.base(), 0x7f00_0001_0000);
        assert_eq!(layout.prefix(), 0xd000);
        assert_eq!(layout.suffix(), 0x3000);
        assert_eq!(layout.prefix() + 0x10000 + layout.suffix(), layout.reserved());
    }

    #[test]
    fn every_power_of_two() {
        let raw = 0x5555_5000;
        for shift in 12..30 {
            let size = 1usize << shift;
            let layout = Layout::new(raw, size).unwrap();
            assert_eq!(layout.base() % size, 0);
            assert!(layout.base() >= raw);
            assert!(layout.base() + size <= raw + 2 * size);
        }
    }

    #[test]
    fn rejects() {
        for size in [0, 3, 0x3000, 0x10001] {
            let err = Layout::new(0x1000, size).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        }

        let huge = 1usize << (usize::BITS - 1);
        assert!(Layout::new(0x1000, huge).is_err());
        assert!(Layout::new(usize::MAX - 0x1000, 0x1000).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn reservation() {
        for size in [0x1000, 0x10000, 0x200000] {
            let map = reserve(size).unwrap();
            assert_eq!(map.addr() % size, 0);
            assert_eq!(map.size(), size);
        }

        assert!(reserve(0x3000).is_err());
    }

    /// Whether any page of the range is mapped
    #[cfg(unix)]
    fn mapped(addr: usize, len: usize) -> bool {
        use crate::types::PAGE_SIZE;

        let mut vec = [0u8; 1];
        (addr..addr + len).step_by(PAGE_SIZE).any(|page| unsafe {
            libc::mincore(page as *mut libc::c_void, PAGE_SIZE, vec.as_mut_ptr() as _) == 0
        })
    }

    #[cfg(unix)]
    #[test]
    fn releases_head_and_tail() {
        use mmarinus::{Kind, Map};

        let size = 0x10000;
        let raw = Map::map(size * 2)
            .anywhere()
            .anonymously()
            .unknown(Kind::Private, libc::PROT_READ)
            .unwrap_or_else(|e| panic!("{}", e.err));

        let start = raw.addr();
        let layout = Layout::new(start, size).unwrap();
        assert!(mapped(start, layout.reserved()));

        let map = unix::trim(raw, size).unwrap();
        assert_eq!(map.addr(), layout.base());
        assert_eq!(map.size(), size);
        assert!(mapped(map.addr(), size));
        assert!(!mapped(start, layout.prefix()));
        assert!(!mapped(layout.base() + size, layout.suffix()));

        drop(map);
        assert!(!mapped(start, layout.reserved()));
    }
}
