// SPDX-License-Identifier: Apache-2.0

//! Simulated enclaves
//!
//! No SGX instructions are involved: the enclave is an ordinary aligned
//! mapping, pages are copied into it and their permissions are applied with
//! the OS page protection calls. Thread control pages stay read-write so
//! that the simulated runtime can manage them.

use std::collections::HashMap;

use lset::{Contains, Span};
use log::{trace, warn};

use super::{Backend, Kind};
use crate::enclave::{Enclave, Memory};
use crate::error::{Error, Result};
use crate::types::{LaunchToken, SecInfo, Secs, SigStruct, PAGE_SIZE};

/// The simulation backend
#[derive(Debug, Default)]
pub struct Simulation {
    region: Option<Span<u64>>,
    pages: HashMap<u64, SecInfo>,
}

impl Simulation {
    /// Creates a simulation backend with no enclave yet
    pub fn new() -> Self {
        Self::default()
    }

    /// The address range of the simulated enclave, once created
    pub fn region(&self) -> Option<Span<u64>> {
        self.region
    }

    fn check(&self, addr: u64) -> Result<()> {
        let region = self.region.ok_or(Error::Unexpected("no simulated enclave"))?;
        let last = addr
            .checked_add(PAGE_SIZE as u64 - 1)
            .ok_or(Error::OutOfBounds { addr })?;

        match region.contains(&addr) && region.contains(&last) {
            true => Ok(()),
            false => Err(Error::OutOfBounds { addr }),
        }
    }

    /// Copies a page in and applies its permissions with `apply`
    ///
    /// If `apply` fails, the page's previous contents and protection are
    /// restored.
    fn load(
        &mut self,
        addr: u64,
        page: &[u8],
        secinfo: SecInfo,
        apply: impl FnOnce(u64, SecInfo) -> Result<()>,
    ) -> Result<()> {
        self.check(addr)?;
        let page = page
            .get(..PAGE_SIZE)
            .ok_or(Error::InvalidParameter("page must be exactly one page long"))?;

        // A page loaded earlier at this address may have been made read-only.
        unlock(addr)?;
        let dst = unsafe { std::slice::from_raw_parts_mut(addr as *mut u8, PAGE_SIZE) };
        let previous = dst.to_vec();
        dst.copy_from_slice(page);

        if let Err(err) = apply(addr, secinfo) {
            dst.copy_from_slice(&previous);
            if let Err(e) = relock(addr, self.pages.get(&addr).copied()) {
                warn!("unable to restore protection at {:#x}: {}", addr, e);
            }
            return Err(err);
        }

        self.pages.insert(addr, secinfo);
        Ok(())
    }
}

impl Backend for Simulation {
    fn kind(&self) -> Kind {
        Kind::Simulation
    }

    fn create(&mut self, secs: &mut Secs) -> Result<Enclave> {
        let size = secs.size() as usize;
        let enclave = reserve(size)?;
        secs.set_base(enclave.addr());

        trace!(
            "simulated enclave at {:#x}-{:#x}",
            enclave.addr(),
            enclave.addr() + secs.size()
        );

        self.pages.clear();
        self.region = Some(Span {
            start: enclave.addr(),
            count: secs.size(),
        });

        Ok(enclave)
    }

    fn add_page(
        &mut self,
        _enclave: &Enclave,
        addr: u64,
        page: &[u8],
        secinfo: SecInfo,
        _extend: bool,
    ) -> Result<()> {
        self.load(addr, page, secinfo, protect)
    }

    fn finalize(
        &mut self,
        _enclave: &Enclave,
        _sigstruct: &SigStruct,
        _token: Option<&LaunchToken>,
    ) -> Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
fn reserve(size: usize) -> Result<Enclave> {
    let map = crate::alloc::reserve(size)?;
    Ok(Enclave::new(
        map.addr() as u64,
        size,
        true,
        Memory::Mapped(map),
    ))
}

#[cfg(unix)]
fn unlock(addr: u64) -> Result<()> {
    mprotect(addr, libc::PROT_READ | libc::PROT_WRITE)
}

#[cfg(unix)]
fn protect(addr: u64, secinfo: SecInfo) -> Result<()> {
    mprotect(addr, protection(secinfo))
}

/// Puts back the protection of a page that was loaded before, or that of a
/// fresh reservation
#[cfg(unix)]
fn relock(addr: u64, previous: Option<SecInfo>) -> Result<()> {
    match previous {
        Some(secinfo) => protect(addr, secinfo),
        None => mprotect(addr, libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC),
    }
}

#[cfg(unix)]
fn mprotect(addr: u64, prot: libc::c_int) -> Result<()> {
    match unsafe { libc::mprotect(addr as *mut libc::c_void, PAGE_SIZE, prot) } {
        0 => Ok(()),
        _ => Err(Error::Protect(std::io::Error::last_os_error())),
    }
}

/// Translates SECINFO into `mprotect` flags
#[cfg(unix)]
pub fn protection(secinfo: SecInfo) -> libc::c_int {
    use crate::types::{Class, PageFlags};

    match secinfo.class() {
        Some(Class::Tcs) => libc::PROT_READ | libc::PROT_WRITE,
        Some(Class::Reg) => {
            let flags = secinfo.flags();
            let mut prot = libc::PROT_NONE;
            if flags.contains(PageFlags::READ) {
                prot |= libc::PROT_READ;
            }
            if flags.contains(PageFlags::WRITE) {
                prot |= libc::PROT_WRITE;
            }
            if flags.contains(PageFlags::EXECUTE) {
                prot |= libc::PROT_EXEC;
            }
            prot
        }
        _ => libc::PROT_NONE,
    }
}

#[cfg(windows)]
fn reserve(size: usize) -> Result<Enclave> {
    let base = crate::alloc::reserve(size)?;
    Ok(Enclave::new(base as u64, size, true, Memory::Reserved))
}

#[cfg(windows)]
fn unlock(addr: u64) -> Result<()> {
    super::windows::protect(addr, super::windows::PAGE_READWRITE)
}

#[cfg(windows)]
fn protect(addr: u64, secinfo: SecInfo) -> Result<()> {
    super::windows::protect(addr, super::windows::protection(secinfo, true))
}

#[cfg(windows)]
fn relock(addr: u64, previous: Option<SecInfo>) -> Result<()> {
    match previous {
        Some(secinfo) => protect(addr, secinfo),
        None => super::windows::protect(addr, super::windows::PAGE_EXECUTE_READWRITE),
    }
}
