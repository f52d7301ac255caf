// SPDX-License-Identifier: Apache-2.0

//! The Windows enclave API
//!
//! `CreateEnclave`, `LoadEnclaveData` and `InitializeEnclave` wrap ECREATE,
//! EADD/EEXTEND and EINIT. The OS chooses the placement. Page protections
//! use the ordinary `PAGE_*` vocabulary plus two enclave-only bits.

#![cfg_attr(not(windows), allow(dead_code))]

#[cfg(windows)]
pub mod ffi;

use super::Datum;
use crate::types::{Class, PageFlags, SecInfo};

/// No access
pub const PAGE_NOACCESS: u32 = 0x01;
/// Read only
pub const PAGE_READONLY: u32 = 0x02;
/// Read and write
pub const PAGE_READWRITE: u32 = 0x04;
/// Execute only
pub const PAGE_EXECUTE: u32 = 0x10;
/// Read and execute
pub const PAGE_EXECUTE_READ: u32 = 0x20;
/// Read, write and execute
pub const PAGE_EXECUTE_READWRITE: u32 = 0x40;
/// The page is added without EEXTEND
pub const PAGE_ENCLAVE_UNVALIDATED: u32 = 0x2000_0000;
/// The page is a TCS
pub const PAGE_ENCLAVE_THREAD_CONTROL: u32 = 0x8000_0000;

/// `VirtualAlloc`: back the pages
pub const MEM_COMMIT: u32 = 0x0000_1000;
/// `VirtualAlloc`: reserve address space
pub const MEM_RESERVE: u32 = 0x0000_2000;
/// `VirtualFree`: drop the backing, keep the reservation
pub const MEM_DECOMMIT: u32 = 0x0000_4000;
/// `VirtualFree`: release the whole reservation
pub const MEM_RELEASE: u32 = 0x0000_8000;

/// Translates SECINFO into `PAGE_*` protection flags
///
/// Regular pages map onto the closest `PAGE_*` constant; combinations
/// without one lose their write permission.
pub fn protection(secinfo: SecInfo, simulate: bool) -> u32 {
    match secinfo.class() {
        Some(Class::Tcs) if simulate => PAGE_READWRITE,
        Some(Class::Tcs) => PAGE_ENCLAVE_THREAD_CONTROL | PAGE_READWRITE,
        Some(Class::Reg) => {
            let flags = secinfo.flags();
            let r = flags.contains(PageFlags::READ);
            let w = flags.contains(PageFlags::WRITE);
            let x = flags.contains(PageFlags::EXECUTE);

            match (r, w, x) {
                (true, true, true) => PAGE_EXECUTE_READWRITE,
                (true, _, true) => PAGE_EXECUTE_READ,
                (_, _, true) => PAGE_EXECUTE,
                (true, true, false) => PAGE_READWRITE,
                (true, false, false) => PAGE_READONLY,
                _ => PAGE_NOACCESS,
            }
        }
        _ => 0,
    }
}

/// Reports whether the Windows enclave API is available
pub fn datum() -> Datum {
    Datum {
        name: "Windows enclave API".into(),
        pass: cfg!(windows),
        info: None,
        mesg: None,
    }
}

#[cfg(windows)]
pub use self::os::*;

#[cfg(windows)]
mod os {
    use super::ffi::*;
    use super::*;
    use crate::backend::{Backend, Kind};
    use crate::enclave::{Enclave, Memory};
    use crate::error::{Error, Result};
    use crate::types::{LaunchToken, Secs, SigStruct, PAGE_SIZE};

    use std::ffi::c_void;
    use std::ptr::{null, null_mut};

    use log::trace;

    fn last_error(call: &'static str) -> Error {
        Error::Platform {
            call,
            code: unsafe { GetLastError() },
        }
    }

    /// Releases an enclave created by `CreateEnclave`
    pub fn release(addr: u64) -> Result<()> {
        match unsafe { VirtualFree(addr as *mut c_void, 0, MEM_RELEASE) } {
            0 => Err(last_error("VirtualFree")),
            _ => Ok(()),
        }
    }

    /// Changes the protection of one page
    pub fn protect(addr: u64, prot: u32) -> Result<()> {
        let mut old = 0u32;
        match unsafe { VirtualProtect(addr as *mut c_void, PAGE_SIZE, prot, &mut old) } {
            0 => Err(Error::Protect(std::io::Error::last_os_error())),
            _ => Ok(()),
        }
    }

    /// Builds enclaves through the Windows enclave API
    #[derive(Debug, Default)]
    pub struct Windows(());

    impl Windows {
        /// Creates the backend; the API needs no handle
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Backend for Windows {
        fn kind(&self) -> Kind {
            Kind::Windows
        }

        fn needs_launch_token(&self) -> bool {
            true
        }

        fn create(&mut self, secs: &mut Secs) -> Result<Enclave> {
            let size = secs.size() as usize;
            let mut error = 0u32;

            let base = unsafe {
                CreateEnclave(
                    GetCurrentProcess(),
                    null_mut(),
                    size,
                    size,
                    ENCLAVE_TYPE_SGX,
                    secs.as_bytes().as_ptr() as *const c_void,
                    CREATE_INFO_SIZE as u32,
                    &mut error,
                )
            };

            if base.is_null() {
                return Err(Error::Platform {
                    call: "CreateEnclave",
                    code: error,
                });
            }

            trace!("CreateEnclave placed {:#x} bytes at {:p}", size, base);
            secs.set_base(base as u64);
            Ok(Enclave::new(base as u64, size, false, Memory::Os))
        }

        fn add_page(
            &mut self,
            _enclave: &Enclave,
            addr: u64,
            page: &[u8],
            secinfo: SecInfo,
            extend: bool,
        ) -> Result<()> {
            let mut prot = protection(secinfo, false);
            if !extend {
                prot |= PAGE_ENCLAVE_UNVALIDATED;
            }

            let mut written = 0usize;
            let mut error = 0u32;
            let ok = unsafe {
                LoadEnclaveData(
                    GetCurrentProcess(),
                    addr as *mut c_void,
                    page.as_ptr() as *const c_void,
                    PAGE_SIZE,
                    prot,
                    null(),
                    0,
                    &mut written,
                    &mut error,
                )
            };

            match ok {
                0 => Err(Error::Platform {
                    call: "LoadEnclaveData",
                    code: error,
                }),
                _ => Ok(()),
            }
        }

        fn finalize(
            &mut self,
            enclave: &Enclave,
            sigstruct: &SigStruct,
            token: Option<&LaunchToken>,
        ) -> Result<()> {
            let info = InitInfo::new(sigstruct, token);
            let mut error = 0u32;

            let ok = unsafe {
                InitializeEnclave(
                    GetCurrentProcess(),
                    enclave.addr() as *mut c_void,
                    &*info as *const InitInfo as *const c_void,
                    std::mem::size_of::<InitInfo>() as u32,
                    &mut error,
                )
            };

            match ok {
                0 => Err(Error::Platform {
                    call: "InitializeEnclave",
                    code: error,
                }),
                _ => Ok(()),
            }
        }
    }
}
