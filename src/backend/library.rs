// SPDX-License-Identifier: Apache-2.0

//! The user-mode enclave library (`libsgx_enclave_common`)
//!
//! The library is loaded at runtime so that hosts without it can still fall
//! back to the driver. It chooses the enclave placement itself and handles
//! launch control, so no launch token is needed.

use std::ffi::c_void;
use std::io;
use std::path::Path;
use std::ptr::null_mut;
use std::sync::Arc;

use libloading::Library as Dso;
use log::trace;

use super::{Backend, Datum, Kind};
use crate::enclave::{Enclave, Memory};
use crate::error::{Error, Result};
use crate::types::{Class, LaunchToken, PageFlags, SecInfo, Secs, SigStruct, PAGE_SIZE};

const ENCLAVE_TYPE_SGX1: u32 = 0x0000_0002;

const ENCLAVE_PAGE_READ: u32 = 1 << 0;
const ENCLAVE_PAGE_WRITE: u32 = 1 << 1;
const ENCLAVE_PAGE_EXECUTE: u32 = 1 << 2;
const ENCLAVE_PAGE_THREAD_CONTROL: u32 = 1 << 8;
const ENCLAVE_PAGE_UNVALIDATED: u32 = 1 << 12;

type EnclaveCreate = unsafe extern "C" fn(
    base_address: *mut c_void,
    virtual_size: usize,
    initial_commitment: usize,
    type_: u32,
    info: *const c_void,
    info_size: usize,
    enclave_error: *mut u32,
) -> *mut c_void;

type EnclaveLoadData = unsafe extern "C" fn(
    target_address: *mut c_void,
    target_size: usize,
    source_buffer: *const c_void,
    data_properties: u32,
    enclave_error: *mut u32,
) -> usize;

type EnclaveInitialize = unsafe extern "C" fn(
    base_address: *mut c_void,
    info: *const c_void,
    info_size: usize,
    enclave_error: *mut u32,
) -> bool;

type EnclaveDelete = unsafe extern "C" fn(base_address: *mut c_void, enclave_error: *mut u32) -> bool;

/// The resolved entry points of the enclave library
pub struct Api {
    create: EnclaveCreate,
    load_data: EnclaveLoadData,
    initialize: EnclaveInitialize,
    delete: EnclaveDelete,

    // Keeps the entry points above mapped.
    _dso: Dso,
}

impl Api {
    /// Loads the library and resolves its entry points
    pub fn load(path: &Path) -> Result<Self> {
        let dso = unsafe { Dso::new(path) }.map_err(unavailable)?;

        // The symbols are copied out so that the library can be moved.
        let create = unsafe { *dso.get::<EnclaveCreate>(b"enclave_create\0").map_err(unavailable)? };
        let load_data =
            unsafe { *dso.get::<EnclaveLoadData>(b"enclave_load_data\0").map_err(unavailable)? };
        let initialize = unsafe {
            *dso.get::<EnclaveInitialize>(b"enclave_initialize\0")
                .map_err(unavailable)?
        };
        let delete = unsafe { *dso.get::<EnclaveDelete>(b"enclave_delete\0").map_err(unavailable)? };

        Ok(Self {
            create,
            load_data,
            initialize,
            delete,
            _dso: dso,
        })
    }

    /// Deletes an enclave created through this library
    pub fn delete(&self, addr: u64) -> Result<()> {
        let mut error = 0u32;
        let ok = unsafe { (self.delete)(addr as *mut c_void, &mut error) };
        check("enclave_delete", ok, error)
    }
}

fn unavailable(err: libloading::Error) -> Error {
    Error::Device(io::Error::new(io::ErrorKind::NotFound, err))
}

fn check(call: &'static str, ok: bool, code: u32) -> Result<()> {
    match (ok, code) {
        (true, 0) => Ok(()),
        _ => Err(Error::Platform { call, code }),
    }
}

/// Translates SECINFO into the library's page properties
pub fn protection(secinfo: SecInfo, extend: bool) -> u32 {
    let mut props = match secinfo.class() {
        Some(Class::Tcs) => ENCLAVE_PAGE_THREAD_CONTROL | ENCLAVE_PAGE_READ | ENCLAVE_PAGE_WRITE,
        Some(Class::Reg) => {
            let flags = secinfo.flags();
            let mut props = 0;
            if flags.contains(PageFlags::READ) {
                props |= ENCLAVE_PAGE_READ;
            }
            if flags.contains(PageFlags::WRITE) {
                props |= ENCLAVE_PAGE_WRITE;
            }
            if flags.contains(PageFlags::EXECUTE) {
                props |= ENCLAVE_PAGE_EXECUTE;
            }
            props
        }
        _ => 0,
    };

    if !extend {
        props |= ENCLAVE_PAGE_UNVALIDATED;
    }

    props
}

/// Builds enclaves through the enclave library
pub struct Library {
    api: Arc<Api>,
}

impl Library {
    /// Loads the enclave library at `path`
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self {
            api: Arc::new(Api::load(path)?),
        })
    }
}

impl Backend for Library {
    fn kind(&self) -> Kind {
        Kind::Library
    }

    fn create(&mut self, secs: &mut Secs) -> Result<Enclave> {
        let size = secs.size() as usize;
        let mut error = 0u32;

        let base = unsafe {
            (self.api.create)(
                null_mut(),
                size,
                size,
                ENCLAVE_TYPE_SGX1,
                secs.as_bytes().as_ptr() as *const c_void,
                secs.as_bytes().len(),
                &mut error,
            )
        };

        if base.is_null() {
            return Err(Error::Platform {
                call: "enclave_create",
                code: error,
            });
        }

        trace!("enclave_create placed {:#x} bytes at {:p}", size, base);
        secs.set_base(base as u64);

        Ok(Enclave::new(
            base as u64,
            size,
            false,
            Memory::Library(self.api.clone()),
        ))
    }

    fn add_page(
        &mut self,
        _enclave: &Enclave,
        addr: u64,
        page: &[u8],
        secinfo: SecInfo,
        extend: bool,
    ) -> Result<()> {
        let mut error = 0u32;

        let written = unsafe {
            (self.api.load_data)(
                addr as *mut c_void,
                PAGE_SIZE,
                page.as_ptr() as *const c_void,
                protection(secinfo, extend),
                &mut error,
            )
        };

        match written {
            PAGE_SIZE => Ok(()),
            _ => Err(Error::Platform {
                call: "enclave_load_data",
                code: error,
            }),
        }
    }

    fn finalize(
        &mut self,
        enclave: &Enclave,
        sigstruct: &SigStruct,
        _token: Option<&LaunchToken>,
    ) -> Result<()> {
        let mut error = 0u32;

        let ok = unsafe {
            (self.api.initialize)(
                enclave.addr() as *mut c_void,
                sigstruct.as_bytes().as_ptr() as *const c_void,
                sigstruct.as_bytes().len(),
                &mut error,
            )
        };

        check("enclave_initialize", ok, error)
    }
}

/// Reports whether the enclave library loads
pub fn datum(path: &Path) -> Datum {
    let result = Api::load(path);

    Datum {
        name: "Enclave library".into(),
        pass: result.is_ok(),
        info: Some(path.display().to_string()),
        mesg: result.err().map(|e| {
            format!(
                "{}. Install the Intel SGX platform software to build enclaves \
                 without the legacy driver.",
                e
            )
        }),
    }
}
