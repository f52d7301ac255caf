// SPDX-License-Identifier: Apache-2.0

//! Ioctls of the legacy (out-of-tree) `isgx` driver
//!
//! Unlike the upstream driver, `isgx` adds one page per call, addressed by
//! its absolute virtual address, and takes the launch token directly in
//! EINIT.

use std::marker::PhantomData;

use iocuddle::*;

use crate::types::{LaunchToken, SecInfo, Secs, SigStruct};

const SGX: Group = Group::new(0xA4);

/// SGX_IOC_ENCLAVE_CREATE
pub const ENCLAVE_CREATE: Ioctl<Write, &Create<'_>> = unsafe { SGX.write(0x00) };

/// SGX_IOC_ENCLAVE_ADD_PAGE
pub const ENCLAVE_ADD_PAGE: Ioctl<Write, &AddPage<'_>> = unsafe { SGX.write(0x01) };

/// SGX_IOC_ENCLAVE_INIT
pub const ENCLAVE_INIT: Ioctl<Write, &Init<'_>> = unsafe { SGX.write(0x02) };

/// Measure all sixteen 256-byte chunks of a page
const MEASURE_ALL: u16 = 0xffff;

#[repr(C)]
#[derive(Debug)]
/// Parameters of ECREATE: a pointer to the SECS
pub struct Create<'a>(u64, PhantomData<&'a ()>);

impl<'a> Create<'a> {
    pub fn new(secs: &'a Secs) -> Self {
        Create(secs as *const _ as _, PhantomData)
    }
}

/// Parameters of EADD (and EEXTEND)
#[repr(C, packed)]
pub struct AddPage<'a> {
    addr: u64,
    src: u64,
    secinfo: u64,
    mrmask: u16,
    phantom: PhantomData<&'a ()>,
}

impl<'a> AddPage<'a> {
    pub fn new(addr: u64, page: &'a [u8], secinfo: &'a SecInfo, extend: bool) -> Self {
        Self {
            addr,
            src: page.as_ptr() as _,
            secinfo: secinfo as *const _ as _,
            mrmask: match extend {
                true => MEASURE_ALL,
                false => 0,
            },
            phantom: PhantomData,
        }
    }
}

#[repr(C)]
#[derive(Debug)]
/// Parameters of EINIT
pub struct Init<'a> {
    addr: u64,
    sigstruct: u64,
    einittoken: u64,
    phantom: PhantomData<&'a ()>,
}

impl<'a> Init<'a> {
    pub fn new(addr: u64, sigstruct: &'a SigStruct, token: &'a LaunchToken) -> Self {
        Self {
            addr,
            sigstruct: sigstruct as *const _ as _,
            einittoken: token as *const _ as _,
            phantom: PhantomData,
        }
    }
}
