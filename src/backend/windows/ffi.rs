// SPDX-License-Identifier: Apache-2.0

//! The subset of `kernel32` used to build enclaves

#![allow(non_snake_case)]
#![allow(missing_docs)]

use std::ffi::c_void;
use std::mem::size_of;

use crate::types::{LaunchToken, Secs, SigStruct, TOKEN_SIZE};

pub type Bool = i32;
pub type Handle = *mut c_void;

pub const ENCLAVE_TYPE_SGX: u32 = 0x0000_0001;

/// ENCLAVE_CREATE_INFO_SGX: the SECS, verbatim
pub const CREATE_INFO_SIZE: usize = 4096;

const _: () = assert!(size_of::<Secs>() == CREATE_INFO_SIZE);

/// ENCLAVE_INIT_INFO_SGX
#[repr(C)]
pub struct InitInfo {
    sig_struct: [u8; 1808],
    reserved1: [u8; 240],
    einit_token: [u8; TOKEN_SIZE],
    reserved2: [u8; 1744],
}

const _: () = assert!(size_of::<InitInfo>() == 4096);
const _: () = assert!(size_of::<SigStruct>() == 1808);

impl InitInfo {
    pub fn new(sigstruct: &SigStruct, token: Option<&LaunchToken>) -> Box<Self> {
        let mut info = Box::new(Self {
            sig_struct: [0; 1808],
            reserved1: [0; 240],
            einit_token: [0; TOKEN_SIZE],
            reserved2: [0; 1744],
        });

        info.sig_struct.copy_from_slice(sigstruct.as_bytes());
        if let Some(token) = token {
            info.einit_token.copy_from_slice(token.as_bytes());
        }

        info
    }
}

#[link(name = "kernel32")]
extern "system" {
    pub fn GetCurrentProcess() -> Handle;

    pub fn GetLastError() -> u32;

    pub fn VirtualAlloc(
        lpAddress: *mut c_void,
        dwSize: usize,
        flAllocationType: u32,
        flProtect: u32,
    ) -> *mut c_void;

    pub fn VirtualFree(lpAddress: *mut c_void, dwSize: usize, dwFreeType: u32) -> Bool;

    pub fn VirtualProtect(
        lpAddress: *mut c_void,
        dwSize: usize,
        flNewProtect: u32,
        lpflOldProtect: *mut u32,
    ) -> Bool;

    pub fn CreateEnclave(
        hProcess: Handle,
        lpAddress: *mut c_void,
        dwSize: usize,
        dwInitialCommitment: usize,
        flEnclaveType: u32,
        lpEnclaveInformation: *const c_void,
        dwInfoLength: u32,
        lpEnclaveError: *mut u32,
    ) -> *mut c_void;

    pub fn LoadEnclaveData(
        hProcess: Handle,
        lpAddress: *mut c_void,
        lpBuffer: *const c_void,
        nSize: usize,
        flProtect: u32,
        lpPageInformation: *const c_void,
        dwInfoLength: u32,
        lpNumberOfBytesWritten: *mut usize,
        lpEnclaveError: *mut u32,
    ) -> Bool;

    pub fn InitializeEnclave(
        hProcess: Handle,
        lpAddress: *mut c_void,
        lpEnclaveInformation: *const c_void,
        dwInfoLength: u32,
        lpEnclaveError: *mut u32,
    ) -> Bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use testaso::testaso;

    testaso! {
        struct InitInfo: 1, 4096 => {
            sig_struct: 0,
            reserved1: 1808,
            einit_token: 2048,
            reserved2: 2352
        }
    }
}
