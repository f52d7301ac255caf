// SPDX-License-Identifier: Apache-2.0

//! The legacy out-of-tree SGX driver (`/dev/isgx`)

mod ioctls;

use std::fs::{File, OpenOptions};
use std::path::Path;

use log::trace;

use super::{Backend, Datum, Kind};
use crate::alloc;
use crate::enclave::{Enclave, Memory};
use crate::error::{Error, Result};
use crate::types::{LaunchToken, SecInfo, Secs, SigStruct};
use ioctls::*;

/// The legacy SGX driver
///
/// Enclave memory is a mapping of the device itself, so the driver decides
/// (and aligns) the placement.
pub struct Driver {
    file: File,
}

impl Driver {
    /// Opens the driver's device node
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(Error::Device)?;

        Ok(Self { file })
    }
}

impl Backend for Driver {
    fn kind(&self) -> Kind {
        Kind::Driver
    }

    fn needs_launch_token(&self) -> bool {
        true
    }

    fn create(&mut self, secs: &mut Secs) -> Result<Enclave> {
        let size = secs.size() as usize;

        // Dropping the map on failure unmaps it again.
        let map = alloc::reserve_backed(size, &mut self.file)?;
        secs.set_base(map.addr() as u64);

        trace!("ECREATE {:#x} bytes at {:#x}", size, map.addr());
        ENCLAVE_CREATE
            .ioctl(&mut self.file, &Create::new(secs))
            .map_err(|source| Error::Ioctl {
                call: "ECREATE",
                source,
            })?;

        Ok(Enclave::new(
            map.addr() as u64,
            size,
            false,
            Memory::Mapped(map),
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
        ENCLAVE_ADD_PAGE
            .ioctl(&mut self.file, &AddPage::new(addr, page, &secinfo, extend))
            .map_err(|source| Error::Ioctl {
                call: "EADD",
                source,
            })?;

        Ok(())
    }

    fn finalize(
        &mut self,
        enclave: &Enclave,
        sigstruct: &SigStruct,
        token: Option<&LaunchToken>,
    ) -> Result<()> {
        let token = token.ok_or(Error::Unexpected("EINIT without a launch token"))?;

        ENCLAVE_INIT
            .ioctl(&mut self.file, &Init::new(enclave.addr(), sigstruct, token))
            .map_err(|source| Error::Ioctl {
                call: "EINIT",
                source,
            })?;

        Ok(())
    }
}

/// Reports whether the driver device can be opened
pub fn datum(path: &Path) -> Datum {
    let pass = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .is_ok();

    Datum {
        name: "Driver".into(),
        pass,
        info: Some(path.display().to_string()),
        mesg: match pass {
            true => None,
            false => Some(format!(
                "{} could not be opened for writing. Load the isgx kernel module \
                 and check the permissions of the device node.",
                path.display()
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("isgx");

        let err = Driver::open(&path).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::Platform);

        let datum = datum(&path);
        assert!(!datum.pass);
        assert!(datum.mesg.is_some());
    }

    #[cfg(host_can_test_sgx)]
    #[test]
    fn open_device() {
        let driver = Driver::open(Path::new("/dev/isgx")).unwrap();
        assert_eq!(driver.kind(), Kind::Driver);
        assert!(driver.needs_launch_token());
    }
}
