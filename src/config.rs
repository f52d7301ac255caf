// SPDX-License-Identifier: Apache-2.0

//! Loader configuration

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::backend::Kind;
use crate::error::{Error, Result};

/// Loader configuration
///
/// Every field is optional in the TOML form; missing fields take the
/// platform defaults.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// The legacy SGX driver device
    pub device: PathBuf,

    /// The user-mode enclave library
    pub library: PathBuf,

    /// The AESM daemon socket
    pub aesm_socket: PathBuf,

    /// The timeout (in microseconds) passed with AESM requests
    pub aesm_timeout: u32,

    /// Forces a hardware backend instead of probing for one
    pub backend: Option<Kind>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: "/dev/isgx".into(),
            library: "libsgx_enclave_common.so.1".into(),
            aesm_socket: "/var/run/aesmd/aesm.socket".into(),
            aesm_timeout: 1_000_000,
            backend: None,
        }
    }
}

impl Config {
    /// Reads a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("unable to read {:?}: {}", path, e)))?;
        text.parse()
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;

        if config.backend == Some(Kind::Simulation) {
            return Err(Error::Config(
                "simulation is selected with the simulate mode, not the backend".into(),
            ));
        }

        Ok(config)
    }
}
