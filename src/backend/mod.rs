// SPDX-License-Identifier: Apache-2.0

//! Enclave construction strategies
//!
//! Exactly one backend drives a load context. It is chosen when the context
//! is initialized and never changes afterwards.

#[cfg(unix)]
pub mod driver;
#[cfg(unix)]
pub mod library;
pub mod sim;
pub mod windows;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::enclave::Enclave;
use crate::error::{Error, Result};
use crate::types::{LaunchToken, SecInfo, Secs, SigStruct};

/// The kinds of backend
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// The legacy SGX kernel driver, driven by ioctls
    Driver,

    /// The user-mode enclave library (`libsgx_enclave_common`)
    Library,

    /// The Windows enclave API
    Windows,

    /// In-process simulation with ordinary page protections
    Simulation,
}

impl Kind {
    /// The backend name, as accepted in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            Self::Driver => "driver",
            Self::Library => "library",
            Self::Windows => "windows",
            Self::Simulation => "simulation",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A strategy for building enclaves
///
/// The load context validates phases, arguments and page sizes and feeds
/// the measurement before any of these methods is called.
pub trait Backend {
    /// Which kind of backend this is
    fn kind(&self) -> Kind;

    /// Whether EINIT needs a launch token from the launch enclave
    fn needs_launch_token(&self) -> bool {
        false
    }

    /// Creates the enclave described by `secs`
    ///
    /// The backend records the base address it settled on in `secs`.
    fn create(&mut self, secs: &mut Secs) -> Result<Enclave>;

    /// Adds one page at `addr`
    ///
    /// `extend` marks pages whose contents are measured; the others are added
    /// unvalidated.
    fn add_page(
        &mut self,
        enclave: &Enclave,
        addr: u64,
        page: &[u8],
        secinfo: SecInfo,
        extend: bool,
    ) -> Result<()>;

    /// Initializes the enclave (EINIT)
    fn finalize(
        &mut self,
        enclave: &Enclave,
        sigstruct: &SigStruct,
        token: Option<&LaunchToken>,
    ) -> Result<()>;
}

/// Chooses and opens the backend for a context that creates enclaves
pub fn select(simulate: bool, config: &Config) -> Result<Box<dyn Backend>> {
    if simulate {
        return Ok(Box::new(sim::Simulation::new()));
    }

    match config.backend {
        Some(kind) => open(kind, config),
        None if cfg!(windows) => open(Kind::Windows, config),
        None => open(Kind::Library, config).or_else(|e| {
            log::debug!("enclave library unavailable ({}), using the driver", e);
            open(Kind::Driver, config)
        }),
    }
}

fn open(kind: Kind, config: &Config) -> Result<Box<dyn Backend>> {
    log::debug!("opening {} backend", kind);

    match kind {
        #[cfg(unix)]
        Kind::Driver => Ok(Box::new(driver::Driver::open(&config.device)?)),

        #[cfg(unix)]
        Kind::Library => Ok(Box::new(library::Library::load(&config.library)?)),

        #[cfg(windows)]
        Kind::Windows => Ok(Box::new(windows::Windows::new())),

        Kind::Simulation => Ok(Box::new(sim::Simulation::new())),

        #[allow(unreachable_patterns)]
        _ => Err(Error::InvalidParameter(
            "backend is not supported on this platform",
        )),
    }
}

/// A single platform capability check
#[derive(Clone, Debug, Serialize)]
pub struct Datum {
    /// The name of this datum.
    pub name: String,

    /// Whether the datum indicates support for the platform or not.
    pub pass: bool,

    /// Short additional information to display to the user.
    pub info: Option<String>,

    /// Longer explanatory message on how to resolve problems.
    pub mesg: Option<String>,
}

/// Reports which backends this host can use
pub fn probe(config: &Config) -> Vec<Datum> {
    let mut data = Vec::new();

    #[cfg(unix)]
    {
        data.push(driver::datum(&config.device));
        data.push(library::datum(&config.library));
        data.push(aesm(&config.aesm_socket));
    }

    data.push(windows::datum());

    data.push(Datum {
        name: "Simulation".into(),
        pass: true,
        info: None,
        mesg: None,
    });

    data
}

#[cfg(unix)]
fn aesm(socket: &std::path::Path) -> Datum {
    let pass = std::os::unix::net::UnixStream::connect(socket).is_ok();

    Datum {
        name: "AESM daemon".into(),
        pass,
        info: Some(socket.display().to_string()),
        mesg: match pass {
            true => None,
            false => Some(
                "Launch tokens for the driver backend are issued by the AESM daemon. \
                 Install and start aesmd from the Intel SGX platform software."
                    .into(),
            ),
        },
    }
}
