// SPDX-License-Identifier: Apache-2.0

use std::io;

use thiserror::Error;

/// The coarse failure classes reported by every load-context operation
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad phase ordering, bad size or address, or an out-of-bounds page
    InvalidParameter,

    /// Address-space reservation failed
    OutOfMemory,

    /// A user-mode library or OS enclave call failed
    Platform,

    /// A driver ioctl failed
    IoctlFailed,

    /// The enclave could not be signed, or no launch token was issued
    Failure,

    /// An unreachable path was reached
    Unexpected,
}

/// Errors returned by the load context and its collaborators
#[derive(Debug, Error)]
pub enum Error {
    /// A precondition on arguments or on the context phase was violated
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// A simulated page was loaded outside of the enclave region
    #[error("page {addr:#x} is outside of the enclave region")]
    OutOfBounds {
        /// The offending page address
        addr: u64,
    },

    /// The enclave address space could not be reserved
    #[error("unable to reserve enclave memory")]
    OutOfMemory,

    /// The enclave device could not be opened or the enclave library loaded
    #[error("unable to open the enclave backend: {0}")]
    Device(#[source] io::Error),

    /// A call into the enclave library or the OS enclave API failed
    #[error("{call} failed with error {code:#x}")]
    Platform {
        /// The name of the failed entry point
        call: &'static str,
        /// The platform's native error code
        code: u32,
    },

    /// An ioctl on the enclave device failed
    #[error("{call} ioctl failed: {source}")]
    Ioctl {
        /// The name of the failed ioctl
        call: &'static str,
        /// The OS error reported by the driver
        #[source]
        source: io::Error,
    },

    /// Changing page protections in a simulated enclave failed
    #[error("unable to protect simulated page: {0}")]
    Protect(#[source] io::Error),

    /// The enclave carries no valid signature and is not a debug enclave
    #[error("enclave SIGSTRUCT is invalid and the enclave is not in debug mode")]
    Unsigned,

    /// Producing a SIGSTRUCT failed
    #[error("unable to sign enclave: {0}")]
    Sign(String),

    /// Obtaining a launch token failed
    #[error("unable to obtain launch token: {0}")]
    LaunchToken(String),

    /// The loader configuration could not be read or parsed
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An internal invariant was violated
    #[error("unexpected: {0}")]
    Unexpected(&'static str),
}

impl Error {
    /// Returns the failure class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter(..) | Self::OutOfBounds { .. } | Self::Config(..) => {
                ErrorKind::InvalidParameter
            }
            Self::OutOfMemory => ErrorKind::OutOfMemory,
            Self::Device(..) | Self::Platform { .. } | Self::Protect(..) => ErrorKind::Platform,
            Self::Ioctl { .. } => ErrorKind::IoctlFailed,
            Self::Unsigned | Self::Sign(..) | Self::LaunchToken(..) => ErrorKind::Failure,
            Self::Unexpected(..) => ErrorKind::Unexpected,
        }
    }
}

/// A specialized `Result` for load-context operations
pub type Result<T> = std::result::Result<T, Error>;
