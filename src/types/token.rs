// SPDX-License-Identifier: Apache-2.0

/// The size in bytes of an EINITTOKEN
pub const TOKEN_SIZE: usize = 304;

/// A launch token (EINITTOKEN) issued by the launch enclave
///
/// Required by EINIT on platforms without flexible launch control. The
/// token is opaque to the loader and is only passed through.
///
/// Section 38.14
#[repr(C, align(512))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchToken([u8; TOKEN_SIZE]);

impl LaunchToken {
    /// An all-zero token
    pub fn zeroed() -> Self {
        Self([0; TOKEN_SIZE])
    }

    /// Creates a token from the bytes returned by the launch service
    ///
    /// Returns `None` if fewer than `TOKEN_SIZE` bytes are supplied.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut token = Self::zeroed();
        token.0.copy_from_slice(bytes.get(..TOKEN_SIZE)?);
        Some(token)
    }

    /// The raw token bytes
    pub fn as_bytes(&self) -> &[u8; TOKEN_SIZE] {
        &self.0
    }
}

impl Default for LaunchToken {
    fn default() -> Self {
        Self::zeroed()
    }
}
