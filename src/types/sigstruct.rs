// SPDX-License-Identifier: Apache-2.0

use std::convert::TryFrom;

use super::attr::Attributes;
use crate::error::{Error, Result};

/// The size in bytes of the signer's RSA modulus (3072 bits)
pub const MODULUS_SIZE: usize = 384;

/// The constant bytes at the start of every SIGSTRUCT
pub const HEADER1: [u8; 16] = [
    0x06, 0x00, 0x00, 0x00, 0xe1, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// The constant bytes following the vendor and date fields
pub const HEADER2: [u8; 16] = [
    0x01, 0x01, 0x00, 0x00, 0x60, 0x00, 0x00, 0x00, 0x60, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
];

/// The enclave signature structure (SIGSTRUCT)
///
/// Binds an enclave measurement to the signer's key and the enclave's
/// requested attributes. Two regions are covered by the signature: the
/// header (bytes 0-127) and the body (bytes 900-1027).
///
/// Section 38.13
#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigStruct {
    header1: [u8; 16],
    vendor: u32,
    date: u32,
    header2: [u8; 16],
    swdefined: u32,
    reserved1: [u8; 84],
    modulus: [u8; MODULUS_SIZE],
    exponent: u32,
    signature: [u8; MODULUS_SIZE],
    misc_select: u32,
    misc_mask: u32,
    reserved2: [u8; 20],
    attributes: Attributes,
    attribute_mask: Attributes,
    enclavehash: [u8; 32],
    reserved3: [u8; 32],
    isv_prod_id: u16,
    isv_svn: u16,
    reserved4: [u8; 12],
    q1: [u8; MODULUS_SIZE],
    q2: [u8; MODULUS_SIZE],
}

const HEADER: std::ops::Range<usize> = 0..128;
const BODY: std::ops::Range<usize> = 900..1028;

impl SigStruct {
    /// An all-zero structure, which carries no recognizable header
    pub fn zeroed() -> Self {
        Self {
            header1: [0; 16],
            vendor: 0,
            date: 0,
            header2: [0; 16],
            swdefined: 0,
            reserved1: [0; 84],
            modulus: [0; MODULUS_SIZE],
            exponent: 0,
            signature: [0; MODULUS_SIZE],
            misc_select: 0,
            misc_mask: 0,
            reserved2: [0; 20],
            attributes: Attributes::default(),
            attribute_mask: Attributes::default(),
            enclavehash: [0; 32],
            reserved3: [0; 32],
            isv_prod_id: 0,
            isv_svn: 0,
            reserved4: [0; 12],
            q1: [0; MODULUS_SIZE],
            q2: [0; MODULUS_SIZE],
        }
    }

    /// Creates an unsigned structure with the header and body filled in
    pub fn new(
        date: u32,
        attributes: Attributes,
        attribute_mask: Attributes,
        enclavehash: [u8; 32],
        isv_prod_id: u16,
        isv_svn: u16,
    ) -> Self {
        Self {
            header1: HEADER1,
            date,
            header2: HEADER2,
            misc_mask: u32::MAX,
            attributes,
            attribute_mask,
            enclavehash,
            isv_prod_id,
            isv_svn,
            ..Self::zeroed()
        }
    }

    /// Whether the structure carries the recognized SIGSTRUCT headers
    ///
    /// Both `header1` and `header2` are compared, which is stricter than
    /// looking at the leading 16 bytes only.
    pub fn has_header(&self) -> bool {
        self.header1 == HEADER1 && self.header2 == HEADER2
    }

    /// The bytes covered by the signature (header followed by body)
    pub fn signed_bytes(&self) -> Vec<u8> {
        let bytes = self.as_bytes();
        let mut data = Vec::with_capacity(HEADER.len() + BODY.len());
        data.extend_from_slice(&bytes[HEADER]);
        data.extend_from_slice(&bytes[BODY]);
        data
    }

    /// Stores the signer's key and signature values (all little-endian)
    pub fn set_signature(
        &mut self,
        modulus: [u8; MODULUS_SIZE],
        exponent: u32,
        signature: [u8; MODULUS_SIZE],
        q1: [u8; MODULUS_SIZE],
        q2: [u8; MODULUS_SIZE],
    ) {
        self.modulus = modulus;
        self.exponent = exponent;
        self.signature = signature;
        self.q1 = q1;
        self.q2 = q2;
    }

    /// The expected enclave measurement
    pub fn enclavehash(&self) -> &[u8; 32] {
        &self.enclavehash
    }

    /// The signer's modulus, little-endian
    pub fn modulus(&self) -> &[u8; MODULUS_SIZE] {
        &self.modulus
    }

    /// The signer's public exponent
    pub fn exponent(&self) -> u32 {
        self.exponent
    }

    /// The signature, little-endian
    pub fn signature(&self) -> &[u8; MODULUS_SIZE] {
        &self.signature
    }

    /// The `q1` verification helper, little-endian
    pub fn q1(&self) -> &[u8; MODULUS_SIZE] {
        &self.q1
    }

    /// The `q2` verification helper, little-endian
    pub fn q2(&self) -> &[u8; MODULUS_SIZE] {
        &self.q2
    }

    /// The requested enclave attributes
    pub fn attributes(&self) -> Attributes {
        self.attributes
    }

    /// The product identifier
    pub fn isv_prod_id(&self) -> u16 {
        self.isv_prod_id
    }

    /// The security version number
    pub fn isv_svn(&self) -> u16 {
        self.isv_svn
    }

    /// Views the structure as its raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        // Every field is an integer or a byte array and there is no padding.
        unsafe { super::bytes_of(self) }
    }
}

impl Default for SigStruct {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl TryFrom<&[u8]> for SigStruct {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != std::mem::size_of::<Self>() {
            return Err(Error::InvalidParameter("SIGSTRUCT has the wrong size"));
        }

        let mut sigstruct = Self::zeroed();
        // Every byte pattern is a valid SIGSTRUCT.
        unsafe { super::bytes_of_mut(&mut sigstruct) }.copy_from_slice(bytes);
        Ok(sigstruct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testaso::testaso;

    testaso! {
        struct SigStruct: 8, 1808 => {
            header1: 0,
            vendor: 16,
            date: 20,
            header2: 24,
            swdefined: 40,
            reserved1: 44,
            modulus: 128,
            exponent: 512,
            signature: 516,
            misc_select: 900,
            misc_mask: 904,
            reserved2: 908,
            attributes: 928,
            attribute_mask: 944,
            enclavehash: 960,
            reserved3: 992,
            isv_prod_id: 1024,
            isv_svn: 1026,
            reserved4: 1028,
            q1: 1040,
            q2: 1424
        }
    }

    #[test]
    fn header() {
        assert!(!SigStruct::zeroed().has_header());

        let ss = SigStruct::new(
            0x2019_0101,
            Attributes::default(),
            Attributes::default(),
            [7; 32],
            1,
            2,
        );
        assert!(ss.has_header());
        assert_eq!(&ss.as_bytes()[..16], &HEADER1);
        assert_eq!(&ss.as_bytes()[20..24], &0x2019_0101u32.to_le_bytes());

        // A correct leading header alone is not enough
        let mut partial = ss.clone();
        partial.header2 = [0; 16];
        assert!(!partial.has_header());
    }

    #[test]
    fn signed_bytes() {
        let ss = SigStruct::new(
            0,
            Attributes::default(),
            Attributes::default(),
            [0xaa; 32],
            0x1234,
            0x5678,
        );

        let data = ss.signed_bytes();
        assert_eq!(data.len(), 256);
        assert_eq!(&data[..16], &HEADER1);
        // enclavehash sits at offset 960, i.e. 60 bytes into the body
        assert_eq!(&data[128 + 60..128 + 92], &[0xaa; 32]);
        assert_eq!(&data[128 + 124..128 + 126], &0x1234u16.to_le_bytes());
    }

    #[test]
    fn from_bytes() {
        let ss = SigStruct::new(
            0,
            Attributes::default(),
            Attributes::default(),
            [3; 32],
            9,
            10,
        );

        let copy = SigStruct::try_from(ss.as_bytes()).unwrap();
        assert_eq!(copy, ss);

        let err = SigStruct::try_from(&ss.as_bytes()[..100]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidParameter);
    }
}
