// SPDX-License-Identifier: Apache-2.0

//! Enclave signing
//!
//! Real hardware refuses to initialize an enclave without a SIGSTRUCT whose
//! measurement matches. Enclaves that were never signed may still be run in
//! debug mode: they are signed on the fly with a well-known debug key.

use log::debug;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::{BigUint, Pkcs1v15Sign, PublicKeyParts, RsaPrivateKey};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::measure::Measurement;
use crate::types::{AttributeFlags, Attributes, SigStruct, Xfrm, MODULUS_SIZE};

/// The well-known, non-secret key used to sign debug enclaves
const DEBUG_KEY: &str = include_str!("debug-key.pem");

/// The SIGSTRUCT exponent required by SGX
const EXPONENT: u32 = 3;

/// Attribute bits enforced by signatures produced here
const ATTRIBUTE_MASK: u64 = 0xffff_ffff_ffff_fffb;

/// Signing-related properties of an enclave image
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnclaveProperties {
    /// The requested enclave attributes
    pub attributes: Attributes,

    /// The product identifier
    pub product_id: u16,

    /// The security version number
    pub security_version: u16,

    /// The SIGSTRUCT shipped with the image, if it was signed
    pub sigstruct: SigStruct,
}

impl EnclaveProperties {
    /// Properties for an image that carries no signature
    pub fn unsigned(flags: AttributeFlags) -> Self {
        Self {
            attributes: Attributes::new(flags, Xfrm::default()),
            product_id: 0,
            security_version: 0,
            sigstruct: SigStruct::zeroed(),
        }
    }

    /// Whether the image requests a debug enclave
    pub fn is_debug(&self) -> bool {
        self.attributes.flags().contains(AttributeFlags::DEBUG)
    }
}

/// Produces a signed SIGSTRUCT for a measurement
pub trait Sign {
    /// Signs `mrenclave` with the given attributes and identity
    fn sign(
        &self,
        mrenclave: &Measurement,
        attributes: Attributes,
        product_id: u16,
        security_version: u16,
    ) -> Result<SigStruct>;
}

/// Signs SIGSTRUCTs with a 3072-bit RSA key (exponent 3)
pub struct RsaSigner {
    key: RsaPrivateKey,
    date: u32,
}

impl RsaSigner {
    /// Wraps a private key, checking it is usable for SGX
    pub fn new(key: RsaPrivateKey) -> Result<Self> {
        if key.size() != MODULUS_SIZE {
            return Err(Error::Sign(format!(
                "signing key must be {} bits",
                MODULUS_SIZE * 8
            )));
        }

        if key.e() != &BigUint::from(EXPONENT) {
            return Err(Error::Sign("signing key exponent must be 3".into()));
        }

        Ok(Self { key, date: 0 })
    }

    /// Loads a PKCS#1 PEM private key
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| Error::Sign(e.to_string()))?;
        Self::new(key)
    }

    /// The signer for debug enclaves
    pub fn debug() -> Result<Self> {
        Self::from_pem(DEBUG_KEY)
    }

    /// Sets the SIGSTRUCT date field (YYYYMMDD in BCD)
    pub fn with_date(mut self, date: u32) -> Self {
        self.date = date;
        self
    }

    /// The signer's modulus, little-endian
    pub fn modulus(&self) -> Result<[u8; MODULUS_SIZE]> {
        le_bytes(self.key.n())
    }
}

impl Sign for RsaSigner {
    fn sign(
        &self,
        mrenclave: &Measurement,
        attributes: Attributes,
        product_id: u16,
        security_version: u16,
    ) -> Result<SigStruct> {
        let mut sigstruct = SigStruct::new(
            self.date,
            Attributes::from_raw(attributes.raw_flags(), Xfrm::default().bits()),
            Attributes::from_raw(ATTRIBUTE_MASK, 0),
            *mrenclave.as_bytes(),
            product_id,
            security_version,
        );

        let hashed = Sha256::digest(sigstruct.signed_bytes());
        let signature = self
            .key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &hashed)
            .map_err(|e| Error::Sign(e.to_string()))?;

        // q1 = floor(s^2 / n), q2 = floor((s^3 - q1 * s * n) / n)
        let n = self.key.n();
        let s = BigUint::from_bytes_be(&signature);
        let s2 = &s * &s;
        let q1 = &s2 / n;
        let s3 = &s2 * &s;
        let q1sn = &(&q1 * &s) * n;
        let q2 = &(&s3 - &q1sn) / n;

        sigstruct.set_signature(
            le_bytes(n)?,
            EXPONENT,
            le_bytes(&s)?,
            le_bytes(&q1)?,
            le_bytes(&q2)?,
        );

        Ok(sigstruct)
    }
}

/// Signs with the well-known debug key, loading it only when asked to sign
#[derive(Copy, Clone, Debug, Default)]
pub struct DebugSigner;

impl Sign for DebugSigner {
    fn sign(
        &self,
        mrenclave: &Measurement,
        attributes: Attributes,
        product_id: u16,
        security_version: u16,
    ) -> Result<SigStruct> {
        RsaSigner::debug()?.sign(mrenclave, attributes, product_id, security_version)
    }
}

fn le_bytes(value: &BigUint) -> Result<[u8; MODULUS_SIZE]> {
    let buf = value.to_bytes_le();
    if buf.len() > MODULUS_SIZE {
        return Err(Error::Sign("value does not fit in 384 bytes".into()));
    }

    let mut arr = [0u8; MODULUS_SIZE];
    arr[..buf.len()].copy_from_slice(&buf);
    Ok(arr)
}

/// Selects the SIGSTRUCT used to initialize an enclave
///
/// A SIGSTRUCT carrying the recognized header is used as-is. Otherwise the
/// enclave is treated as unsigned: debug enclaves are signed by `signer`,
/// anything else is rejected.
pub fn resolve_sigstruct(
    properties: &EnclaveProperties,
    mrenclave: &Measurement,
    signer: &dyn Sign,
) -> Result<SigStruct> {
    if properties.sigstruct.has_header() {
        return Ok(properties.sigstruct.clone());
    }

    if !properties.is_debug() {
        return Err(Error::Unsigned);
    }

    debug!("debug-signing unsigned enclave {}", mrenclave);
    signer.sign(
        mrenclave,
        properties.attributes,
        properties.product_id,
        properties.security_version,
    )
}
