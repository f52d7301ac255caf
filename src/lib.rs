// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]
#![deny(clippy::all)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]
// protobuf-codegen-pure would generate warnings
#![allow(elided_lifetimes_in_paths)]

pub mod aesm;
pub mod alloc;
pub mod backend;
pub mod config;
pub mod context;
/// Created enclaves and their release
pub mod enclave;
/// Error types
pub mod error;
pub mod measure;
mod protobuf;
pub mod sign;
pub mod types;

pub use config::Config;
pub use context::{LoadContext, LoadType, Modes, State};
pub use enclave::Enclave;
pub use error::{Error, ErrorKind, Result};
pub use measure::Measurement;
pub use sign::EnclaveProperties;
