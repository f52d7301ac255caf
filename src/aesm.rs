// SPDX-License-Identifier: Apache-2.0

//! Launch tokens from the AESM daemon
//!
//! Platforms without flexible launch control need an EINITTOKEN from the
//! launch enclave before EINIT succeeds. The AESM daemon brokers this: each
//! request is a protobuf `Request` preceded by its length as a little-endian
//! `u32`, and each reply is framed the same way.

use std::io::{Read, Write};
use std::mem::size_of;
use std::path::PathBuf;

use log::debug;
use protobuf::Message;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protobuf::aesm_proto::{Request, Request_GetLaunchTokenRequest, Response};
use crate::types::{Attributes, LaunchToken, MODULUS_SIZE};

/// The largest reply accepted from the daemon
///
/// A launch token reply carries a 304-byte token and an error code.
const MAX_RESPONSE: usize = 4096;

/// A source of launch tokens
pub trait LaunchTokenProvider {
    /// Opens a session with the token service
    ///
    /// The session is closed when it is dropped.
    fn connect(&self) -> Result<Box<dyn TokenSession>>;
}

/// An open session with a launch token service
pub trait TokenSession {
    /// Requests a token for the enclave with the given identity
    fn launch_token(
        &mut self,
        mrenclave: &[u8; 32],
        modulus: &[u8; MODULUS_SIZE],
        attributes: Attributes,
    ) -> Result<LaunchToken>;
}

/// The AESM daemon, reached over its Unix socket
#[derive(Clone, Debug)]
pub struct Aesm {
    socket: PathBuf,
    timeout: u32,
}

impl Aesm {
    /// Creates a client for the daemon listening on `socket`
    pub fn new(socket: impl Into<PathBuf>, timeout: u32) -> Self {
        Self {
            socket: socket.into(),
            timeout,
        }
    }
}

impl From<&Config> for Aesm {
    fn from(config: &Config) -> Self {
        Self::new(&config.aesm_socket, config.aesm_timeout)
    }
}

impl LaunchTokenProvider for Aesm {
    #[cfg(unix)]
    fn connect(&self) -> Result<Box<dyn TokenSession>> {
        let stream = std::os::unix::net::UnixStream::connect(&self.socket).map_err(|e| {
            Error::LaunchToken(format!("unable to connect to {:?}: {}", self.socket, e))
        })?;

        debug!("connected to AESM at {:?}", self.socket);
        Ok(Box::new(AesmSession::new(stream, self.timeout)))
    }

    #[cfg(not(unix))]
    fn connect(&self) -> Result<Box<dyn TokenSession>> {
        Err(Error::LaunchToken(format!(
            "AESM socket {:?} is not reachable on this platform",
            self.socket
        )))
    }
}

/// A connection to the AESM daemon over any byte stream
pub struct AesmSession<S> {
    stream: S,
    timeout: u32,
}

impl<S: Read + Write> AesmSession<S> {
    /// Wraps an established connection
    pub fn new(stream: S, timeout: u32) -> Self {
        Self { stream, timeout }
    }

    fn send_request(&mut self, req: &Request) -> Result<Response> {
        let err = |e: &dyn std::fmt::Display| Error::LaunchToken(e.to_string());

        // Reserve room for the length prefix, then append the message
        let mut buf = vec![0u8; size_of::<u32>()];
        req.write_to_writer(&mut buf).map_err(|e| err(&e))?;

        let req_len = (buf.len() - size_of::<u32>()) as u32;
        buf[..size_of::<u32>()].copy_from_slice(&req_len.to_le_bytes());

        self.stream.write_all(&buf).map_err(|e| err(&e))?;
        self.stream.flush().map_err(|e| err(&e))?;

        let mut res_len = [0u8; size_of::<u32>()];
        self.stream.read_exact(&mut res_len).map_err(|e| err(&e))?;

        let res_len = u32::from_le_bytes(res_len) as usize;
        if res_len > MAX_RESPONSE {
            return Err(Error::LaunchToken(format!(
                "AESM response of {} bytes exceeds {} bytes",
                res_len, MAX_RESPONSE
            )));
        }

        let mut res = vec![0u8; res_len];
        self.stream.read_exact(&mut res).map_err(|e| err(&e))?;

        Message::parse_from_bytes(&res).map_err(|e| err(&e))
    }
}

impl<S: Read + Write> TokenSession for AesmSession<S> {
    fn launch_token(
        &mut self,
        mrenclave: &[u8; 32],
        modulus: &[u8; MODULUS_SIZE],
        attributes: Attributes,
    ) -> Result<LaunchToken> {
        let mut msg = Request_GetLaunchTokenRequest::new();
        msg.set_enclavehash(mrenclave.to_vec());
        msg.set_modulus(modulus.to_vec());
        msg.set_attributes(attributes.to_bytes().to_vec());
        msg.set_timeout(self.timeout);

        let mut req = Request::new();
        req.set_getLicTokenReq(msg);

        let mut res = self.send_request(&req)?;
        let res = res.take_getLicTokenRes();
        if res.get_errorCode() != 0 {
            return Err(Error::LaunchToken(format!(
                "AESM returned error code {}",
                res.get_errorCode()
            )));
        }

        LaunchToken::from_bytes(res.get_token()).ok_or_else(|| {
            Error::LaunchToken(format!(
                "AESM returned a {}-byte token",
                res.get_token().len()
            ))
        })
    }
}
