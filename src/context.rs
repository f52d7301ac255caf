// SPDX-License-Identifier: Apache-2.0

//! The enclave load context
//!
//! A context walks one enclave through its build phases:
//!
//! ```text
//! Undefined -> Initialized -> EnclaveCreated -> EnclaveInitialized
//! ```
//!
//! Every operation checks the phase before doing anything else, and the
//! measurement is only advanced once the backend has accepted the operation,
//! so a rejected call leaves the context as it found it. [`LoadContext::cleanup`]
//! is the only way back to `Undefined`.

use bitflags::bitflags;
use log::{debug, trace, warn};

use crate::aesm::{Aesm, LaunchTokenProvider};
use crate::backend::{self, Backend, Kind};
use crate::config::Config;
use crate::enclave::Enclave;
use crate::error::{Error, Result};
use crate::measure::{Hasher, Measure, Measurement};
use crate::sign::{resolve_sigstruct, DebugSigner, EnclaveProperties, Sign};
use crate::types::{Attributes, SecInfo, Secs, Xfrm, PAGE_SIZE};

/// What a context does with the enclave it builds
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LoadType {
    /// Not yet chosen
    Undefined,

    /// Build a real (or simulated) enclave
    Create,

    /// Only compute the measurement, e.g. to sign an image offline
    Measure,
}

bitflags! {
    /// Modes fixed when a context is initialized
    #[derive(Default)]
    pub struct Modes: u32 {
        /// Build a debug enclave
        const DEBUG = 1 << 0;

        /// Simulate the enclave with ordinary memory
        const SIMULATE = 1 << 1;
    }
}

/// The build phase of a context
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// Not initialized, or cleaned up
    Undefined,

    /// Ready to create an enclave
    Initialized,

    /// An enclave exists and pages may be added
    EnclaveCreated,

    /// The enclave is initialized; nothing more can be added
    EnclaveInitialized,
}

/// Drives the construction of a single enclave
///
/// A context is used by one thread at a time, in phase order. Any backend
/// resource it holds (a device handle, a loaded library) is released by
/// [`LoadContext::cleanup`] or when the context is dropped. Enclaves it
/// created outlive it and are released with [`Enclave::destroy`].
pub struct LoadContext {
    load_type: LoadType,
    modes: Modes,
    state: State,
    backend: Option<Box<dyn Backend>>,
    hasher: Hasher,
    config: Config,
    base: Option<u64>,
}

impl Default for LoadContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadContext")
            .field("load_type", &self.load_type)
            .field("modes", &self.modes)
            .field("state", &self.state)
            .field("backend", &self.backend_kind())
            .finish()
    }
}

impl LoadContext {
    /// Creates an uninitialized context
    pub fn new() -> Self {
        Self {
            load_type: LoadType::Undefined,
            modes: Modes::empty(),
            state: State::Undefined,
            backend: None,
            hasher: Hasher::new(),
            config: Config::default(),
            base: None,
        }
    }

    /// Prepares the context with the default configuration
    pub fn initialize(&mut self, load_type: LoadType, modes: Modes) -> Result<()> {
        self.initialize_with(Config::default(), load_type, modes)
    }

    /// Prepares the context
    ///
    /// A backend is only opened for contexts that create enclaves; measuring
    /// never touches the platform.
    pub fn initialize_with(
        &mut self,
        config: Config,
        load_type: LoadType,
        modes: Modes,
    ) -> Result<()> {
        self.attach(config, load_type, modes, |simulate, config| {
            backend::select(simulate, config)
        })
    }

    fn attach(
        &mut self,
        config: Config,
        load_type: LoadType,
        modes: Modes,
        open: impl FnOnce(bool, &Config) -> Result<Box<dyn Backend>>,
    ) -> Result<()> {
        if self.state != State::Undefined {
            return Err(Error::InvalidParameter("context is already initialized"));
        }

        let backend = match load_type {
            LoadType::Undefined => return Err(Error::InvalidParameter("load type is undefined")),
            LoadType::Measure => None,
            LoadType::Create => Some(open(modes.contains(Modes::SIMULATE), &config)?),
        };

        debug!(
            "initialized {:?} context with {:?} ({})",
            load_type,
            modes,
            backend
                .as_ref()
                .map(|b| b.kind().name())
                .unwrap_or("no backend")
        );

        self.load_type = load_type;
        self.modes = modes;
        self.backend = backend;
        self.hasher = Hasher::new();
        self.config = config;
        self.base = None;
        self.state = State::Initialized;
        Ok(())
    }

    /// Releases the backend and resets the context
    ///
    /// Safe to call in any phase, any number of times.
    pub fn cleanup(&mut self) {
        match self.state {
            State::Undefined => (),
            State::EnclaveCreated => {
                warn!("cleaning up {:?} before its enclave was initialized", self)
            }
            _ => debug!("cleaning up {:?}", self),
        }

        self.backend = None;
        self.load_type = LoadType::Undefined;
        self.modes = Modes::empty();
        self.hasher = Hasher::new();
        self.base = None;
        self.state = State::Undefined;
    }

    /// Creates an enclave of `size` bytes (ECREATE)
    ///
    /// `size` must be a power of two. Measuring contexts report the phony
    /// base [`crate::enclave::PHONY_BASE`].
    pub fn create_enclave(&mut self, size: usize) -> Result<Enclave> {
        if self.state != State::Initialized {
            return Err(Error::InvalidParameter("context is not ready to create"));
        }

        if !size.is_power_of_two() {
            return Err(Error::InvalidParameter("enclave size must be a power of two"));
        }

        let mut secs = Secs::new(0, size as u64, self.is_debug());
        let mut hasher = self.hasher.clone();
        hasher.create(&secs)?;

        let enclave = match self.backend.as_mut() {
            None => Enclave::phony(size),
            Some(backend) => backend.create(&mut secs)?,
        };

        if enclave.addr() == 0 {
            return Err(Error::Unexpected("enclave created at address zero"));
        }

        debug!("created {:?}", enclave);
        self.hasher = hasher;
        self.base = Some(enclave.addr());
        self.state = State::EnclaveCreated;
        Ok(enclave)
    }

    /// Adds one page to the enclave at `addr` (EADD, and EEXTEND if `extend`)
    ///
    /// `page` must be exactly one page long and `addr` page aligned.
    pub fn load_enclave_data(
        &mut self,
        enclave: &Enclave,
        addr: u64,
        page: &[u8],
        secinfo: SecInfo,
        extend: bool,
    ) -> Result<()> {
        self.check_created(enclave)?;

        if addr % PAGE_SIZE as u64 != 0 {
            return Err(Error::InvalidParameter("page address is not page aligned"));
        }

        if page.len() != PAGE_SIZE {
            return Err(Error::InvalidParameter("page must be exactly one page long"));
        }

        trace!("adding {:#x} ({}, extend: {})", addr, secinfo, extend);

        let mut hasher = self.hasher.clone();
        hasher.add_page(enclave.addr(), addr, page, secinfo, extend)?;

        if let Some(backend) = self.backend.as_mut() {
            backend.add_page(enclave, addr, page, secinfo, extend)?;
        }

        self.hasher = hasher;
        Ok(())
    }

    /// Initializes the enclave (EINIT) and returns its measurement
    ///
    /// Unsigned debug enclaves are signed with the well-known debug key and
    /// launch tokens come from the configured AESM daemon.
    pub fn initialize_enclave(
        &mut self,
        enclave: &Enclave,
        properties: &EnclaveProperties,
    ) -> Result<Measurement> {
        let aesm = Aesm::from(&self.config);
        self.initialize_enclave_with(enclave, properties, &DebugSigner, &aesm)
    }

    /// Initializes the enclave with the given signer and token provider
    ///
    /// Neither is consulted when only measuring or simulating.
    pub fn initialize_enclave_with(
        &mut self,
        enclave: &Enclave,
        properties: &EnclaveProperties,
        signer: &dyn Sign,
        provider: &dyn LaunchTokenProvider,
    ) -> Result<Measurement> {
        self.check_created(enclave)?;

        let mrenclave = self.hasher.finish();
        debug!("measured {:?}: {}", enclave, mrenclave);

        let simulate = self.is_simulation();
        if let (false, Some(backend)) = (simulate, self.backend.as_mut()) {
            let sigstruct = resolve_sigstruct(properties, &mrenclave, signer)?;

            let token = match backend.needs_launch_token() {
                false => None,
                true => {
                    let attributes = Attributes::from_raw(
                        properties.attributes.raw_flags(),
                        Xfrm::default().bits(),
                    );

                    let mut session = provider.connect()?;
                    Some(session.launch_token(
                        sigstruct.enclavehash(),
                        sigstruct.modulus(),
                        attributes,
                    )?)
                }
            };

            backend.finalize(enclave, &sigstruct, token.as_ref())?;
        }

        debug!("initialized {:?}", enclave);
        self.state = State::EnclaveInitialized;
        Ok(mrenclave)
    }

    fn check_created(&self, enclave: &Enclave) -> Result<()> {
        if self.state != State::EnclaveCreated {
            return Err(Error::InvalidParameter("no enclave is under construction"));
        }

        match self.base == Some(enclave.addr()) {
            true => Ok(()),
            false => Err(Error::InvalidParameter("enclave was not created by this context")),
        }
    }

    /// Whether enclaves are simulated
    pub fn is_simulation(&self) -> bool {
        self.modes.contains(Modes::SIMULATE)
    }

    /// Whether enclaves are built in debug mode
    pub fn is_debug(&self) -> bool {
        self.modes.contains(Modes::DEBUG)
    }

    /// The current phase
    pub fn state(&self) -> State {
        self.state
    }

    /// The load type chosen at initialization
    pub fn load_type(&self) -> LoadType {
        self.load_type
    }

    /// The active backend, if any
    pub fn backend_kind(&self) -> Option<Kind> {
        self.backend.as_ref().map(|b| b.kind())
    }
}

impl Drop for LoadContext {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aesm::TokenSession;
    use crate::enclave::{Memory, PHONY_BASE};
    use crate::types::{
        AttributeFlags, LaunchToken, PageFlags, SigStruct, MODULUS_SIZE, TOKEN_SIZE,
    };
    use crate::ErrorKind;

    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records the calls a hardware backend would see
    #[derive(Default)]
    struct Log {
        pages: Vec<(u64, bool)>,
        finalized: Option<(SigStruct, Option<LaunchToken>)>,
    }

    struct Hardware {
        log: Rc<RefCell<Log>>,
        token: bool,
    }

    const HW_BASE: u64 = 0x7f00_0000_0000;

    impl Backend for Hardware {
        fn kind(&self) -> Kind {
            Kind::Driver
        }

        fn needs_launch_token(&self) -> bool {
            self.token
        }

        fn create(&mut self, secs: &mut Secs) -> Result<Enclave> {
            secs.set_base(HW_BASE);
            Ok(Enclave::new(HW_BASE, secs.size() as usize, false, Memory::Phony))
        }

        fn add_page(
            &mut self,
            _enclave: &Enclave,
            addr: u64,
            _page: &[u8],
            _secinfo: SecInfo,
            extend: bool,
        ) -> Result<()> {
            self.log.borrow_mut().pages.push((addr, extend));
            Ok(())
        }

        fn finalize(
            &mut self,
            _enclave: &Enclave,
            sigstruct: &SigStruct,
            token: Option<&LaunchToken>,
        ) -> Result<()> {
            self.log.borrow_mut().finalized = Some((sigstruct.clone(), token.cloned()));
            Ok(())
        }
    }

    struct Tokens(bool);

    struct Session;

    impl TokenSession for Session {
        fn launch_token(
            &mut self,
            mrenclave: &[u8; 32],
            _modulus: &[u8; MODULUS_SIZE],
            attributes: Attributes,
        ) -> Result<LaunchToken> {
            let mut bytes = [0u8; TOKEN_SIZE];
            bytes[..32].copy_from_slice(mrenclave);
            bytes[32..48].copy_from_slice(&attributes.to_bytes());
            Ok(LaunchToken::from_bytes(&bytes).unwrap())
        }
    }

    impl LaunchTokenProvider for Tokens {
        fn connect(&self) -> Result<Box<dyn TokenSession>> {
            match self.0 {
                true => Ok(Box::new(Session)),
                false => Err(Error::LaunchToken("no service".into())),
            }
        }
    }

    fn hardware(modes: Modes, token: bool) -> (LoadContext, Rc<RefCell<Log>>) {
        let log = Rc::new(RefCell::new(Log::default()));
        let backend = Hardware {
            log: log.clone(),
            token,
        };

        let mut ctx = LoadContext::new();
        ctx.attach(Config::default(), LoadType::Create, modes, |_, _| {
            Ok(Box::new(backend))
        })
        .unwrap();

        (ctx, log)
    }

    fn debug_properties() -> EnclaveProperties {
        EnclaveProperties::unsigned(AttributeFlags::MODE64BIT | AttributeFlags::DEBUG)
    }

    fn rw() -> SecInfo {
        SecInfo::reg(PageFlags::READ | PageFlags::WRITE)
    }

    #[test]
    fn undefined_load_type() {
        let mut ctx = LoadContext::new();
        let err = ctx
            .initialize(LoadType::Undefined, Modes::empty())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(ctx.state(), State::Undefined);
    }

    #[test]
    fn measure_opens_nothing() {
        let mut ctx = LoadContext::new();
        ctx.initialize(LoadType::Measure, Modes::DEBUG).unwrap();
        assert_eq!(ctx.state(), State::Initialized);
        assert_eq!(ctx.backend_kind(), None);
        assert!(ctx.is_debug());
        assert!(!ctx.is_simulation());

        let err = ctx
            .initialize(LoadType::Measure, Modes::DEBUG)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        let enclave = ctx.create_enclave(0x10000).unwrap();
        assert_eq!(enclave.addr(), PHONY_BASE);
        assert!(enclave.is_phony());
    }

    #[test]
    fn phase_order() {
        let mut ctx = LoadContext::new();
        assert!(ctx.create_enclave(0x1000).is_err());

        ctx.initialize(LoadType::Measure, Modes::empty()).unwrap();
        let phony = Enclave::phony(0x2000);
        let props = EnclaveProperties::unsigned(AttributeFlags::MODE64BIT);

        let err = ctx
            .load_enclave_data(&phony, PHONY_BASE, &[0; PAGE_SIZE], rw(), true)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(ctx.initialize_enclave(&phony, &props).is_err());
        assert_eq!(ctx.state(), State::Initialized);

        let enclave = ctx.create_enclave(0x2000).unwrap();
        assert!(ctx.create_enclave(0x2000).is_err());
        assert_eq!(ctx.state(), State::EnclaveCreated);

        ctx.initialize_enclave(&enclave, &props).unwrap();
        assert_eq!(ctx.state(), State::EnclaveInitialized);

        assert!(ctx
            .load_enclave_data(&enclave, PHONY_BASE, &[0; PAGE_SIZE], rw(), true)
            .is_err());
        assert!(ctx.initialize_enclave(&enclave, &props).is_err());
        assert_eq!(ctx.state(), State::EnclaveInitialized);

        ctx.cleanup();
        ctx.cleanup();
        assert_eq!(ctx.state(), State::Undefined);
        assert_eq!(ctx.load_type(), LoadType::Undefined);
    }

    #[test]
    fn bad_sizes_and_pages() {
        let mut ctx = LoadContext::new();
        ctx.initialize(LoadType::Measure, Modes::empty()).unwrap();

        for size in [0, 0x3000, 0x10001] {
            let err = ctx.create_enclave(size).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidParameter);
            assert_eq!(ctx.state(), State::Initialized);
        }

        let enclave = ctx.create_enclave(0x4000).unwrap();
        let before = ctx.hasher.finish();

        for (addr, len) in [
            (PHONY_BASE + 0x800, PAGE_SIZE),
            (PHONY_BASE, PAGE_SIZE - 1),
            (PHONY_BASE, PAGE_SIZE + 1),
            (PHONY_BASE - 0x1000, PAGE_SIZE),
        ] {
            let page = vec![0; len];
            let err = ctx
                .load_enclave_data(&enclave, addr, &page, rw(), true)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        }

        assert_eq!(ctx.hasher.finish(), before);
    }

    #[test]
    fn foreign_enclave() {
        let mut ctx = LoadContext::new();
        ctx.initialize(LoadType::Measure, Modes::empty()).unwrap();
        ctx.create_enclave(0x2000).unwrap();

        let other = Enclave::new(0x10_0000, 0x2000, false, Memory::Phony);
        let err = ctx
            .load_enclave_data(&other, 0x10_0000, &[0; PAGE_SIZE], rw(), true)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn hardware_measurement_matches_measure_only() {
        let pages = [(0u64, true), (0x1000, true), (0x2000, false)];
        let props = debug_properties();

        let mut measure = LoadContext::new();
        measure.initialize(LoadType::Measure, Modes::DEBUG).unwrap();
        let phony = measure.create_enclave(0x4000).unwrap();
        for (offset, extend) in pages {
            measure
                .load_enclave_data(&phony, phony.addr() + offset, &[7; PAGE_SIZE], rw(), extend)
                .unwrap();
        }
        let expected = measure.initialize_enclave(&phony, &props).unwrap();

        let (mut ctx, log) = hardware(Modes::DEBUG, true);
        let enclave = ctx.create_enclave(0x4000).unwrap();
        assert_eq!(enclave.addr(), HW_BASE);
        for (offset, extend) in pages {
            ctx.load_enclave_data(&enclave, HW_BASE + offset, &[7; PAGE_SIZE], rw(), extend)
                .unwrap();
        }

        let tokens = Tokens(true);
        let mrenclave = ctx
            .initialize_enclave_with(&enclave, &props, &DebugSigner, &tokens)
            .unwrap();
        assert_eq!(mrenclave, expected);

        let log = log.borrow();
        assert_eq!(
            log.pages,
            vec![(HW_BASE, true), (HW_BASE + 0x1000, true), (HW_BASE + 0x2000, false)]
        );

        let (sigstruct, token) = log.finalized.as_ref().unwrap();
        assert!(sigstruct.has_header());
        assert_eq!(sigstruct.enclavehash(), mrenclave.as_bytes());

        let token = token.as_ref().unwrap();
        assert_eq!(&token.as_bytes()[..32], mrenclave.as_bytes());
        let attributes = Attributes::from_raw(0x6, Xfrm::default().bits());
        assert_eq!(&token.as_bytes()[32..48], &attributes.to_bytes());
    }

    #[test]
    fn unsigned_release_enclave_is_rejected() {
        let (mut ctx, log) = hardware(Modes::empty(), false);
        let enclave = ctx.create_enclave(0x2000).unwrap();

        let props = EnclaveProperties::unsigned(AttributeFlags::MODE64BIT);
        let err = ctx
            .initialize_enclave_with(&enclave, &props, &DebugSigner, &Tokens(false))
            .unwrap_err();
        assert!(matches!(err, Error::Unsigned));
        assert_eq!(ctx.state(), State::EnclaveCreated);
        assert!(log.borrow().finalized.is_none());
    }

    #[test]
    fn token_failure() {
        let (mut ctx, log) = hardware(Modes::DEBUG, true);
        let enclave = ctx.create_enclave(0x2000).unwrap();

        let props = debug_properties();
        let err = ctx
            .initialize_enclave_with(&enclave, &props, &DebugSigner, &Tokens(false))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failure);
        assert_eq!(ctx.state(), State::EnclaveCreated);
        assert!(log.borrow().finalized.is_none());
    }

    #[test]
    fn no_token_without_launch_control() {
        let (mut ctx, log) = hardware(Modes::DEBUG, false);
        let enclave = ctx.create_enclave(0x2000).unwrap();

        let props = debug_properties();
        ctx.initialize_enclave_with(&enclave, &props, &DebugSigner, &Tokens(false))
            .unwrap();

        let log = log.borrow();
        let (_, token) = log.finalized.as_ref().unwrap();
        assert!(token.is_none());
    }

    #[test]
    fn cleanup_releases_backend() {
        let (mut ctx, _log) = hardware(Modes::empty(), false);
        assert_eq!(ctx.backend_kind(), Some(Kind::Driver));

        ctx.cleanup();
        assert_eq!(ctx.backend_kind(), None);
        assert_eq!(ctx.state(), State::Undefined);

        ctx.initialize(LoadType::Measure, Modes::empty()).unwrap();
        assert_eq!(ctx.state(), State::Initialized);
    }
}
