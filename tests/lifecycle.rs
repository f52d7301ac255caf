// SPDX-License-Identifier: Apache-2.0

use sgxload::enclave::PHONY_BASE;
use sgxload::types::{AttributeFlags, PageFlags, SecInfo, PAGE_SIZE};
use sgxload::{
    Enclave, EnclaveProperties, ErrorKind, LoadContext, LoadType, Measurement, Modes, State,
};

use serial_test::serial;

const SIZE: usize = 0x10000;

fn properties() -> EnclaveProperties {
    EnclaveProperties::unsigned(AttributeFlags::MODE64BIT | AttributeFlags::DEBUG)
}

fn simulated(size: usize) -> (LoadContext, Enclave) {
    let mut ctx = LoadContext::new();
    ctx.initialize(LoadType::Create, Modes::DEBUG | Modes::SIMULATE)
        .unwrap();
    let enclave = ctx.create_enclave(size).unwrap();
    (ctx, enclave)
}

/// Loads a small image: code, data, a TCS and an unmeasured heap page
fn build(ctx: &mut LoadContext, enclave: &Enclave) -> Measurement {
    let base = enclave.addr();
    let layout = [
        (0x0000, SecInfo::reg(PageFlags::READ | PageFlags::EXECUTE), 0xc3, true),
        (0x1000, SecInfo::reg(PageFlags::READ | PageFlags::WRITE), 0x5a, true),
        (0x2000, SecInfo::tcs(), 0x00, true),
        (0x3000, SecInfo::reg(PageFlags::READ | PageFlags::WRITE), 0x00, false),
    ];

    for (offset, secinfo, fill, extend) in layout {
        ctx.load_enclave_data(enclave, base + offset, &[fill; PAGE_SIZE], secinfo, extend)
            .unwrap();
    }

    ctx.initialize_enclave(enclave, &properties()).unwrap()
}

#[test]
#[serial]
fn simulated_lifecycle() {
    let (mut ctx, enclave) = simulated(SIZE);
    assert_eq!(ctx.state(), State::EnclaveCreated);
    assert!(enclave.is_simulation());
    assert_ne!(enclave.addr(), 0);
    assert_eq!(enclave.addr() % SIZE as u64, 0);

    let page: Vec<u8> = (0..PAGE_SIZE).map(|i| (i % 251) as u8).collect();
    let rw = SecInfo::reg(PageFlags::READ | PageFlags::WRITE);
    ctx.load_enclave_data(&enclave, enclave.addr(), &page, rw, true)
        .unwrap();

    let written = unsafe { std::slice::from_raw_parts(enclave.addr() as *const u8, PAGE_SIZE) };
    assert_eq!(written, &page[..]);

    let mrenclave = ctx.initialize_enclave(&enclave, &properties()).unwrap();
    assert_ne!(mrenclave, Measurement::default());
    assert_eq!(ctx.state(), State::EnclaveInitialized);

    enclave.destroy().unwrap();
    ctx.cleanup();
    assert_eq!(ctx.state(), State::Undefined);
}

#[test]
#[serial]
fn simulation_and_measurement_agree() {
    let (mut ctx, enclave) = simulated(SIZE);
    let simulated = build(&mut ctx, &enclave);
    enclave.destroy().unwrap();

    let mut ctx = LoadContext::new();
    ctx.initialize(LoadType::Measure, Modes::DEBUG).unwrap();
    let phony = ctx.create_enclave(SIZE).unwrap();
    assert_eq!(phony.addr(), PHONY_BASE);
    let measured = build(&mut ctx, &phony);

    assert_eq!(simulated, measured);
}

#[test]
#[serial]
fn out_of_bounds_page() {
    let (mut ctx, enclave) = simulated(0x4000);
    let rw = SecInfo::reg(PageFlags::READ | PageFlags::WRITE);

    let before = enclave.addr() - PAGE_SIZE as u64;
    let after = enclave.addr() + 0x4000;
    for addr in [before, after] {
        let err = ctx
            .load_enclave_data(&enclave, addr, &[0xff; PAGE_SIZE], rw, true)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    // The rejected pages did not reach the measurement
    let rejected = ctx.initialize_enclave(&enclave, &properties()).unwrap();
    enclave.destroy().unwrap();

    let mut ctx = LoadContext::new();
    ctx.initialize(LoadType::Measure, Modes::DEBUG).unwrap();
    let phony = ctx.create_enclave(0x4000).unwrap();
    let empty = ctx.initialize_enclave(&phony, &properties()).unwrap();
    assert_eq!(rejected, empty);
}

#[test]
#[serial]
fn aligned_for_every_size() {
    for shift in 12..=22 {
        let size = 1usize << shift;
        let (_ctx, enclave) = simulated(size);
        assert_eq!(enclave.addr() % size as u64, 0, "size {:#x}", size);
        assert_eq!(enclave.size(), size);
        enclave.destroy().unwrap();
    }
}

/// Whether any page of the range is mapped
#[cfg(unix)]
fn mapped(addr: u64, len: usize) -> bool {
    let mut vec = [0u8; 1];
    (addr..addr + len as u64)
        .step_by(PAGE_SIZE)
        .any(|page| unsafe {
            libc::mincore(page as *mut libc::c_void, PAGE_SIZE, vec.as_mut_ptr() as _) == 0
        })
}

#[cfg(unix)]
#[test]
#[serial]
fn destroy_releases_the_region() {
    let (mut ctx, enclave) = simulated(SIZE);
    let (addr, size) = (enclave.addr(), enclave.size());
    assert!(mapped(addr, size));

    build(&mut ctx, &enclave);
    enclave.destroy().unwrap();
    assert!(!mapped(addr, size));
}

#[test]
fn rejects_bad_sizes() {
    let mut ctx = LoadContext::new();
    ctx.initialize(LoadType::Create, Modes::SIMULATE).unwrap();

    for size in [0, 0x1800, 0x30000] {
        let err = ctx.create_enclave(size).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(ctx.state(), State::Initialized);
    }
}

#[test]
#[serial]
fn phase_order() {
    let (mut ctx, enclave) = simulated(0x2000);
    let mrenclave = ctx.initialize_enclave(&enclave, &properties()).unwrap();

    let err = ctx
        .initialize_enclave(&enclave, &properties())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);

    let rw = SecInfo::reg(PageFlags::READ | PageFlags::WRITE);
    let err = ctx
        .load_enclave_data(&enclave, enclave.addr(), &[0; PAGE_SIZE], rw, true)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    assert_eq!(ctx.state(), State::EnclaveInitialized);

    enclave.destroy().unwrap();

    // A cleaned-up context starts over
    ctx.cleanup();
    ctx.initialize(LoadType::Measure, Modes::DEBUG).unwrap();
    let phony = ctx.create_enclave(0x2000).unwrap();
    assert_eq!(ctx.initialize_enclave(&phony, &properties()).unwrap(), mrenclave);
}

#[test]
fn undefined_load_type() {
    let mut ctx = LoadContext::new();
    let err = ctx
        .initialize(LoadType::Undefined, Modes::SIMULATE)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    assert_eq!(ctx.state(), State::Undefined);
}
