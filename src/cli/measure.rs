// SPDX-License-Identifier: Apache-2.0

use anyhow::{anyhow, bail, Context};
use camino::Utf8PathBuf;
use clap::Args;
use log::debug;
use sgxload::types::{AttributeFlags, PageFlags, SecInfo, PAGE_SIZE};
use sgxload::{Config, EnclaveProperties, LoadContext, LoadType, Measurement, Modes};

/// Compute the MRENCLAVE of a flat enclave image
///
/// The image is loaded page by page as measured, readable, writable and
/// executable pages, zero-padding the last one.
#[derive(Args, Debug)]
pub struct Options {
    /// Enclave size in bytes (a power of two; `0x` for hex)
    #[clap(long, parse(try_from_str = parse_size))]
    size: usize,

    /// Offset of the image within the enclave (page aligned; `0x` for hex)
    #[clap(long, default_value = "0", parse(try_from_str = parse_size))]
    base_offset: usize,

    /// Build a debug enclave
    #[clap(long)]
    debug: bool,

    /// Build a simulated enclave instead of only measuring
    #[clap(long)]
    simulate: bool,

    /// The enclave image
    image: Utf8PathBuf,
}

impl Options {
    pub fn execute(self, config: &Config) -> anyhow::Result<()> {
        let image = std::fs::read(&self.image)
            .with_context(|| format!("failed to read {}", self.image))?;

        println!("{}", self.measure(config, &image)?);
        Ok(())
    }

    fn measure(&self, config: &Config, image: &[u8]) -> anyhow::Result<Measurement> {
        if self.base_offset % PAGE_SIZE != 0 {
            bail!("base offset {:#x} is not page aligned", self.base_offset);
        }

        self.base_offset
            .checked_add(image.len())
            .filter(|end| *end <= self.size)
            .ok_or_else(|| anyhow!("image does not fit in a {:#x} byte enclave", self.size))?;

        let (load_type, mut modes) = match self.simulate {
            true => (LoadType::Create, Modes::SIMULATE),
            false => (LoadType::Measure, Modes::empty()),
        };

        let mut flags = AttributeFlags::MODE64BIT;
        if self.debug {
            modes |= Modes::DEBUG;
            flags |= AttributeFlags::DEBUG;
        }

        let mut ctx = LoadContext::new();
        ctx.initialize_with(config.clone(), load_type, modes)
            .context("failed to initialize the load context")?;

        let enclave = ctx
            .create_enclave(self.size)
            .context("failed to create the enclave")?;
        debug!("loading {:#x} image bytes at {:#x}", image.len(), enclave.addr());

        let secinfo = SecInfo::reg(PageFlags::READ | PageFlags::WRITE | PageFlags::EXECUTE);
        for (i, chunk) in image.chunks(PAGE_SIZE).enumerate() {
            let mut page = [0u8; PAGE_SIZE];
            page[..chunk.len()].copy_from_slice(chunk);

            let addr = enclave.addr() + (self.base_offset + i * PAGE_SIZE) as u64;
            ctx.load_enclave_data(&enclave, addr, &page, secinfo, true)
                .with_context(|| format!("failed to load page {:#x}", addr))?;
        }

        let mrenclave = ctx
            .initialize_enclave(&enclave, &EnclaveProperties::unsigned(flags))
            .context("failed to initialize the enclave")?;

        enclave.destroy().context("failed to destroy the enclave")?;
        Ok(mrenclave)
    }
}

fn parse_size(s: &str) -> anyhow::Result<usize> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    };

    parsed.with_context(|| format!("invalid size {:?}", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn options(size: usize, simulate: bool) -> Options {
        Options {
            size,
            base_offset: 0,
            debug: true,
            simulate,
            image: "image.bin".into(),
        }
    }

    #[test]
    fn sizes() {
        assert_eq!(parse_size("4096").unwrap(), 0x1000);
        assert_eq!(parse_size("0x10000").unwrap(), 0x10000);
        assert_eq!(parse_size("0X20").unwrap(), 0x20);
        assert!(parse_size("0xzz").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    #[serial]
    fn simulation_matches_measurement() {
        let image: Vec<u8> = (0..0x2800).map(|i| i as u8).collect();
        let config = Config::default();

        let measured = options(0x10000, false).measure(&config, &image).unwrap();
        let simulated = options(0x10000, true).measure(&config, &image).unwrap();
        assert_eq!(measured, simulated);

        // ECREATE records only the size, so debug mode leaves MRENCLAVE alone
        let mut release = options(0x10000, false);
        release.debug = false;
        assert_eq!(release.measure(&config, &image).unwrap(), measured);

        let mut shifted = options(0x10000, false);
        shifted.base_offset = 0x1000;
        assert_ne!(shifted.measure(&config, &image).unwrap(), measured);
    }

    #[test]
    fn rejects() {
        let config = Config::default();

        assert!(options(0x1000, false).measure(&config, &[0; 0x1001]).is_err());
        assert!(options(0x3000, false).measure(&config, &[0; 0x1000]).is_err());

        let mut offset = options(0x4000, false);
        offset.base_offset = 0x800;
        assert!(offset.measure(&config, &[0; 0x10]).is_err());

        offset.base_offset = 0x3000;
        assert!(offset.measure(&config, &[0; 0x1000]).is_ok());
        assert!(offset.measure(&config, &[0; 0x1001]).is_err());
    }
}
