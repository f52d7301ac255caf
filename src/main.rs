// SPDX-License-Identifier: Apache-2.0

//! `sgxload`: inspect SGX support and measure enclave images

#![deny(clippy::all)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

mod cli;

use clap::Parser;

fn main() -> anyhow::Result<()> {
    let app = cli::Options::parse();
    app.execute()
}
