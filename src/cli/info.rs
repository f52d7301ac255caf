// SPDX-License-Identifier: Apache-2.0

use std::fmt::{self, Formatter};

use clap::Args;
#[cfg(unix)]
use libc::{uname, utsname};
use serde::Serialize;
use sgxload::backend::{probe, Datum};
use sgxload::Config;

/// Show details about enclave backend support on this system
#[derive(Args, Debug)]
pub struct Options {
    #[clap(short, long)]
    /// Emit JSON rather than human-readable output
    json: bool,
}

impl Options {
    pub fn execute(self, config: &Config) -> anyhow::Result<()> {
        let info = Info {
            version: env!("CARGO_PKG_VERSION"),
            system_info: system_info(),
            backends: probe(config),
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&info)?);
        } else {
            println!("{}", info);
        }

        Ok(())
    }
}

#[cfg(windows)]
fn system_info() -> String {
    "Windows".into()
}

#[cfg(unix)]
fn system_info() -> String {
    use std::{ffi::CStr, io, mem::MaybeUninit, os::raw::c_char, str::Utf8Error};

    fn utsname_to_string(mut utsname: utsname) -> Result<String, Utf8Error> {
        fn array_to_str<const N: usize>(array: &'_ mut [c_char; N]) -> Result<&'_ str, Utf8Error> {
            array[N - 1] = 0;
            unsafe { CStr::from_ptr(array.as_ptr()) }.to_str()
        }

        Ok(format!(
            "{} {} {} {}",
            array_to_str(&mut utsname.sysname)?,
            array_to_str(&mut utsname.release)?,
            array_to_str(&mut utsname.version)?,
            array_to_str(&mut utsname.machine)?,
        ))
    }

    let mut utsname = MaybeUninit::uninit();

    if unsafe { uname(utsname.as_mut_ptr()) } != 0 {
        format!("[{}]", io::Error::last_os_error())
    } else {
        utsname_to_string(unsafe { utsname.assume_init() })
            .unwrap_or_else(|e| format!("[utf8 error: {}]", e))
    }
}

#[derive(Serialize)]
struct Info {
    version: &'static str,
    system_info: String,
    backends: Vec<Datum>,
}

fn icon(is_atty: bool, pass: bool) -> String {
    use colorful::*;

    match (is_atty, pass) {
        (true, true) => "✔".green().to_string(),
        (true, false) => "✗".red().to_string(),
        (false, true) => "✔".into(),
        (false, false) => "✗".into(),
    }
}

impl fmt::Display for Info {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let is_atty = atty::is(atty::Stream::Stdout);

        writeln!(f, "sgxload version {}", self.version)?;
        writeln!(f, "System Info: {}", self.system_info)?;

        for datum in &self.backends {
            write!(f, "{} {}", icon(is_atty, datum.pass), datum.name)?;

            if let Some(ref info) = datum.info {
                write!(f, ": {}", info)?;
            }
            writeln!(f)?;
        }

        for datum in &self.backends {
            if let Some(mesg) = datum.mesg.as_ref() {
                writeln!(f, "\n  {}\n", mesg)?;
            }
        }

        Ok(())
    }
}
