// SPDX-License-Identifier: Apache-2.0

#![allow(missing_docs)]

include!(concat!(env!("OUT_DIR"), "/protos/mod.rs"));
