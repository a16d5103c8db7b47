// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! This crate provides communication tools for Allen-Bradley Logix
//! family controllers over EtherNet/IP
//! # Examples
//! ```no_run
//! # extern crate logix;
//! # use logix::{client::Client, tcp, value::PlcValue};
//! # use std::time::Duration;
//!
//! # fn main() {
//!     let mut opts = tcp::Options::new("192.168.1.10");
//!     opts.processor_slot = 0;
//!     opts.timeout = Duration::from_secs(2);
//!     let mut cl = Client::new_tcp(opts);
//!
//!     match cl.read("HeartBeat") {
//!         Ok(r) => println!("{}: {}", r.status, r.value),
//!         Err(e) => {
//!             println!("{:?}", e.to_string());
//!             return;
//!         }
//!     };
//!
//!     match cl.write("Setpoint", PlcValue::Dint(1500)) {
//!         Ok(r) => println!("{}", r.status),
//!         Err(e) => println!("{:?}", e.to_string()),
//!     };
//!
//!     cl.close();
//! # }
//! ```
pub mod client;
mod constant;
pub mod device;
pub mod eip;
pub mod error;
pub mod tag;
pub mod tcp;
pub mod transport;
pub mod value;
