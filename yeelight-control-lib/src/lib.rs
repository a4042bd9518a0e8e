//! # Yeelight Control Library
//!
//! `yeelight-control-lib` is a Rust library for controlling Yeelight smart bulbs over
//! their LAN protocol. Bulbs are found with a multicast search, and each bulb is then
//! driven over a TCP connection that carries one JSON message per line in each
//! direction.
//!
//! ## Features
//!
//! - Device discovery on local networks
//! - A protocol client with a background reader that classifies every frame as a
//!   command acknowledgement, an error or a notification
//! - Typed commands for power, brightness and color
//! - Device groups that broadcast commands to several bulbs at once
//!
//! ## Example
//!
//! ```no_run
//! use yeelight_control_lib::config::DiscoveryOptions;
//! use yeelight_control_lib::util::discovery::Discovery;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let devices = Discovery::find_devices(&DiscoveryOptions::default()).await?;
//!
//!     for mut device in devices {
//!         device.connect().await?;
//!         let id = device.toggle().await?;
//!         if let Some(response) = device.next_response().await? {
//!             println!("{} answered command {}: {}", device.name, id, response);
//!         }
//!         device.disconnect().await?;
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Disclaimer
//!
//! This project is not affiliated with, authorized by, endorsed by, or in any way officially connected
//! with Yeelight or its affiliates.
//!
//! ## License
//!
//! This project is dual-licensed under the MIT License and the Apache License, Version 2.0.
//! You may choose to use either license, depending on your project needs.

// Client and discovery settings, with the protocol's well-known ports and addresses.
pub mod config;

// The `device` module wraps a protocol client with a name and typed commands,
// and provides groups of devices that are driven together.
//
// Example usage:
//
// ```
// use yeelight_control_lib::device::{Device, Power};
//
// let mut device = Device::new("desk", "192.168.1.20:55443".parse().unwrap());
// device.connect().await?;
// device.set_power(Power::On).await?;
// ```
pub mod device;

pub mod error;

// The `protocol` module holds the wire format (commands and responses) and the
// TCP client that exchanges them with a bulb.
pub mod protocol;

// The `util` module provides device discovery.
pub mod util;

pub use error::{Error, Result};
