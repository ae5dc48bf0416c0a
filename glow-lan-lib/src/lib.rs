//! # Glow LAN Library
//!
//! `glow-lan-lib` talks to LAN lighting devices over their binary UDP protocol.
//! It discovers devices by broadcast, keeps a registry of devices and groups,
//! and correlates every request with its acknowledgement or state reply.
//!
//! ## Example
//!
//! Discover devices for five seconds and switch them all on:
//!
//! ```no_run
//! use glow_lan_lib::client::Client;
//! use glow_lan_lib::config::ClientConfig;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Client::start(ClientConfig::default()).await?;
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!
//!     for device in client.devices() {
//!         device.set_power(true).await?;
//!         println!("Switched on {}", device.address());
//!     }
//!
//!     client.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## License
//!
//! This project is dual-licensed under the MIT License and the Apache License, Version 2.0.
//! You may choose to use either license, depending on your project needs.

// Wire format: header codec, message catalog and typed payloads.
pub mod protocol;

// Request/response correlation over a shared socket.
pub mod dispatcher;

// Socket ownership, receive and discovery loops, device registry and events.
pub mod client;

// Per-device and per-group facades.
pub mod device;

pub mod config;
pub mod error;

// One-shot discovery used by the command line tool.
pub mod util;
