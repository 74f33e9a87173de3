//! Lifecycle management for a WireGuard-family tunnel: key generation,
//! config rendering and persistence, uplink detection and systemd control.

pub mod config;
pub mod error;
pub mod generate;
pub mod manager;
pub mod model;
pub mod netutil;
pub mod process;
pub mod service;
pub mod store;
pub mod writer;

pub use config::Settings;
pub use error::{Error, Result};
pub use manager::{InterfaceLocks, TunnelManager};
