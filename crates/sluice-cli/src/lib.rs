//! # sluice-cli
//!
//! Configuration loading and wiring for the `sluice` binary.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;

pub use config::{DatabaseConfig, SluiceConfig};
