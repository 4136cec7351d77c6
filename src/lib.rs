//! # sdio-spi
//!
//! > An SDIO-over-SPI protocol engine written in Embedded Rust
//!
//! This crate speaks the SDIO protocol, tunnelled over a plain SPI bus, to a
//! WiFi transceiver chip. It is intended for platform bring-up and
//! diagnostics: it gives you validated register and bulk memory access to the
//! chip before any higher-level WiFi stack exists. It is written in
//! pure-Rust, is `#![no_std]` and does not use `alloc` or `collections` to
//! keep the memory footprint low. It is designed for readability and
//! debugability over performance.
//!
//! ## Using the crate
//!
//! You will need something that implements the [`Transport`] trait, which
//! can shift bytes over the SPI bus and control the chip-select line. A
//! ready-made [`SpiTransport`] is provided for any platform with
//! `embedded-hal` 1.0 `SpiBus` and `OutputPin` implementations.
//!
//! ```rust
//! use sdio_spi::{Error, SdioSpi, Transport};
//!
//! fn example<T: Transport>(transport: T) -> Result<(), Error> {
//!     let mut chip = SdioSpi::new(transport);
//!     // Switch the chip from SD mode into SPI mode.
//!     chip.enter_spi_mode()?;
//!     // Registers are read through function 1 with a 4-byte access width.
//!     let chip_id = chip.read_le32(0x1005_4d20)?;
//!     let _ = chip_id;
//!     // Bulk transfers go through function 2 in 512-byte blocks.
//!     let mut buffer = [0u8; 64];
//!     chip.read(0x8010_0000, &mut buffer)?;
//!     chip.write(0x8010_0000, &buffer)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! * `log`: Enabled by default. Generates log messages using the `log` crate.
//! * `defmt-log`: By turning off the default features and enabling the
//!   `defmt-log` feature you can configure this crate to log messages over defmt
//!   instead.
//!
//! You cannot enable both the `log` feature and the `defmt-log` feature.

#![cfg_attr(not(test), no_std)]

#[cfg(test)]
#[macro_use]
extern crate hex_literal;

pub mod sdio;
pub mod transport;

pub use sdio::{AccessWidth, Error, Function, SdioSpi, R5};
pub use transport::{SpiTransport, Transport};

#[cfg(all(feature = "defmt-log", feature = "log"))]
compile_error!("Cannot enable both log and defmt-log");

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::debug! but does nothing at all
macro_rules! debug {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::trace! but does nothing at all
macro_rules! trace {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::warn! but does nothing at all
macro_rules! warn {
    ($($arg:tt)+) => {};
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
