//! Traits and types for the byte-level SPI transport.
//!
//! The protocol engine talks to the chip exclusively through the
//! [`Transport`] trait: byte and buffer transfers, chip-select control, and
//! a critical-section bracket for the one poll that must not be preempted.
//! Platforms implement it over whatever SPI driver they have;
//! [`SpiTransport`] covers any platform with `embedded-hal` 1.0 traits.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::warn;

/// A byte-level SPI connection to the transceiver.
///
/// The implementation must have exclusive use of the bus and the
/// chip-select line - the engine performs at most one transaction at a
/// time and expects nobody else to touch the wires while it is in flight.
///
/// Reads must clock 0xFF out on MOSI, per SPI-mode SD convention; an idle
/// chip answers 0xFF.
pub trait Transport {
    /// Sample one byte from the chip, clocking 0xFF out.
    fn read_byte(&mut self) -> u8;

    /// Shift one byte out to the chip.
    fn write_byte(&mut self, byte: u8);

    /// Fill `buffer` with bytes clocked out of the chip.
    fn read_buf(&mut self, buffer: &mut [u8]) {
        for byte in buffer.iter_mut() {
            *byte = self.read_byte();
        }
    }

    /// Shift a buffer of bytes out to the chip.
    fn write_buf(&mut self, buffer: &[u8]) {
        for &byte in buffer.iter() {
            self.write_byte(byte);
        }
    }

    /// Drive chip select active (low).
    fn assert_chip_select(&mut self);

    /// Release chip select (high).
    fn deassert_chip_select(&mut self);

    /// Suppress scheduler preemption and interrupts until
    /// [`exit_critical`](Transport::exit_critical).
    ///
    /// Nesting is not required - the engine brackets exactly one short,
    /// bounded poll at a time.
    fn enter_critical(&mut self);

    /// Undo [`enter_critical`](Transport::enter_critical).
    fn exit_critical(&mut self);
}

/// A [`Transport`] over `embedded-hal` 1.0 [`SpiBus`] and [`OutputPin`]
/// implementations, with the preemption bracket supplied by the
/// `critical-section` crate.
///
/// The `Transport` interface is infallible, matching the hardware
/// abstraction it models. Should the underlying SPI driver report an error
/// the transfer result is replaced with 0x00, which the engine surfaces as
/// a [`DeviceNotReady`](crate::Error::DeviceNotReady) or
/// [`ResponseTimeout`](crate::Error::ResponseTimeout) rather than being
/// lost.
pub struct SpiTransport<SPI, CS>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
{
    spi: SPI,
    cs: CS,
    restore: Option<critical_section::RestoreState>,
}

impl<SPI, CS> SpiTransport<SPI, CS>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
{
    /// Create a new transport from an SPI bus and a chip-select pin.
    ///
    /// The pin must be configured so that driving it low selects the chip.
    pub fn new(spi: SPI, cs: CS) -> SpiTransport<SPI, CS> {
        SpiTransport {
            spi,
            cs,
            restore: None,
        }
    }

    /// Consume the transport, handing back the SPI bus and pin.
    pub fn free(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }
}

impl<SPI, CS> Transport for SpiTransport<SPI, CS>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
{
    fn read_byte(&mut self) -> u8 {
        let mut buffer = [0xFF];
        if self.spi.transfer_in_place(&mut buffer).is_err() {
            warn!("SPI transfer failed");
            return 0;
        }
        buffer[0]
    }

    fn write_byte(&mut self, byte: u8) {
        if self.spi.write(&[byte]).is_err() {
            warn!("SPI write failed");
        }
    }

    fn read_buf(&mut self, buffer: &mut [u8]) {
        buffer.fill(0xFF);
        if self.spi.transfer_in_place(buffer).is_err() {
            warn!("SPI transfer failed");
            buffer.fill(0);
        }
    }

    fn write_buf(&mut self, buffer: &[u8]) {
        if self.spi.write(buffer).is_err() {
            warn!("SPI write failed");
        }
    }

    fn assert_chip_select(&mut self) {
        if self.cs.set_low().is_err() {
            warn!("Failed to drive chip select low");
        }
    }

    fn deassert_chip_select(&mut self) {
        // Make sure everything has hit the wire before letting go.
        if self.spi.flush().is_err() {
            warn!("SPI flush failed");
        }
        if self.cs.set_high().is_err() {
            warn!("Failed to drive chip select high");
        }
    }

    fn enter_critical(&mut self) {
        let state = unsafe { critical_section::acquire() };
        self.restore = Some(state);
    }

    fn exit_critical(&mut self) {
        if let Some(state) = self.restore.take() {
            unsafe { critical_section::release(state) };
        }
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
