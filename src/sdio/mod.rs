//! The SDIO-over-SPI Protocol
//!
//! Implements the SDIO protocol, tunnelled over a plain SPI bus, against a
//! WiFi transceiver chip. The chip exposes two SDIO functions: function 1
//! for register access in 8-byte blocks, and function 2 for bulk data in
//! 512-byte blocks. CMD52/CMD53 arguments only carry 17 address bits, so
//! the upper 16 bits of every target address are programmed into chip-side
//! "keyhole" registers before each transfer.
//!
//! This is currently optimised for readability and debugability, not
//! performance.

pub mod proto;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
pub use proto::*;

use crate::transport::Transport;
use crate::{debug, trace, warn};

// =============================================================================
// Constants
// =============================================================================

/// Attempt budget for the bus-ready, status-byte and start-token polls.
///
/// Attempt counts rather than wall-clock timeouts keep the worst-case
/// latency bound independent of the host clock.
const MAX_BUS_ATTEMPTS: u32 = 200;

/// Attempt budget for the data response token after a written block.
///
/// Deliberately tiny: the token arrives within a couple of bytes, and the
/// poll runs with preemption suppressed.
const WRITE_RESPONSE_ATTEMPTS: u32 = 4;

/// How many times to try CMD63 before giving up on entering SPI mode.
const SPI_MODE_ATTEMPTS: u32 = 3;

/// CMD63 argument that brings the chip to its active state.
const CHIP_ACTIVE_SEQ: u32 = 0x0000_0000;

/// Keyhole register holding bits 16-23 of the target address.
const KEYHOLE_ADDRESS_WINDOW_0: u32 = 0x10000;
/// Keyhole register holding bits 24-31 of the target address.
const KEYHOLE_ADDRESS_WINDOW_1: u32 = 0x10001;
/// Keyhole register holding the access width code.
const KEYHOLE_ADDRESS_CONFIG: u32 = 0x10002;

// =============================================================================
// Types and Implementations
// =============================================================================

/// Access width programmed into the keyhole config register.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessWidth {
    /// 1-byte register accesses
    OneByte,
    /// 2-byte register accesses
    TwoByte,
    /// 4-byte register accesses
    FourByte,
}

impl AccessWidth {
    fn config_bits(self) -> u8 {
        match self {
            AccessWidth::OneByte => 0,
            AccessWidth::TwoByte => 1,
            AccessWidth::FourByte => 2,
        }
    }
}

/// IO_RW_DIRECT response in SPI mode.
///
/// See SDIO Specification Version 4.10, Part E1, Section 5.2.2.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct R5 {
    /// Status code. 0x00 means the command was accepted.
    pub status: u8,
    /// R/W data. For CMD53 these are stuff bits and must read 0x00.
    pub data: u8,
}

/// The possible errors this crate can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// Something went wrong that no other variant describes
    UnspecifiedError,
    /// The chip never signalled ready before a command
    DeviceNotReady,
    /// The chip rejected a command or a written data block
    InvalidResponse,
    /// A CMD53 response carried non-zero stuff bits
    InvalidResponseData,
    /// A received data block failed its CRC check
    InvalidCrcReceived,
    /// The chip never produced a start token for a read
    ResponseTimeout,
    /// The caller passed a length that is zero or not a multiple of 4
    InvalidInput,
}

/// Map a data response token to a result.
fn test_data_response_token(token: u8) -> Result<(), Error> {
    match token {
        TOKEN_DATA_ACCEPTED => Ok(()),
        TOKEN_DATA_REJECTED_CRC => {
            warn!("Write rejected due to CRC");
            Err(Error::InvalidResponse)
        }
        TOKEN_DATA_REJECTED_WRITE => {
            warn!("Write rejected due to write error");
            Err(Error::InvalidResponse)
        }
        _token => {
            warn!("Invalid/no data response token (0x{:x})", _token);
            Err(Error::InvalidResponse)
        }
    }
}

/// An SDIO-over-SPI connection to a WiFi transceiver chip.
///
/// Owns the [`Transport`] exclusively for as long as it exists. All
/// operations are blocking and run to completion or to error; there is
/// never more than one command or data phase in flight.
pub struct SdioSpi<T>
where
    T: Transport,
{
    transport: T,
}

impl<T> SdioSpi<T>
where
    T: Transport,
{
    /// Create a new protocol engine over the given transport.
    pub fn new(transport: T) -> SdioSpi<T> {
        SdioSpi { transport }
    }

    /// Get a temporary borrow on the underlying transport. Useful if you
    /// need to re-clock the SPI or toggle other lines.
    pub fn transport<R, F>(&mut self, func: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        func(&mut self.transport)
    }

    /// Consume the engine and hand the transport back.
    pub fn free(self) -> T {
        self.transport
    }

    // =========================================================================
    // Command framing
    // =========================================================================

    /// Send a command to the chip and validate the response.
    ///
    /// This is the bring-up escape hatch: bulk transfers go through
    /// [`read`](SdioSpi::read) and [`write`](SdioSpi::write), but early
    /// diagnostics sometimes need to poke raw commands. The returned [`R5`]
    /// carries the raw status byte for such callers.
    pub fn send_command(&mut self, cmd_idx: u8, arg: u32) -> Result<R5, Error> {
        self.transport.assert_chip_select();
        let result = self.send_command_inner(cmd_idx, arg);
        self.transport.deassert_chip_select();
        result
    }

    fn send_command_inner(&mut self, cmd_idx: u8, arg: u32) -> Result<R5, Error> {
        // The chip does not drive MISO until it has seen a CMD63, so there
        // is nothing to poll for before sending one.
        if cmd_idx != CMD63 && !self.wait_ready() {
            return Err(Error::DeviceNotReady);
        }

        let mut frame = [0u8; 6];
        frame[0] = cmd_idx | DIR_HOST_TO_CARD;
        BigEndian::write_u32(&mut frame[1..5], arg);
        frame[5] = if cmd_idx == CMD52 || cmd_idx == CMD53 {
            // End bit is always 1
            (crc7(0, &frame[0..5]) << 1) | 0x01
        } else {
            // CMD0 and CMD63 take a fixed trailer
            0xFF
        };

        self.transport.write_buf(&frame);

        // Shift bytes in until a non-0xFF status byte appears; the byte
        // after it is the R5 data field.
        let mut response = R5 {
            status: 0xFF,
            data: self.receive(),
        };
        for _ in 0..MAX_BUS_ATTEMPTS {
            response.status = response.data;
            response.data = self.receive();
            if response.status != 0xFF {
                break;
            }
        }

        trace!("CMD{} -> status 0x{:x}", cmd_idx, response.status);

        let mut result = if response.status == 0x00 {
            Ok(response)
        } else {
            Err(Error::InvalidResponse)
        };

        // Per SDIO Specification Version 4.10, Part E1, Section 5.3: for
        // CMD53 the data field shall be stuff bits and shall read as 0x00.
        if cmd_idx == CMD53 && response.data != 0x00 {
            result = Err(Error::InvalidResponseData);
        }

        result
    }

    /// Send a CMD53 and validate the response. The data phase follows
    /// separately via `get_data` or `put_data`.
    fn cmd53_command(
        &mut self,
        write: bool,
        function: Function,
        block_mode: bool,
        address: u32,
        count: u32,
    ) -> Result<(), Error> {
        let arg = cmd53_arg(write, function, block_mode, address, count);
        self.send_command(CMD53, arg).map(|_| ())
    }

    /// Perform a CMD52 write of a single register byte.
    pub fn cmd52_write(&mut self, address: u32, data: u8, function: Function) -> Result<(), Error> {
        let arg = cmd52_write_arg(function, address, data);
        self.send_command(CMD52, arg).map(|_| ())
    }

    // =========================================================================
    // Data phases
    // =========================================================================

    /// Retrieve the data phase of a CMD53 read into `buffer`.
    ///
    /// The buffer length must be a multiple of `block_size` when reading in
    /// block mode, or at most `block_size` in byte mode. A matching
    /// `cmd53_command` must have been issued first.
    fn get_data(&mut self, buffer: &mut [u8], block_size: u32) -> Result<(), Error> {
        self.transport.assert_chip_select();
        let result = self.get_data_inner(buffer, block_size);
        self.transport.deassert_chip_select();
        result
    }

    fn get_data_inner(&mut self, buffer: &mut [u8], block_size: u32) -> Result<(), Error> {
        let mut offset = 0;
        while offset < buffer.len() {
            // Wait for the chip to signal the start of the block.
            let mut token = 0xFF;
            for _ in 0..MAX_BUS_ATTEMPTS {
                token = self.receive();
                if token == TOKEN_START_BLOCK {
                    break;
                }
            }
            if token != TOKEN_START_BLOCK {
                return Err(Error::ResponseTimeout);
            }

            let size = core::cmp::min(buffer.len() - offset, block_size as usize);
            let block = &mut buffer[offset..offset + size];
            self.transport.read_buf(block);

            // CRC16 trails each block, big-endian.
            let mut rx_crc = u16::from(self.receive()) << 8;
            rx_crc |= u16::from(self.receive());

            let calc_crc = crc16(0, block);
            if calc_crc != rx_crc {
                warn!("Read CRC mismatch (got 0x{:x}, calculated 0x{:x})", rx_crc, calc_crc);
                return Err(Error::InvalidCrcReceived);
            }

            offset += size;
        }
        Ok(())
    }

    /// Transmit the data phase of a CMD53 write.
    ///
    /// `count` is in blocks for block mode, bytes for byte mode. A matching
    /// `cmd53_command` must have been issued first.
    fn put_data(
        &mut self,
        count: u32,
        data: &[u8],
        block_mode: bool,
        block_size: u32,
    ) -> Result<(), Error> {
        let size;
        let mut start_token = TOKEN_START_BLOCK;
        if block_mode {
            size = block_size as usize;
            if count > 1 {
                start_token = TOKEN_MULTI_WRITE;
            }
        } else {
            assert!(count <= block_size);
            size = count as usize;
        }

        self.transport.assert_chip_select();
        let result = self.put_data_inner(count, data, block_mode, size, start_token);

        // In a multiple block write the stop transmission is signalled by a
        // Stop Tran token where the next block's start token would go.
        if start_token == TOKEN_MULTI_WRITE {
            self.transport.write_byte(TOKEN_STOP_TRAN);
        }

        // While the card is busy programming, deasserting CS will not
        // terminate the process, and reselecting it before programming
        // finishes gets every subsequent command rejected. Wait for the bus
        // to go idle before letting go. See SD Physical Layer Specification
        // Version 7.10, Section 7.2.4.
        let _ = self.wait_ready();

        self.transport.deassert_chip_select();
        result
    }

    fn put_data_inner(
        &mut self,
        mut count: u32,
        data: &[u8],
        block_mode: bool,
        size: usize,
        start_token: u8,
    ) -> Result<(), Error> {
        let mut offset = 0;
        while count > 0 {
            if block_mode {
                count -= 1;
            } else {
                count = 0;
            }

            // Each block goes out as: start token, payload, CRC16. The CRC
            // is computed fresh per block, never cumulatively.
            let block = &data[offset..offset + size];
            let crc = crc16(0, block);

            if !self.wait_ready() {
                warn!("Bus not ready for data block");
                return Err(Error::UnspecifiedError);
            }

            self.transport.write_byte(start_token);
            self.transport.write_buf(block);
            self.transport.write_byte((crc >> 8) as u8);
            self.transport.write_byte(crc as u8);

            // The response token has to be read promptly: a scheduler
            // preemption here can overrun the chip's response window and
            // fail the next block.
            self.transport.enter_critical();
            let mut token = 0xFF;
            for _ in 0..WRITE_RESPONSE_ATTEMPTS {
                token = self.receive();
                if token != 0xFF {
                    break;
                }
            }
            self.transport.exit_critical();

            test_data_response_token(token)?;

            offset += size;
        }
        Ok(())
    }

    // =========================================================================
    // Address window
    // =========================================================================

    /// Program the keyhole registers that hold the upper 16 bits of the
    /// addresses used by CMD52 and CMD53.
    ///
    /// The window only covers one 64K span; it must be re-programmed before
    /// any command whose target lies outside the span last set. The bulk
    /// transfer operations below simply re-assert it before every chunk.
    pub fn set_address_base(
        &mut self,
        address: u32,
        access: AccessWidth,
        function: Function,
    ) -> Result<(), Error> {
        let address = address & 0xFFFF_0000;
        debug!("Window -> 0x{:x}", address);

        self.cmd52_write(KEYHOLE_ADDRESS_WINDOW_0, (address >> 16) as u8, function)?;
        self.cmd52_write(KEYHOLE_ADDRESS_WINDOW_1, (address >> 24) as u8, function)?;
        self.cmd52_write(KEYHOLE_ADDRESS_CONFIG, access.config_bits(), function)?;
        Ok(())
    }

    // =========================================================================
    // Single-command transfers
    // =========================================================================

    /// Read `buffer.len()` bytes starting at `address` with one or two
    /// CMD53s: block mode for as many whole blocks as fit, then byte mode
    /// for the remainder.
    ///
    /// Only the lower 16 address bits reach the wire; the window registers
    /// supply the rest. The transfer must fit within the current window.
    fn cmd53_read(
        &mut self,
        function: Function,
        mut address: u32,
        buffer: &mut [u8],
    ) -> Result<(), Error> {
        let block_size = function.block_size();
        let num_blocks = (buffer.len() as u32) >> function.block_size_log2();
        let mut offset = 0;

        if num_blocks > 0 {
            self.cmd53_command(false, function, true, address & 0x0000_FFFF, num_blocks)?;

            let transfer_size = (num_blocks * block_size) as usize;
            self.get_data(&mut buffer[..transfer_size], block_size)?;

            address += transfer_size as u32;
            offset = transfer_size;
        }

        // Byte mode for anything left over.
        if offset < buffer.len() {
            let remainder = (buffer.len() - offset) as u32;
            self.cmd53_command(false, function, false, address & 0x0000_FFFF, remainder)?;
            self.get_data(&mut buffer[offset..], block_size)?;
        }

        Ok(())
    }

    /// Write `data` starting at `address`, mirroring [`cmd53_read`].
    fn cmd53_write(
        &mut self,
        function: Function,
        mut address: u32,
        data: &[u8],
    ) -> Result<(), Error> {
        let block_size = function.block_size();
        let num_blocks = (data.len() as u32) >> function.block_size_log2();
        let mut offset = 0;

        if num_blocks > 0 {
            self.cmd53_command(true, function, true, address & 0x0000_FFFF, num_blocks)?;

            let transfer_size = (num_blocks * block_size) as usize;
            self.put_data(num_blocks, &data[..transfer_size], true, block_size)?;

            address += transfer_size as u32;
            offset = transfer_size;
        }

        if offset < data.len() {
            let remainder = (data.len() - offset) as u32;
            self.cmd53_command(true, function, false, address & 0x0000_FFFF, remainder)?;
            self.put_data(remainder, &data[offset..], false, block_size)?;
        }

        Ok(())
    }

    // =========================================================================
    // Bulk transfers
    // =========================================================================

    /// Read `buffer.len()` bytes from the chip starting at `address`.
    ///
    /// The length must be a non-zero multiple of 4. Transfers cannot cross
    /// 64K window boundaries, so the read is split into chunks with the
    /// address window re-programmed before each one. Any failing chunk
    /// fails the whole call.
    pub fn read(&mut self, mut address: u32, buffer: &mut [u8]) -> Result<(), Error> {
        let function = Function::Two;

        if buffer.is_empty() || buffer.len() % 4 != 0 {
            warn!("Invalid read length {}", buffer.len());
            return Err(Error::InvalidInput);
        }

        let mut offset = 0;
        while offset < buffer.len() {
            self.set_address_base(address, AccessWidth::FourByte, function)?;

            let size = self.chunk_size(address, (buffer.len() - offset) as u32, function);
            let chunk = &mut buffer[offset..offset + size as usize];
            self.cmd53_read(function, address, chunk)?;

            // The bus occasionally reads the first 4-byte word twice,
            // clobbering the second word. Re-reading the first 8 bytes
            // fetches the real data. If the re-read fails or is corrupt as
            // well, keep the first read and let the upper layers handle it.
            if chunk.len() >= 8 && chunk[0..4] == chunk[4..8] {
                warn!("Corrupt payload, re-reading first 8 bytes");
                let mut repair = [0u8; 8];
                if self.cmd53_read(function, address, &mut repair).is_ok() {
                    chunk[0..8].copy_from_slice(&repair);
                }
            }

            address += size;
            offset += size as usize;
        }

        Ok(())
    }

    /// Write `data` to the chip starting at `address`.
    ///
    /// The length must be a non-zero multiple of 4. Splitting and window
    /// handling mirror [`read`](SdioSpi::read).
    pub fn write(&mut self, mut address: u32, data: &[u8]) -> Result<(), Error> {
        let function = Function::Two;

        if data.is_empty() || data.len() % 4 != 0 {
            warn!("Invalid write length {}", data.len());
            return Err(Error::InvalidInput);
        }

        let mut offset = 0;
        while offset < data.len() {
            self.set_address_base(address, AccessWidth::FourByte, function)?;

            let size = self.chunk_size(address, (data.len() - offset) as u32, function);
            self.cmd53_write(function, address, &data[offset..offset + size as usize])?;

            address += size;
            offset += size as usize;
        }

        Ok(())
    }

    /// Read a little-endian 32-bit value from a register address.
    ///
    /// Goes through function 1 with a 4-byte access width.
    pub fn read_le32(&mut self, address: u32) -> Result<u32, Error> {
        let function = Function::One;
        let mut bytes = [0u8; 4];

        self.set_address_base(address, AccessWidth::FourByte, function)?;
        self.cmd53_read(function, address, &mut bytes)?;

        Ok(LittleEndian::read_u32(&bytes))
    }

    /// How many bytes the next chunk may carry: capped by the function's
    /// largest single-command transfer, then clamped so the chunk does not
    /// cross the next 64K window boundary.
    fn chunk_size(&self, address: u32, remaining: u32, function: Function) -> u32 {
        let size = core::cmp::min(remaining, function.max_block_transfer());
        let window_remaining = 0x1_0000 - (address & 0xFFFF);
        core::cmp::min(size, window_remaining)
    }

    // =========================================================================
    // Bring-up
    // =========================================================================

    /// Switch the chip from SD mode into SPI mode.
    ///
    /// Issues CMD63; on rejection, resets the interface with a CMD0 and
    /// tries again, up to the attempt limit. Returns the last error if the
    /// chip never accepts.
    pub fn enter_spi_mode(&mut self) -> Result<(), Error> {
        let mut result = Err(Error::UnspecifiedError);
        for _attempt in 0..SPI_MODE_ATTEMPTS {
            debug!("Enter SPI mode, attempt {}", _attempt);
            result = self.send_command(CMD63, CHIP_ACTIVE_SEQ).map(|_| ());
            if result.is_ok() {
                break;
            }
            let _ = self.send_command(CMD0, 0);
        }
        result
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    /// Sample one byte from the chip by clocking 0xFF out.
    fn receive(&mut self) -> u8 {
        self.transport.read_byte()
    }

    /// Spin until the chip returns 0xFF, or the attempt budget runs out.
    fn wait_ready(&mut self) -> bool {
        for _ in 0..MAX_BUS_ATTEMPTS {
            if self.receive() == 0xFF {
                return true;
            }
        }
        false
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
