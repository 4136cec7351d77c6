//! sdio-spi - Constants from the SD and SDIO Specifications
//!
//! The command indices, argument layouts and control tokens come from the
//! SDIO Specification Version 4.10, Part E1, and the SD Physical Layer
//! Specification Version 7.10. The CRC lookup tables are part of the wire
//! contract: real silicon checks them bit-for-bit, so they must match the
//! standard SD (CRC-7) and XMODEM (CRC-16) tables exactly.

//==============================================================================

// SDIO Commands

/// GO_IDLE_STATE - reset the chip's SDIO interface
pub const CMD0: u8 = 0;
/// IO_RW_DIRECT - read or write a single register byte
pub const CMD52: u8 = 52;
/// IO_RW_EXTENDED - read or write multiple bytes or blocks with one command
pub const CMD53: u8 = 53;
/// Vendor init-with-response command, switches the chip into SPI mode
pub const CMD63: u8 = 63;

/// Host-to-card direction bit, set in the first byte of every command frame
pub const DIR_HOST_TO_CARD: u8 = 0x40;

//==============================================================================

// Command argument layout, per SDIO Specification Version 4.10, Part E1,
// Section 5.3.

/// R/W flag - set for a write, clear for a read
pub const ARG_WRITE: u32 = 1 << 31;

/// Block mode flag - set for block mode, clear for byte mode
pub const ARG_BLOCK_MODE: u32 = 1 << 27;

/// OP code flag - set for an incrementing address, clear for a fixed one
pub const ARG_OPCODE_INC_ADDR: u32 = 1 << 26;

/// Bit offset of the 17-bit register address
pub const ARG_ADDRESS_OFFSET: u32 = 9;

/// Largest register address representable in a command argument
pub const ARG_ADDRESS_MAX: u32 = (1 << 18) - 1;

/// Largest CMD53 byte/block count representable in a command argument
pub const ARG_COUNT_MAX: u32 = (1 << 10) - 1;

/// Maximum number of blocks in a single CMD53 read/write
pub const CMD53_MAX_BLOCKS: u32 = 128;

/// An SDIO function on the chip.
///
/// Only the two functions the transceiver actually implements are
/// represented. Each function has a fixed block size, which in turn fixes
/// the largest transfer a single CMD53 can carry.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Function {
    /// Function 1, used for register access. 8-byte blocks.
    One,
    /// Function 2, used for bulk data. 512-byte blocks.
    Two,
}

impl Function {
    /// The function number field of a command argument (bits 28-30).
    pub(crate) fn arg_bits(self) -> u32 {
        match self {
            Function::One => 1 << 28,
            Function::Two => 2 << 28,
        }
    }

    /// Data block size for this function, in bytes.
    pub fn block_size(self) -> u32 {
        match self {
            Function::One => 8,
            Function::Two => 512,
        }
    }

    /// log2 of the block size, for turning byte counts into block counts.
    pub fn block_size_log2(self) -> u32 {
        match self {
            Function::One => 3,
            Function::Two => 9,
        }
    }

    /// The most bytes one CMD53 block-mode transfer can move.
    pub fn max_block_transfer(self) -> u32 {
        self.block_size() * CMD53_MAX_BLOCKS
    }
}

/// Pack a CMD53 argument.
///
/// The address must already be reduced to its lower 16 bits - the upper
/// bits live in the chip's keyhole registers. Out-of-range addresses or
/// counts are caller bugs, not runtime conditions.
pub fn cmd53_arg(write: bool, function: Function, block_mode: bool, address: u32, count: u32) -> u32 {
    assert!(address <= ARG_ADDRESS_MAX);
    assert!(count <= ARG_COUNT_MAX);

    let mut arg = function.arg_bits() | ARG_OPCODE_INC_ADDR;
    if write {
        arg |= ARG_WRITE;
    }
    if block_mode {
        arg |= ARG_BLOCK_MODE;
    }
    arg | (address << ARG_ADDRESS_OFFSET) | count
}

/// Pack a CMD52 single-byte-write argument.
///
/// The data byte occupies the low 8 bits where CMD53 carries its count.
pub fn cmd52_write_arg(function: Function, address: u32, data: u8) -> u32 {
    assert!(address <= ARG_ADDRESS_MAX);

    ARG_WRITE | function.arg_bits() | (address << ARG_ADDRESS_OFFSET) | u32::from(data)
}

//==============================================================================

// SPI control tokens, per SD Physical Layer Specification Version 7.10,
// Section 7.3.3.

/// Start token for single block read/write and multiple block read
pub const TOKEN_START_BLOCK: u8 = 0xFE;

/// Start token for each block of a multiple block write
pub const TOKEN_MULTI_WRITE: u8 = 0xFC;

/// Stop Tran token, ends a multiple block write
pub const TOKEN_STOP_TRAN: u8 = 0xFD;

/// Data response token: block accepted
pub const TOKEN_DATA_ACCEPTED: u8 = 0xE1 | (0x02 << 1);

/// Data response token: block rejected due to a CRC error
pub const TOKEN_DATA_REJECTED_CRC: u8 = 0xE1 | (0x05 << 1);

/// Data response token: block rejected due to a write error
pub const TOKEN_DATA_REJECTED_WRITE: u8 = 0xE1 | (0x06 << 1);

//==============================================================================

/// Lookup table for the table-driven CRC-7 implementation.
///
/// Polynomial x^7 + x^3 + 1, per the SD Physical Layer Specification.
const CRC7_TABLE: [u8; 256] = [
    0x00, 0x09, 0x12, 0x1b, 0x24, 0x2d, 0x36, 0x3f,
    0x48, 0x41, 0x5a, 0x53, 0x6c, 0x65, 0x7e, 0x77,
    0x19, 0x10, 0x0b, 0x02, 0x3d, 0x34, 0x2f, 0x26,
    0x51, 0x58, 0x43, 0x4a, 0x75, 0x7c, 0x67, 0x6e,
    0x32, 0x3b, 0x20, 0x29, 0x16, 0x1f, 0x04, 0x0d,
    0x7a, 0x73, 0x68, 0x61, 0x5e, 0x57, 0x4c, 0x45,
    0x2b, 0x22, 0x39, 0x30, 0x0f, 0x06, 0x1d, 0x14,
    0x63, 0x6a, 0x71, 0x78, 0x47, 0x4e, 0x55, 0x5c,
    0x64, 0x6d, 0x76, 0x7f, 0x40, 0x49, 0x52, 0x5b,
    0x2c, 0x25, 0x3e, 0x37, 0x08, 0x01, 0x1a, 0x13,
    0x7d, 0x74, 0x6f, 0x66, 0x59, 0x50, 0x4b, 0x42,
    0x35, 0x3c, 0x27, 0x2e, 0x11, 0x18, 0x03, 0x0a,
    0x56, 0x5f, 0x44, 0x4d, 0x72, 0x7b, 0x60, 0x69,
    0x1e, 0x17, 0x0c, 0x05, 0x3a, 0x33, 0x28, 0x21,
    0x4f, 0x46, 0x5d, 0x54, 0x6b, 0x62, 0x79, 0x70,
    0x07, 0x0e, 0x15, 0x1c, 0x23, 0x2a, 0x31, 0x38,
    0x41, 0x48, 0x53, 0x5a, 0x65, 0x6c, 0x77, 0x7e,
    0x09, 0x00, 0x1b, 0x12, 0x2d, 0x24, 0x3f, 0x36,
    0x58, 0x51, 0x4a, 0x43, 0x7c, 0x75, 0x6e, 0x67,
    0x10, 0x19, 0x02, 0x0b, 0x34, 0x3d, 0x26, 0x2f,
    0x73, 0x7a, 0x61, 0x68, 0x57, 0x5e, 0x45, 0x4c,
    0x3b, 0x32, 0x29, 0x20, 0x1f, 0x16, 0x0d, 0x04,
    0x6a, 0x63, 0x78, 0x71, 0x4e, 0x47, 0x5c, 0x55,
    0x22, 0x2b, 0x30, 0x39, 0x06, 0x0f, 0x14, 0x1d,
    0x25, 0x2c, 0x37, 0x3e, 0x01, 0x08, 0x13, 0x1a,
    0x6d, 0x64, 0x7f, 0x76, 0x49, 0x40, 0x5b, 0x52,
    0x3c, 0x35, 0x2e, 0x27, 0x18, 0x11, 0x0a, 0x03,
    0x74, 0x7d, 0x66, 0x6f, 0x50, 0x59, 0x42, 0x4b,
    0x17, 0x1e, 0x05, 0x0c, 0x33, 0x3a, 0x21, 0x28,
    0x5f, 0x56, 0x4d, 0x44, 0x7b, 0x72, 0x69, 0x60,
    0x0e, 0x07, 0x1c, 0x15, 0x2a, 0x23, 0x38, 0x31,
    0x46, 0x4f, 0x54, 0x5d, 0x62, 0x6b, 0x70, 0x79,
];

/// Compute the CRC-7 used to frame SDIO commands.
///
/// `crc` seeds the calculation; pass 0 for a fresh command frame. The
/// return value is the raw 7-bit CRC - when embedded in a command frame it
/// gets shifted left one place with the end bit (always 1) in the LSB.
pub fn crc7(crc: u8, data: &[u8]) -> u8 {
    let mut crc = crc;
    for &byte in data {
        crc = CRC7_TABLE[usize::from((crc << 1) ^ byte)];
    }
    crc
}

/// Lookup table for the table-driven CRC-16 implementation (XMODEM model).
const CRC16_TABLE: [u16; 256] = [
    0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50a5, 0x60c6, 0x70e7,
    0x8108, 0x9129, 0xa14a, 0xb16b, 0xc18c, 0xd1ad, 0xe1ce, 0xf1ef,
    0x1231, 0x0210, 0x3273, 0x2252, 0x52b5, 0x4294, 0x72f7, 0x62d6,
    0x9339, 0x8318, 0xb37b, 0xa35a, 0xd3bd, 0xc39c, 0xf3ff, 0xe3de,
    0x2462, 0x3443, 0x0420, 0x1401, 0x64e6, 0x74c7, 0x44a4, 0x5485,
    0xa56a, 0xb54b, 0x8528, 0x9509, 0xe5ee, 0xf5cf, 0xc5ac, 0xd58d,
    0x3653, 0x2672, 0x1611, 0x0630, 0x76d7, 0x66f6, 0x5695, 0x46b4,
    0xb75b, 0xa77a, 0x9719, 0x8738, 0xf7df, 0xe7fe, 0xd79d, 0xc7bc,
    0x48c4, 0x58e5, 0x6886, 0x78a7, 0x0840, 0x1861, 0x2802, 0x3823,
    0xc9cc, 0xd9ed, 0xe98e, 0xf9af, 0x8948, 0x9969, 0xa90a, 0xb92b,
    0x5af5, 0x4ad4, 0x7ab7, 0x6a96, 0x1a71, 0x0a50, 0x3a33, 0x2a12,
    0xdbfd, 0xcbdc, 0xfbbf, 0xeb9e, 0x9b79, 0x8b58, 0xbb3b, 0xab1a,
    0x6ca6, 0x7c87, 0x4ce4, 0x5cc5, 0x2c22, 0x3c03, 0x0c60, 0x1c41,
    0xedae, 0xfd8f, 0xcdec, 0xddcd, 0xad2a, 0xbd0b, 0x8d68, 0x9d49,
    0x7e97, 0x6eb6, 0x5ed5, 0x4ef4, 0x3e13, 0x2e32, 0x1e51, 0x0e70,
    0xff9f, 0xefbe, 0xdfdd, 0xcffc, 0xbf1b, 0xaf3a, 0x9f59, 0x8f78,
    0x9188, 0x81a9, 0xb1ca, 0xa1eb, 0xd10c, 0xc12d, 0xf14e, 0xe16f,
    0x1080, 0x00a1, 0x30c2, 0x20e3, 0x5004, 0x4025, 0x7046, 0x6067,
    0x83b9, 0x9398, 0xa3fb, 0xb3da, 0xc33d, 0xd31c, 0xe37f, 0xf35e,
    0x02b1, 0x1290, 0x22f3, 0x32d2, 0x4235, 0x5214, 0x6277, 0x7256,
    0xb5ea, 0xa5cb, 0x95a8, 0x8589, 0xf56e, 0xe54f, 0xd52c, 0xc50d,
    0x34e2, 0x24c3, 0x14a0, 0x0481, 0x7466, 0x6447, 0x5424, 0x4405,
    0xa7db, 0xb7fa, 0x8799, 0x97b8, 0xe75f, 0xf77e, 0xc71d, 0xd73c,
    0x26d3, 0x36f2, 0x0691, 0x16b0, 0x6657, 0x7676, 0x4615, 0x5634,
    0xd94c, 0xc96d, 0xf90e, 0xe92f, 0x99c8, 0x89e9, 0xb98a, 0xa9ab,
    0x5844, 0x4865, 0x7806, 0x6827, 0x18c0, 0x08e1, 0x3882, 0x28a3,
    0xcb7d, 0xdb5c, 0xeb3f, 0xfb1e, 0x8bf9, 0x9bd8, 0xabbb, 0xbb9a,
    0x4a75, 0x5a54, 0x6a37, 0x7a16, 0x0af1, 0x1ad0, 0x2ab3, 0x3a92,
    0xfd2e, 0xed0f, 0xdd6c, 0xcd4d, 0xbdaa, 0xad8b, 0x9de8, 0x8dc9,
    0x7c26, 0x6c07, 0x5c64, 0x4c45, 0x3ca2, 0x2c83, 0x1ce0, 0x0cc1,
    0xef1f, 0xff3e, 0xcf5d, 0xdf7c, 0xaf9b, 0xbfba, 0x8fd9, 0x9ff8,
    0x6e17, 0x7e36, 0x4e55, 0x5e74, 0x2e93, 0x3eb2, 0x0ed1, 0x1ef0,
];

/// Compute the CRC-16 (XMODEM model) protecting each data block.
///
/// `crc` seeds the calculation; pass 0 for each block - the CRC is applied
/// per block, never cumulatively across a multi-block transfer.
pub fn crc16(crc: u16, data: &[u8]) -> u16 {
    let mut crc = crc;
    for &byte in data {
        crc = CRC16_TABLE[usize::from((crc >> 8) as u8 ^ byte)] ^ (crc << 8);
    }
    crc
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
