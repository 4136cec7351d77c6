//! Useful library code for tests
//!
//! Provides [`FakeChip`], a behavioural model of the transceiver end of the
//! SPI bus. It decodes command frames, maintains the keyhole address window,
//! serves block and byte mode data phases with real CRCs, and can inject the
//! fault conditions the protocol engine has to handle.

use std::collections::VecDeque;

use sdio_spi::sdio::proto::{crc16, crc7};
use sdio_spi::Transport;

/// Data response token: block accepted
pub const TOKEN_DATA_ACCEPTED: u8 = 0xE1 | (0x02 << 1);
/// Data response token: block rejected due to a CRC error
pub const TOKEN_DATA_REJECTED_CRC: u8 = 0xE1 | (0x05 << 1);
/// Data response token: block rejected due to a write error
pub const TOKEN_DATA_REJECTED_WRITE: u8 = 0xE1 | (0x06 << 1);

const TOKEN_START_BLOCK: u8 = 0xFE;
const TOKEN_MULTI_WRITE: u8 = 0xFC;
const TOKEN_STOP_TRAN: u8 = 0xFD;

const KEYHOLE_WINDOW_0: u32 = 0x10000;
const KEYHOLE_WINDOW_1: u32 = 0x10001;
const KEYHOLE_CONFIG: u32 = 0x10002;

/// A command frame as decoded by the fake chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub index: u8,
    pub arg: u32,
}

impl Command {
    pub fn is_write(&self) -> bool {
        self.arg & (1 << 31) != 0
    }

    pub fn function(&self) -> u32 {
        (self.arg >> 28) & 0x7
    }

    pub fn block_mode(&self) -> bool {
        self.arg & (1 << 27) != 0
    }

    /// The 17-bit register address field.
    pub fn address(&self) -> u32 {
        (self.arg >> 9) & 0x1FFFF
    }

    /// The count field (CMD53).
    ///
    /// The count budget is 10 bits but its top bit position doubles as the
    /// low address bit, so only 9 bits are safe to extract. Real counts
    /// never need more: at most 128 blocks, or a sub-block byte count.
    pub fn count(&self) -> u32 {
        self.arg & 0x1FF
    }

    /// The data byte (CMD52 write).
    pub fn data(&self) -> u8 {
        (self.arg & 0xFF) as u8
    }

    /// Bytes this CMD53 moves on the wire.
    pub fn byte_count(&self) -> u32 {
        if self.block_mode() {
            self.count() * block_size_for(self.function())
        } else {
            self.count()
        }
    }
}

fn block_size_for(function: u32) -> u32 {
    match function {
        1 => 8,
        2 => 512,
        _ => panic!("unexpected function {}", function),
    }
}

/// State of an in-progress CMD53 write data phase.
struct WriteState {
    address: u32,
    block_size: usize,
    blocks_left: u32,
    buf: Vec<u8>,
}

/// A behavioural model of the chip end of the SPI bus.
pub struct FakeChip {
    /// The chip's memory, linearly addressed from zero.
    pub mem: Vec<u8>,
    /// Every command the chip has decoded, in order.
    pub commands: Vec<Command>,
    /// Every raw 6-byte command frame, in order.
    pub frames: Vec<[u8; 6]>,
    /// Total transport calls of any kind.
    pub transport_ops: usize,
    /// Data blocks offered during write data phases.
    pub write_blocks_attempted: usize,
    /// Balanced enter/exit critical tracking.
    pub critical_depth: i32,
    pub critical_enters: usize,

    // Fault injection
    /// Serve this many read data phases with the first word duplicated
    /// over the second, CRC still valid, as the real defect behaves.
    pub duplicate_first_word_reads: u32,
    /// Serve read blocks with a corrupted CRC trailer.
    pub corrupt_read_crc: bool,
    /// Reject written blocks with the CRC-error response token.
    pub reject_write_crc: bool,
    /// Reject written blocks with the write-error response token.
    pub reject_write_error: bool,
    /// Reject this many CMD63s before accepting one.
    pub fail_cmd63: u32,
    /// Never drive MISO high: models an unpowered or wedged chip.
    pub never_ready: bool,
    /// Swallow start tokens so read data phases never begin.
    pub suppress_start_token: bool,
    /// Answer CMD53 with non-zero stuff bits.
    pub nonzero_stuff_byte: bool,

    window_lo: u8,
    window_hi: u8,
    access_width: u8,
    cs_asserted: bool,
    outgoing: VecDeque<u8>,
    cmd_buf: Vec<u8>,
    write_state: Option<WriteState>,
}

impl FakeChip {
    /// A fake with a modest 128 KiB of memory.
    pub fn new() -> FakeChip {
        FakeChip::with_mem_size(0x20000)
    }

    pub fn with_mem_size(size: usize) -> FakeChip {
        FakeChip {
            mem: vec![0; size],
            commands: Vec::new(),
            frames: Vec::new(),
            transport_ops: 0,
            write_blocks_attempted: 0,
            critical_depth: 0,
            critical_enters: 0,
            duplicate_first_word_reads: 0,
            corrupt_read_crc: false,
            reject_write_crc: false,
            reject_write_error: false,
            fail_cmd63: 0,
            never_ready: false,
            suppress_start_token: false,
            nonzero_stuff_byte: false,
            window_lo: 0,
            window_hi: 0,
            access_width: 0,
            cs_asserted: false,
            outgoing: VecDeque::new(),
            cmd_buf: Vec::new(),
            write_state: None,
        }
    }

    /// The access width last programmed into the keyhole config register.
    pub fn access_width(&self) -> u8 {
        self.access_width
    }

    /// All decoded CMD53s, in order.
    pub fn cmd53s(&self) -> Vec<Command> {
        self.commands
            .iter()
            .copied()
            .filter(|c| c.index == 53)
            .collect()
    }

    fn window_base(&self) -> u32 {
        (u32::from(self.window_hi) << 24) | (u32::from(self.window_lo) << 16)
    }

    fn pop_outgoing(&mut self) -> u8 {
        self.outgoing.pop_front().unwrap_or(0xFF)
    }

    fn push_response(&mut self, status: u8, data: u8) {
        // A byte of turnaround before the status, as real silicon produces.
        self.outgoing.push_back(0xFF);
        self.outgoing.push_back(status);
        self.outgoing.push_back(data);
    }

    fn feed(&mut self, byte: u8) {
        if self.write_state.is_some() {
            self.feed_write_data(byte);
            return;
        }
        if self.cmd_buf.is_empty() && (byte == TOKEN_STOP_TRAN || byte == 0xFF) {
            // Stop Tran after a multi-block write, or bus filler.
            return;
        }
        self.cmd_buf.push(byte);
        if self.cmd_buf.len() == 6 {
            let mut frame = [0u8; 6];
            frame.copy_from_slice(&self.cmd_buf);
            self.cmd_buf.clear();
            self.handle_frame(frame);
        }
    }

    fn handle_frame(&mut self, frame: [u8; 6]) {
        assert_eq!(frame[0] & 0x40, 0x40, "direction bit missing: {:02x?}", frame);
        let index = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let cmd = Command { index, arg };
        self.frames.push(frame);
        self.commands.push(cmd);

        match index {
            0 => {
                // GO_IDLE_STATE answers with the idle status bit set.
                self.push_response(0x01, 0xFF);
            }
            63 => {
                if self.fail_cmd63 > 0 {
                    self.fail_cmd63 -= 1;
                    self.push_response(0x05, 0xFF);
                } else {
                    self.push_response(0x00, 0xFF);
                }
            }
            52 => {
                assert_eq!(frame[5], (crc7(0, &frame[0..5]) << 1) | 1, "bad CMD52 CRC");
                assert!(cmd.is_write(), "fake only models CMD52 writes");
                self.handle_cmd52_write(cmd.address(), cmd.data());
                self.push_response(0x00, cmd.data());
            }
            53 => {
                assert_eq!(frame[5], (crc7(0, &frame[0..5]) << 1) | 1, "bad CMD53 CRC");
                let stuff = if self.nonzero_stuff_byte { 0x22 } else { 0x00 };
                self.push_response(0x00, stuff);
                self.handle_cmd53(cmd);
            }
            _ => panic!("unexpected command index {}", index),
        }
    }

    fn handle_cmd52_write(&mut self, address: u32, data: u8) {
        match address {
            KEYHOLE_WINDOW_0 => self.window_lo = data,
            KEYHOLE_WINDOW_1 => self.window_hi = data,
            KEYHOLE_CONFIG => self.access_width = data,
            _ => {
                let address = address as usize;
                assert!(address < self.mem.len(), "CMD52 write out of range");
                self.mem[address] = data;
            }
        }
    }

    fn handle_cmd53(&mut self, cmd: Command) {
        let block_size = block_size_for(cmd.function());
        let address = self.window_base() | (cmd.address() & 0xFFFF);

        if cmd.is_write() {
            let (block_size, blocks) = if cmd.block_mode() {
                (block_size, cmd.count())
            } else {
                (cmd.count(), 1)
            };
            self.write_state = Some(WriteState {
                address,
                block_size: block_size as usize,
                blocks_left: blocks,
                buf: Vec::new(),
            });
            return;
        }

        // Queue the read data phase: per block, a little turnaround, the
        // start token, the payload and a big-endian CRC16.
        let mut remaining = cmd.byte_count() as usize;
        let mut offset = address as usize;
        let mut first_block = true;
        while remaining > 0 {
            let size = remaining.min(block_size as usize);
            assert!(offset + size <= self.mem.len(), "CMD53 read out of range");
            let mut payload = self.mem[offset..offset + size].to_vec();

            if first_block && size >= 8 && self.duplicate_first_word_reads > 0 {
                self.duplicate_first_word_reads -= 1;
                let (head, tail) = payload.split_at_mut(4);
                tail[..4].copy_from_slice(head);
            }
            first_block = false;

            if self.suppress_start_token {
                return;
            }

            self.outgoing.push_back(0xFF);
            self.outgoing.push_back(0xFF);
            self.outgoing.push_back(TOKEN_START_BLOCK);
            let mut crc = crc16(0, &payload);
            if self.corrupt_read_crc {
                crc ^= 0xFFFF;
            }
            self.outgoing.extend(payload.iter().copied());
            self.outgoing.push_back((crc >> 8) as u8);
            self.outgoing.push_back(crc as u8);

            offset += size;
            remaining -= size;
        }
    }

    fn feed_write_data(&mut self, byte: u8) {
        let expected = {
            let state = self.write_state.as_ref().unwrap();
            1 + state.block_size + 2
        };
        {
            let state = self.write_state.as_mut().unwrap();
            state.buf.push(byte);
            if state.buf.len() < expected {
                return;
            }
        }

        // A complete block arrived: token, payload, CRC16.
        self.write_blocks_attempted += 1;
        let mut state = self.write_state.take().unwrap();
        let token = state.buf[0];
        assert!(
            token == TOKEN_START_BLOCK || token == TOKEN_MULTI_WRITE,
            "bad start token {:02x}",
            token
        );
        let payload = &state.buf[1..1 + state.block_size];
        let rx_crc = (u16::from(state.buf[expected - 2]) << 8) | u16::from(state.buf[expected - 1]);

        if self.reject_write_crc {
            self.outgoing.push_back(TOKEN_DATA_REJECTED_CRC);
            return;
        }
        if self.reject_write_error {
            self.outgoing.push_back(TOKEN_DATA_REJECTED_WRITE);
            return;
        }

        assert_eq!(rx_crc, crc16(0, payload), "host sent a bad block CRC");

        let address = state.address as usize;
        assert!(
            address + state.block_size <= self.mem.len(),
            "CMD53 write out of range"
        );
        self.mem[address..address + state.block_size].copy_from_slice(payload);

        self.outgoing.push_back(TOKEN_DATA_ACCEPTED);

        state.address += state.block_size as u32;
        state.blocks_left -= 1;
        state.buf.clear();
        if state.blocks_left > 0 {
            self.write_state = Some(state);
        }
    }
}

impl Transport for FakeChip {
    fn read_byte(&mut self) -> u8 {
        self.transport_ops += 1;
        assert!(self.cs_asserted, "bus read without chip select");
        if self.never_ready {
            return 0x00;
        }
        self.pop_outgoing()
    }

    fn write_byte(&mut self, byte: u8) {
        self.transport_ops += 1;
        assert!(self.cs_asserted, "bus write without chip select");
        if !self.never_ready {
            self.feed(byte);
        }
    }

    fn read_buf(&mut self, buffer: &mut [u8]) {
        for byte in buffer.iter_mut() {
            *byte = self.read_byte();
        }
    }

    fn write_buf(&mut self, buffer: &[u8]) {
        for &byte in buffer.iter() {
            self.write_byte(byte);
        }
    }

    fn assert_chip_select(&mut self) {
        self.transport_ops += 1;
        self.cs_asserted = true;
    }

    fn deassert_chip_select(&mut self) {
        self.transport_ops += 1;
        self.cs_asserted = false;
    }

    fn enter_critical(&mut self) {
        self.critical_depth += 1;
        self.critical_enters += 1;
        assert_eq!(self.critical_depth, 1, "critical sections must not nest");
    }

    fn exit_critical(&mut self) {
        self.critical_depth -= 1;
        assert_eq!(self.critical_depth, 0, "unbalanced critical section");
    }
}

/// Fill a buffer with a cycling byte pattern.
#[allow(dead_code)]
pub fn populate_buffer(data: &mut [u8]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = i as u8;
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
