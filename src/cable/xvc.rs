//! Implement the `Cable` trait for remote JTAG over the Xilinx Virtual
//! Cable (XVC) protocol.
//!
//! Every flush sends one `shift:` request on a connected TCP socket: the
//! 6-byte ASCII tag, a 4-byte little-endian bit count, then the TMS and
//! TDI vectors (one bit per TAP step, LSB-first within each byte).  The
//! server answers with the same number of TDO bytes, read back blocking
//! and byte-exact.
use std::io::{Read, Write};
use std::net::TcpStream;

use log::{debug, info};

use crate::cable::Cable;
use crate::error::Result;

/// Port XVC servers conventionally listen on.
pub const DEFAULT_PORT: u16 = 2542;

const CAPACITY_STEPS: usize = 16384;
const BUFFER_BYTES: usize = CAPACITY_STEPS / 8;

/// Parallel TMS/TDI bit vectors awaiting one `shift:` round-trip.
struct ShiftBuffer {
    tms: [u8; BUFFER_BYTES],
    tdi: [u8; BUFFER_BYTES],
    bits: usize,
}

impl ShiftBuffer {
    fn new() -> Self {
        Self {
            tms: [0; BUFFER_BYTES],
            tdi: [0; BUFFER_BYTES],
            bits: 0,
        }
    }

    fn append(&mut self, tms: bool, tdi: bool) {
        let index = self.bits / 8;
        let bit = self.bits % 8;

        if bit == 0 {
            self.tms[index] = 0;
            self.tdi[index] = 0;
        }
        self.tms[index] |= (tms as u8) << bit;
        self.tdi[index] |= (tdi as u8) << bit;
        self.bits += 1;
    }

    fn is_full(&self) -> bool {
        self.bits >= CAPACITY_STEPS
    }
}

pub struct Xvc {
    stream: TcpStream,
    buffer: ShiftBuffer,
    rx_buffer: [u8; BUFFER_BYTES],
    curr_tms: bool,
    clk_hz: u32,
}

impl Xvc {
    /// Connect to an XVC server.  `host` may be a name or an address; the
    /// connection stays open for the lifetime of the cable.
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            buffer: ShiftBuffer::new(),
            rx_buffer: [0; BUFFER_BYTES],
            curr_tms: false,
            clk_hz: 0,
        })
    }

    fn append_step(&mut self, tms: bool, tdi: bool) -> Result<()> {
        self.curr_tms = tms;
        if self.buffer.is_full() {
            self.write_buffer(None)?;
        }
        self.buffer.append(tms, tdi);
        Ok(())
    }

    /// Perform one `shift:` round-trip for the pending steps, copying the
    /// TDO bytes to `tdo` when requested.  Returns the steps transferred.
    fn write_buffer(&mut self, tdo: Option<&mut [u8]>) -> Result<usize> {
        if self.buffer.bits == 0 {
            return Ok(0);
        }
        let bits = self.buffer.bits;
        let byte_len = (bits + 7) / 8;

        self.stream.write_all(b"shift:")?;
        self.stream.write_all(&(bits as u32).to_le_bytes())?;
        self.stream.write_all(&self.buffer.tms[..byte_len])?;
        self.stream.write_all(&self.buffer.tdi[..byte_len])?;
        self.stream.read_exact(&mut self.rx_buffer[..byte_len])?;

        if let Some(tdo) = tdo {
            tdo[..byte_len].copy_from_slice(&self.rx_buffer[..byte_len]);
        }

        self.buffer.bits = 0;
        Ok(bits)
    }
}

impl Cable for Xvc {
    fn set_clk_freq(&mut self, hz: u32) -> u32 {
        // The server clocks at its own fixed rate.
        self.clk_hz = hz;
        info!("jtag frequency: requested {}Hz -> real {}Hz", hz, hz);
        hz
    }

    fn write_tms(&mut self, tms: &[bool], flush: bool) -> Result<()> {
        debug!("write_tms len {} flush {}", tms.len(), flush);

        for &bit in tms {
            self.append_step(bit, true)?;
        }
        if flush {
            self.flush()?;
        }
        Ok(())
    }

    fn write_tdi(
        &mut self,
        tx: &[u8],
        mut rx: Option<&mut [u8]>,
        bits: usize,
        last: bool,
    ) -> Result<()> {
        debug!("write_tdi len {} last {}", bits, last);

        self.flush()?;

        let mut pos = 0;
        while pos < bits {
            let chunk = (bits - pos).min(CAPACITY_STEPS);
            for i in 0..chunk {
                if last && pos + i == bits - 1 {
                    self.curr_tms = true;
                }
                let tms = self.curr_tms;
                let tdi = tx[(pos + i) >> 3] & (1 << ((pos + i) & 7)) != 0;
                self.append_step(tms, tdi)?;
            }
            match rx.as_deref_mut() {
                Some(buf) => self.write_buffer(Some(&mut buf[pos / 8..]))?,
                None => self.write_buffer(None)?,
            };
            pos += chunk;
        }
        Ok(())
    }

    fn toggle_clk(&mut self, tms: bool, tdi: bool, count: usize) -> Result<()> {
        for _ in 0..count {
            self.append_step(tms, tdi)?;
        }
        self.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<usize> {
        self.write_buffer(None)
    }

    fn buffer_capacity(&self) -> usize {
        CAPACITY_STEPS
    }

    fn is_full(&self) -> bool {
        self.buffer.is_full()
    }
}
