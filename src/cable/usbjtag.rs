//! Implement the `Cable` trait for USB bit-bang JTAG dongles.
//!
//! The adapter speaks a tiny framed protocol over a pair of bulk
//! endpoints: each frame is a 2-byte length, one command byte carrying the
//! step-count remainder, and a payload packing four TAP steps per byte as
//! 2-bit (TMS, TDI) groups.  The device answers every frame with the
//! captured TDO stream, one bit per step, so a transfer is always one bulk
//! write followed by one bulk read.
use std::time::Duration;

use log::{debug, info};
use rusb::{DeviceHandle, GlobalContext};

use crate::cable::Cable;
use crate::error::{Error, Result};

const VID: u16 = 0x1781;
const PID: u16 = 0xC0C0;

const INTERFACE: u8 = 0;
const WRITE_EP: u8 = 0x02;
const READ_EP: u8 = 0x81;

/// Frame command: clock the payload out of the TAP, sampling TDO.
const CMD_TAP_OUTPUT: u8 = 0x0;

const TX_BUFFER_SIZE: usize = 2048;
const HEADER_BYTES: usize = 3;
/// Four steps per payload byte.
const CAPACITY_STEPS: usize = (TX_BUFFER_SIZE - HEADER_BYTES) * 4;
const RX_BUFFER_SIZE: usize = (CAPACITY_STEPS + 7) / 8;

const USB_TIMEOUT: Duration = Duration::from_millis(1000);

/// Transmit frame under construction: header space plus 2-bit step groups.
struct StepBuffer {
    buf: [u8; TX_BUFFER_SIZE],
    bits: usize,
}

impl StepBuffer {
    fn new() -> Self {
        Self {
            buf: [0; TX_BUFFER_SIZE],
            bits: 0,
        }
    }

    fn append(&mut self, tms: bool, tdi: bool) {
        let index = HEADER_BYTES + self.bits / 4;
        let shift = (self.bits % 4) * 2;

        if shift == 0 {
            self.buf[index] = 0;
        }
        self.buf[index] |= (tdi as u8) << shift | (tms as u8) << (shift + 1);
        self.bits += 1;
    }

    fn is_full(&self) -> bool {
        self.bits >= CAPACITY_STEPS
    }

    /// Fill in the frame header and pad the unused step slots of the final
    /// payload byte with the last-seen TMS level.  Returns the bytes to
    /// transmit.
    fn finish(&mut self, pad_tms: bool) -> &[u8] {
        let tx_bytes = HEADER_BYTES + (self.bits + 3) / 4;
        let remainder = (self.bits % 4) as u8;

        self.buf[0] = ((tx_bytes - 2) & 0xff) as u8;
        self.buf[1] = ((tx_bytes - 2) >> 8) as u8;
        self.buf[2] = CMD_TAP_OUTPUT | (remainder << 4);

        if remainder != 0 {
            let index = tx_bytes - 1;
            for slot in remainder..4 {
                self.buf[index] |= (pad_tms as u8) << (slot * 2 + 1);
            }
        }
        &self.buf[..tx_bytes]
    }
}

pub struct UsbJtag {
    device: DeviceHandle<GlobalContext>,
    buffer: StepBuffer,
    rx_buffer: [u8; RX_BUFFER_SIZE],
    curr_tms: bool,
    clk_hz: u32,
}

impl UsbJtag {
    /// Open the first matching adapter and claim its JTAG interface.
    pub fn open(clk_hz: u32) -> Result<Self> {
        let mut device =
            rusb::open_device_with_vid_pid(VID, PID).ok_or(Error::CableNotFound)?;
        device.claim_interface(INTERFACE)?;

        let mut cable = Self {
            device,
            buffer: StepBuffer::new(),
            rx_buffer: [0; RX_BUFFER_SIZE],
            curr_tms: false,
            clk_hz: 0,
        };
        cable.set_clk_freq(clk_hz);
        Ok(cable)
    }

    fn append_step(&mut self, tms: bool, tdi: bool) -> Result<()> {
        self.curr_tms = tms;
        if self.buffer.is_full() {
            self.write_buffer(None)?;
        }
        self.buffer.append(tms, tdi);
        Ok(())
    }

    /// Transmit the pending frame and read back its TDO bits, copying them
    /// to `tdo` when requested.  Returns the number of steps transferred.
    fn write_buffer(&mut self, tdo: Option<&mut [u8]>) -> Result<usize> {
        if self.buffer.bits == 0 {
            return Ok(0);
        }
        let bits = self.buffer.bits;
        let rx_bytes = (bits + 7) / 8;

        let frame = self.buffer.finish(self.curr_tms);
        let written = self.device.write_bulk(WRITE_EP, frame, USB_TIMEOUT)?;
        if written != frame.len() {
            return Err(Error::ShortTransfer {
                expected: frame.len(),
                actual: written,
            });
        }

        let read = self
            .device
            .read_bulk(READ_EP, &mut self.rx_buffer[..rx_bytes], USB_TIMEOUT)?;
        if read != rx_bytes {
            return Err(Error::ShortTransfer {
                expected: rx_bytes,
                actual: read,
            });
        }

        if let Some(tdo) = tdo {
            tdo[..rx_bytes].copy_from_slice(&self.rx_buffer[..rx_bytes]);
        }

        self.buffer.bits = 0;
        Ok(bits)
    }
}

impl Cable for UsbJtag {
    fn set_clk_freq(&mut self, hz: u32) -> u32 {
        // The dongle runs at a fixed rate.
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

        // Byte-aligned chunks keep the capture destination aligned too.
        let max_chunk = CAPACITY_STEPS & !7;
        let mut pos = 0;
        while pos < bits {
            let chunk = (bits - pos).min(max_chunk);
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
