//! Implementations for different JTAG hardware adapters live here.  Hardware
//! adapters should implement the `Cable` trait.
//!
//! A cable accumulates TAP steps (TMS/TDI pairs) in a fixed-size internal
//! buffer and transmits them in one round-trip on `flush`.  Appending to a
//! full buffer flushes implicitly, so callers never overflow it, but they
//! can consult `buffer_capacity`/`is_full` to place flushes deliberately.
use crate::error::Result;

pub mod usbjtag;
pub mod xvc;

pub trait Cable {
    /// Request a TCK frequency in Hz.  Best effort: adapters that cannot
    /// change their rate return the request unchanged.  Never fails.
    fn set_clk_freq(&mut self, hz: u32) -> u32;

    /// Clock out one TAP step per element of `tms`, with TDI held high.
    /// Steps are buffered unless `flush` is set.
    fn write_tms(&mut self, tms: &[bool], flush: bool) -> Result<()>;

    /// Clock `bits` steps with TDI taken from `tx` (LSB-first within each
    /// byte) and TMS holding its previous level.  When `last` is set the
    /// final bit is clocked with TMS high, leaving the Shift state.  If
    /// `rx` is given, captured TDO bits are stored there byte-aligned,
    /// LSB-first.  Requests larger than the buffer are chunked, each chunk
    /// flushed before the next; the TMS override applies only to the final
    /// bit of the whole request.
    fn write_tdi(&mut self, tx: &[u8], rx: Option<&mut [u8]>, bits: usize, last: bool)
        -> Result<()>;

    /// Clock `count` identical steps with the given TMS/TDI levels, then
    /// flush.  Used to pump the TAP without shifting meaningful data.
    fn toggle_clk(&mut self, tms: bool, tdi: bool, count: usize) -> Result<()>;

    /// Transmit any buffered steps and read back their TDO.  Returns the
    /// number of bits flushed, 0 if the buffer was empty.
    fn flush(&mut self) -> Result<usize>;

    /// Internal buffer capacity in TAP steps.
    fn buffer_capacity(&self) -> usize;

    /// True when the next append would overflow (and therefore flush).
    fn is_full(&self) -> bool;
}

impl<C: Cable + ?Sized> Cable for Box<C> {
    fn set_clk_freq(&mut self, hz: u32) -> u32 {
        C::set_clk_freq(self, hz)
    }

    fn write_tms(&mut self, tms: &[bool], flush: bool) -> Result<()> {
        C::write_tms(self, tms, flush)
    }

    fn write_tdi(
        &mut self,
        tx: &[u8],
        rx: Option<&mut [u8]>,
        bits: usize,
        last: bool,
    ) -> Result<()> {
        C::write_tdi(self, tx, rx, bits, last)
    }

    fn toggle_clk(&mut self, tms: bool, tdi: bool, count: usize) -> Result<()> {
        C::toggle_clk(self, tms, tdi, count)
    }

    fn flush(&mut self) -> Result<usize> {
        C::flush(self)
    }

    fn buffer_capacity(&self) -> usize {
        C::buffer_capacity(self)
    }

    fn is_full(&self) -> bool {
        C::is_full(self)
    }
}
