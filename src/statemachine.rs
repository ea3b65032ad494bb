//! This provides a higher-level interface than the `Cable` trait.
//! `TapController` keeps track of the state of the JTAG TAP state machine
//! and allows setting the state to any desired state by the most efficient
//! TMS path.  On top of that it offers the register shifts and idle dwell
//! the device command protocol is built from.
use crate::cable::Cable;
use crate::error::Result;

/// Clocks spent in Run-Test/Idle after every device command.  The dwell is
/// a protocol requirement of the device family, not a tunable.
const IDLE_SETTLE_CLOCKS: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TapState {
    Reset = 0,
    Idle = 1,
    SelectDR = 2,
    CaptureDR = 3,
    ShiftDR = 4,
    Exit1DR = 5,
    PauseDR = 6,
    Exit2DR = 7,
    UpdateDR = 8,
    SelectIR = 9,
    CaptureIR = 10,
    ShiftIR = 11,
    Exit1IR = 12,
    PauseIR = 13,
    Exit2IR = 14,
    UpdateIR = 15,
}

use TapState::*;

/// Successor states for TMS low / TMS high, indexed by state.
const EDGES: [[TapState; 2]; 16] = [
    [Idle, Reset],        // Reset
    [Idle, SelectDR],     // Idle
    [CaptureDR, SelectIR], // SelectDR
    [ShiftDR, Exit1DR],   // CaptureDR
    [ShiftDR, Exit1DR],   // ShiftDR
    [PauseDR, UpdateDR],  // Exit1DR
    [PauseDR, Exit2DR],   // PauseDR
    [ShiftDR, UpdateDR],  // Exit2DR
    [Idle, SelectDR],     // UpdateDR
    [CaptureIR, Reset],   // SelectIR
    [ShiftIR, Exit1IR],   // CaptureIR
    [ShiftIR, Exit1IR],   // ShiftIR
    [PauseIR, UpdateIR],  // Exit1IR
    [PauseIR, Exit2IR],   // PauseIR
    [ShiftIR, UpdateIR],  // Exit2IR
    [Idle, SelectIR],     // UpdateIR
];

/// Shortest TMS sequence from `from` to `to`, found breadth-first over the
/// transition graph.
fn tms_path(from: TapState, to: TapState) -> Vec<bool> {
    let mut paths: Vec<(TapState, Vec<bool>)> = vec![(from, Vec::new())];

    loop {
        let mut next = Vec::new();
        for (state, path) in paths {
            for bit in [false, true] {
                let succ = EDGES[state as usize][bit as usize];
                let mut p = path.clone();
                p.push(bit);
                if succ == to {
                    return p;
                }
                next.push((succ, p));
            }
        }
        paths = next;
    }
}

/// Issues composite TAP operations against a `Cable`, tracking the current
/// state so every operation has a known entry and resting state.
pub struct TapController<T> {
    pub cable: T,
    state: TapState,
}

impl<T: Cable> TapController<T> {
    /// Create a controller using an existing `Cable`, driving the TAP into
    /// Test-Logic-Reset.
    pub fn new(mut cable: T) -> Result<Self> {
        cable.write_tms(&[true; 5], false)?;
        Ok(Self {
            cable,
            state: TapState::Reset,
        })
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    /// Reset the TAP by driving TMS high for 5 clocks.
    pub fn reset(&mut self) -> Result<()> {
        self.cable.write_tms(&[true; 5], false)?;
        self.state = TapState::Reset;
        Ok(())
    }

    /// Use TMS to get into `to` by the most efficient path.
    pub fn set_state(&mut self, to: TapState) -> Result<()> {
        if self.state == to && to != TapState::Reset {
            return Ok(());
        }
        if to == TapState::Reset {
            return self.reset();
        }

        let path = tms_path(self.state, to);
        self.cable.write_tms(&path, false)?;
        self.state = to;
        Ok(())
    }

    /// Shift an 8-bit opcode LSB-first through the instruction register,
    /// resting in Pause-IR.
    pub fn shift_ir(&mut self, opcode: u8) -> Result<()> {
        self.set_state(TapState::ShiftIR)?;
        self.cable.write_tdi(&[opcode], None, 8, true)?;
        self.state = TapState::Exit1IR;
        self.set_state(TapState::PauseIR)
    }

    /// Shift `bits` bits through the data register, capturing TDO into `rx`
    /// when given, resting in Pause-DR.
    pub fn shift_dr(&mut self, tx: &[u8], rx: Option<&mut [u8]>, bits: usize) -> Result<()> {
        self.set_state(TapState::ShiftDR)?;
        self.cable.write_tdi(tx, rx, bits, true)?;
        self.state = TapState::Exit1DR;
        self.set_state(TapState::PauseDR)
    }

    /// Go to Run-Test/Idle and toggle `count` clocks there.
    pub fn idle_clocks(&mut self, count: usize) -> Result<()> {
        self.set_state(TapState::Idle)?;
        self.cable.toggle_clk(false, true, count)
    }

    /// Let the device finish internal state transitions after a command.
    pub fn settle_to_idle(&mut self) -> Result<()> {
        self.idle_clocks(IDLE_SETTLE_CLOCKS)
    }

    /// Shift `opcode`, then a data phase sized to the larger of `tx` and
    /// `rx_len` bytes (tx zero-padded), skipping the data phase entirely
    /// when both are empty.  Returns the `rx_len` captured bytes; index 0
    /// holds the register's least-significant byte.
    pub fn command(&mut self, opcode: u8, tx: Option<&[u8]>, rx_len: usize) -> Result<Vec<u8>> {
        let tx_len = tx.map_or(0, <[u8]>::len);
        let xfer_len = tx_len.max(rx_len);

        self.shift_ir(opcode)?;
        if xfer_len == 0 {
            return Ok(Vec::new());
        }

        let mut xfer_tx = vec![0u8; xfer_len];
        if let Some(tx) = tx {
            xfer_tx[..tx.len()].copy_from_slice(tx);
        }

        let mut xfer_rx = vec![0u8; xfer_len];
        let rx = if rx_len > 0 {
            Some(&mut xfer_rx[..])
        } else {
            None
        };
        self.shift_dr(&xfer_tx, rx, xfer_len * 8)?;

        xfer_rx.truncate(rx_len);
        Ok(xfer_rx)
    }

    /// Force out any steps still buffered in the cable.
    pub fn flush(&mut self) -> Result<usize> {
        self.cable.flush()
    }
}
