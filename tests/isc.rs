//! Drive the full programming sequence against a simulated MachXO2 TAP.
//!
//! The simulator is a bit-accurate model of the device side: it walks the
//! TAP state machine one clock at a time, latches opcodes at Update-IR,
//! captures register contents at Capture-DR and commits shifted-in data at
//! Update-DR.  Asynchronous operations report busy for a fixed number of
//! polls before clearing.
use machxo_isc::cable::Cable;
use machxo_isc::error::{Error, Result};
use machxo_isc::image::{RawImage, Section};
use machxo_isc::isc::Isc;
use machxo_isc::statemachine::TapController;

#[derive(Clone, Copy, PartialEq, Eq)]
enum S {
    Reset,
    Idle,
    SelectDr,
    CaptureDr,
    ShiftDr,
    Exit1Dr,
    PauseDr,
    Exit2Dr,
    UpdateDr,
    SelectIr,
    CaptureIr,
    ShiftIr,
    Exit1Ir,
    PauseIr,
    Exit2Ir,
    UpdateIr,
}

fn next(state: S, tms: bool) -> S {
    use S::*;
    match (state, tms) {
        (Reset, false) => Idle,
        (Reset, true) => Reset,
        (Idle, false) => Idle,
        (Idle, true) => SelectDr,
        (SelectDr, false) => CaptureDr,
        (SelectDr, true) => SelectIr,
        (CaptureDr, false) => ShiftDr,
        (CaptureDr, true) => Exit1Dr,
        (ShiftDr, false) => ShiftDr,
        (ShiftDr, true) => Exit1Dr,
        (Exit1Dr, false) => PauseDr,
        (Exit1Dr, true) => UpdateDr,
        (PauseDr, false) => PauseDr,
        (PauseDr, true) => Exit2Dr,
        (Exit2Dr, false) => ShiftDr,
        (Exit2Dr, true) => UpdateDr,
        (UpdateDr, false) => Idle,
        (UpdateDr, true) => SelectDr,
        (SelectIr, false) => CaptureIr,
        (SelectIr, true) => Reset,
        (CaptureIr, false) => ShiftIr,
        (CaptureIr, true) => Exit1Ir,
        (ShiftIr, false) => ShiftIr,
        (ShiftIr, true) => Exit1Ir,
        (Exit1Ir, false) => PauseIr,
        (Exit1Ir, true) => UpdateIr,
        (PauseIr, false) => PauseIr,
        (PauseIr, true) => Exit2Ir,
        (Exit2Ir, false) => ShiftIr,
        (Exit2Ir, true) => UpdateIr,
        (UpdateIr, false) => Idle,
        (UpdateIr, true) => SelectIr,
    }
}

const ROW_LEN: usize = 16;

/// Opcodes that start an internal operation the busy flag tracks.
const BUSY_OPS: [u8; 9] = [0xC6, 0x26, 0x0E, 0x70, 0xE4, 0xF8, 0x5E, 0x79, 0x74];

struct SimDevice {
    state: S,
    ir: u8,
    ir_shift: Vec<bool>,
    dr_shift: Vec<bool>,
    resp: Vec<u8>,
    resp_pos: usize,

    idcode: u32,
    status: u32,
    flash: Vec<Vec<u8>>,
    read_ptr: usize,
    feature_row: u64,
    feabits: u16,

    /// Polls an operation stays busy for before clearing.
    busy_after_op: u32,
    busy_left: u32,
    always_busy: bool,

    /// Opcode latched at each Update-IR, in order.
    ops: Vec<u8>,
    /// Data committed at each Update-DR, keyed by the latched opcode.
    writes: Vec<(u8, Vec<u8>)>,
}

impl SimDevice {
    fn new(idcode: u32) -> Self {
        Self {
            state: S::Reset,
            ir: 0xFF,
            ir_shift: Vec::new(),
            dr_shift: Vec::new(),
            resp: Vec::new(),
            resp_pos: 0,
            idcode,
            status: 0,
            flash: Vec::new(),
            read_ptr: 0,
            feature_row: 0,
            feabits: 0,
            busy_after_op: 2,
            busy_left: 0,
            always_busy: false,
            ops: Vec::new(),
            writes: Vec::new(),
        }
    }

    fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
        let mut bytes = vec![0u8; (bits.len() + 7) / 8];
        for (i, &bit) in bits.iter().enumerate() {
            bytes[i / 8] |= (bit as u8) << (i % 8);
        }
        bytes
    }

    fn next_resp_bit(&mut self) -> bool {
        let pos = self.resp_pos;
        self.resp_pos += 1;
        if pos / 8 < self.resp.len() {
            self.resp[pos / 8] & (1 << (pos % 8)) != 0
        } else {
            false
        }
    }

    fn capture_dr(&mut self) {
        self.dr_shift.clear();
        self.resp_pos = 0;
        self.resp = match self.ir {
            0xE0 => self.idcode.to_le_bytes().to_vec(),
            0x3C => self.status.to_le_bytes().to_vec(),
            0xE7 => self.feature_row.to_le_bytes().to_vec(),
            0xFB => self.feabits.to_le_bytes().to_vec(),
            0xF0 => {
                let busy = if self.always_busy {
                    true
                } else if self.busy_left > 0 {
                    self.busy_left -= 1;
                    true
                } else {
                    false
                };
                vec![if busy { 0x80 } else { 0x00 }]
            }
            0x73 => {
                let row = self
                    .flash
                    .get(self.read_ptr)
                    .cloned()
                    .unwrap_or_else(|| vec![0; ROW_LEN]);
                self.read_ptr += 1;
                row
            }
            _ => Vec::new(),
        };
    }

    fn update_ir(&mut self) {
        self.ir = Self::bits_to_bytes(&self.ir_shift)
            .first()
            .copied()
            .unwrap_or(self.ir);
        self.ir_shift.clear();
        self.ops.push(self.ir);

        if self.ir == 0x46 {
            self.read_ptr = 0;
        }
        if BUSY_OPS.contains(&self.ir) {
            self.busy_left = self.busy_after_op;
        }
    }

    fn update_dr(&mut self) {
        let data = Self::bits_to_bytes(&self.dr_shift);
        self.dr_shift.clear();

        match self.ir {
            0x70 => self.flash.push(data.clone()),
            0xE4 if data.len() >= 8 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&data[..8]);
                self.feature_row = u64::from_le_bytes(bytes);
            }
            0xF8 if data.len() >= 2 => {
                self.feabits = u16::from_le_bytes([data[0], data[1]]);
            }
            _ => {}
        }
        self.writes.push((self.ir, data));
    }

    fn clock(&mut self, tms: bool, tdi: bool) -> bool {
        let tdo = match self.state {
            S::ShiftDr => self.next_resp_bit(),
            _ => false,
        };
        match self.state {
            S::ShiftDr => self.dr_shift.push(tdi),
            S::ShiftIr => self.ir_shift.push(tdi),
            _ => {}
        }

        self.state = next(self.state, tms);
        match self.state {
            S::CaptureDr => self.capture_dr(),
            S::CaptureIr => self.ir_shift.clear(),
            S::UpdateIr => self.update_ir(),
            S::UpdateDr => self.update_dr(),
            _ => {}
        }
        tdo
    }
}

impl Cable for SimDevice {
    fn set_clk_freq(&mut self, hz: u32) -> u32 {
        hz
    }

    fn write_tms(&mut self, tms: &[bool], _flush: bool) -> Result<()> {
        for &bit in tms {
            self.clock(bit, true);
        }
        Ok(())
    }

    fn write_tdi(&mut self, tx: &[u8], rx: Option<&mut [u8]>, bits: usize, last: bool) -> Result<()> {
        let mut out = vec![0u8; (bits + 7) / 8];
        for i in 0..bits {
            let tms = last && i == bits - 1;
            let tdi = tx[i >> 3] & (1 << (i & 7)) != 0;
            if self.clock(tms, tdi) {
                out[i >> 3] |= 1 << (i & 7);
            }
        }
        if let Some(rx) = rx {
            rx[..out.len()].copy_from_slice(&out);
        }
        Ok(())
    }

    fn toggle_clk(&mut self, tms: bool, tdi: bool, count: usize) -> Result<()> {
        for _ in 0..count {
            self.clock(tms, tdi);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<usize> {
        Ok(0)
    }

    fn buffer_capacity(&self) -> usize {
        usize::MAX
    }

    fn is_full(&self) -> bool {
        false
    }
}

fn test_rows() -> Vec<Vec<u8>> {
    (0..4u8)
        .map(|row| (0..ROW_LEN as u8).map(|b| row * 16 + b).collect())
        .collect()
}

fn programmer(sim: SimDevice) -> Isc<SimDevice> {
    let jtag = TapController::new(sim).unwrap();
    let mut isc = Isc::new(jtag);
    isc.set_busy_timeout(10);
    isc
}

#[test]
fn idcode_reads_back_little_endian() {
    let mut isc = programmer(SimDevice::new(0x012B_A043));
    assert_eq!(isc.idcode().unwrap(), 0x012B_A043);
}

#[test]
fn program_writes_flash_feature_row_and_feabits() {
    let rows = test_rows();
    let image = RawImage {
        sections: vec![Section {
            offset: 0,
            rows: rows.clone(),
        }],
        feature_row: 0xDEAD_BEEF_0123_4567,
        feabits: 0x0420,
    };

    let mut isc = programmer(SimDevice::new(0x012B_A043));
    isc.program(&image).unwrap();

    let sim = isc.into_inner().cable;
    assert_eq!(sim.flash, rows);
    assert_eq!(sim.feature_row, 0xDEAD_BEEF_0123_4567);
    assert_eq!(sim.feabits, 0x0420);
}

#[test]
fn program_issues_mutations_in_protocol_order() {
    let rows = test_rows();
    let image = RawImage {
        sections: vec![Section {
            offset: 0,
            rows,
        }],
        feature_row: 1,
        feabits: 2,
    };

    let mut isc = programmer(SimDevice::new(0x012B_A043));
    isc.program(&image).unwrap();
    let sim = isc.into_inner().cable;

    let mutating = [0xC6, 0x0E, 0x46, 0x70, 0xE4, 0xF8, 0x5E, 0x26, 0x79];
    let issued: Vec<u8> = sim
        .ops
        .iter()
        .copied()
        .filter(|op| mutating.contains(op))
        .collect();
    assert_eq!(
        issued,
        [
            0xC6, // enable, sram mode
            0x0E, // erase ufm
            0xC6, // enable, flash mode
            0x0E, // erase cfg + feature + sram
            0x46, // rewind before programming
            0x70, 0x70, 0x70, 0x70,
            0x46, // rewind before verify readback
            0x46, // rewind before the feature section
            0xE4, 0xF8, // feature row, then feabits
            0x5E, 0x26, 0x79, // done, disable, refresh
        ]
    );

    // The two enables carry distinct mode bytes, the two erases distinct
    // region masks.
    let data_for = |op: u8| -> Vec<Vec<u8>> {
        sim.writes
            .iter()
            .filter(|(ir, _)| *ir == op)
            .map(|(_, data)| data.clone())
            .collect()
    };
    assert_eq!(data_for(0xC6), [[0x00], [0x08]]);
    assert_eq!(data_for(0x0E), [[0x01], [0x0E]]);
}

#[test]
fn program_reports_each_written_row() {
    let rows = test_rows();
    let image = RawImage {
        sections: vec![Section {
            offset: 0,
            rows,
        }],
        feature_row: 1,
        feabits: 2,
    };

    let mut isc = programmer(SimDevice::new(0x012B_A043));
    let mut reported = Vec::new();
    isc.program_with_progress(&image, |n| reported.push(n)).unwrap();
    assert_eq!(reported, [1, 2, 3, 4]);
}

#[test]
fn empty_image_is_rejected_before_any_command() {
    let mut isc = programmer(SimDevice::new(0x012B_A043));

    match isc.program(&RawImage::default()) {
        Err(Error::EmptyImage) => {}
        other => panic!("expected empty image error, got {:?}", other),
    }
    // nothing was put on the wire
    assert!(isc.into_inner().cable.ops.is_empty());
}

#[test]
fn stuck_busy_flag_times_out() {
    let mut sim = SimDevice::new(0x012B_A043);
    sim.always_busy = true;

    let jtag = TapController::new(sim).unwrap();
    let mut isc = Isc::new(jtag);
    isc.set_busy_timeout(5);

    match isc.erase_all() {
        Err(Error::BusyTimeout(polls)) => assert_eq!(polls, 5),
        other => panic!("expected busy timeout, got {:?}", other),
    }
}

#[test]
fn erase_all_requests_every_region() {
    let mut isc = programmer(SimDevice::new(0x012B_A043));
    isc.erase_all().unwrap();

    let sim = isc.into_inner().cable;
    let masks: Vec<&Vec<u8>> = sim
        .writes
        .iter()
        .filter(|(ir, _)| *ir == 0x0E)
        .map(|(_, data)| data)
        .collect();
    assert_eq!(masks, [&vec![0x0F]]);
}

#[test]
fn verify_reports_first_mismatch_position() {
    let rows = test_rows();
    let mut sim = SimDevice::new(0x012B_A043);
    sim.flash = rows.clone();

    let mut isc = programmer(sim);

    // matching image passes and reports every row
    let mut done = 0;
    isc.verify(&rows, true, |n| done = n).unwrap();
    assert_eq!(done, 4);

    // one corrupt byte fails with its exact position
    let mut expected = rows.clone();
    expected[2][5] ^= 0x10;
    match isc.verify(&expected, true, |_| ()) {
        Err(Error::VerifyMismatch {
            row,
            offset,
            expected: want,
            found,
        }) => {
            assert_eq!((row, offset), (2, 5));
            assert_eq!(want, rows[2][5] ^ 0x10);
            assert_eq!(found, rows[2][5]);
        }
        other => panic!("expected verify mismatch, got {:?}", other),
    }
}
