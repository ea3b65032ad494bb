//! The in-system-configuration programming protocol of MachXO2-class
//! parts: a fixed command sequence over the TAP, with every asynchronous
//! internal operation (erase, program, done, refresh) synchronized through
//! busy-flag polling.
//!
//! A failed step leaves the device in an undefined intermediate state;
//! there is no rollback, the caller has to restart the whole sequence.
use core::fmt;

use bitflags::bitflags;
use log::{debug, info, warn};

use crate::cable::Cable;
use crate::error::{Error, Result};
use crate::image::Image;
use crate::statemachine::TapController;

const ISC_ENABLE: u8 = 0xC6;
const ISC_DISABLE: u8 = 0x26;
const READ_DEVICE_ID_CODE: u8 = 0xE0;
const PRELOAD: u8 = 0x1C;
const FLASH_ERASE: u8 = 0x0E;
const CHECK_BUSY_FLAG: u8 = 0xF0;
const CHECK_BUSY_FLAG_BUSY: u8 = 1 << 7;
const RESET_CFG_ADDR: u8 = 0x46;
const PROG_CFG_FLASH: u8 = 0x70;
const PROG_FEATURE_ROW: u8 = 0xE4;
const READ_FEATURE_ROW: u8 = 0xE7;
const PROG_FEABITS: u8 = 0xF8;
const READ_FEABITS: u8 = 0xFB;
const PROG_DONE: u8 = 0x5E;
const REFRESH: u8 = 0x79;
const READ_STATUS_REGISTER: u8 = 0x3C;
const VERIFY_FLASH: u8 = 0x73;
const ENABLE_CFG_IF: u8 = 0x74;

const PRELOAD_BYTES: usize = 34;

/// Liveness bound on busy polling, in iterations rather than wall-clock
/// time.  Large enough never to trip on a working part.
const DEFAULT_BUSY_POLLS: u32 = 100_000_000;

/// Mode flag for the ISC-enable command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IscMode {
    Sram = 0x00,
    Flash = 0x08,
}

bitflags! {
    /// Independently erasable flash regions.
    pub struct EraseMask: u8 {
        const UFM = 1 << 0;
        const FEATURE = 1 << 1;
        const CFG = 1 << 2;
        const SRAM = 1 << 3;
    }
}

/// Cause field of the status register, bits 23..25.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    None,
    Id,
    Command,
    Crc,
    Preamble,
    Abort,
    Overflow,
    SdmEof,
}

impl ErrorCode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => ErrorCode::None,
            1 => ErrorCode::Id,
            2 => ErrorCode::Command,
            3 => ErrorCode::Crc,
            4 => ErrorCode::Preamble,
            5 => ErrorCode::Abort,
            6 => ErrorCode::Overflow,
            _ => ErrorCode::SdmEof,
        }
    }
}

/// Snapshot of the 32-bit device status register.  Every read produces a
/// fresh value; decoding is pure.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StatusRegister(pub u32);

impl StatusRegister {
    fn bit(&self, n: u32) -> bool {
        self.0 & (1 << n) != 0
    }

    pub fn transparent_mode(&self) -> bool {
        self.bit(0)
    }

    /// Configuration target selector, bits 1..3.
    pub fn config_target(&self) -> u8 {
        ((self.0 >> 1) & 0x07) as u8
    }

    pub fn jtag_active(&self) -> bool {
        self.bit(4)
    }

    pub fn password_protected(&self) -> bool {
        self.bit(5)
    }

    pub fn decrypt_enabled(&self) -> bool {
        self.bit(7)
    }

    pub fn done(&self) -> bool {
        self.bit(8)
    }

    pub fn isc_enabled(&self) -> bool {
        self.bit(9)
    }

    pub fn write_enabled(&self) -> bool {
        self.bit(10)
    }

    pub fn read_enabled(&self) -> bool {
        self.bit(11)
    }

    pub fn busy(&self) -> bool {
        self.bit(12)
    }

    pub fn fail(&self) -> bool {
        self.bit(13)
    }

    pub fn decrypt_only(&self) -> bool {
        self.bit(15)
    }

    pub fn password_enabled(&self) -> bool {
        self.bit(16)
    }

    pub fn sdm_enabled(&self) -> bool {
        self.bit(19)
    }

    pub fn encrypt_preamble(&self) -> bool {
        self.bit(20)
    }

    pub fn std_preamble(&self) -> bool {
        self.bit(21)
    }

    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_bits(((self.0 >> 23) & 0x07) as u8)
    }

    pub fn exec_error(&self) -> bool {
        self.bit(26)
    }

    pub fn verify_failed(&self) -> bool {
        self.bit(27)
    }

    pub fn invalid_command(&self) -> bool {
        self.bit(28)
    }

    pub fn sed_error(&self) -> bool {
        self.bit(29)
    }

    pub fn bypass_mode(&self) -> bool {
        self.bit(30)
    }

    pub fn ft_mode(&self) -> bool {
        self.bit(31)
    }
}

impl fmt::Debug for StatusRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusRegister")
            .field("raw", &format_args!("{:#010x}", self.0))
            .field("done", &self.done())
            .field("isc_enabled", &self.isc_enabled())
            .field("write_enabled", &self.write_enabled())
            .field("read_enabled", &self.read_enabled())
            .field("busy", &self.busy())
            .field("fail", &self.fail())
            .field("config_target", &self.config_target())
            .field("error_code", &self.error_code())
            .finish()
    }
}

/// Boot source selection decoded from the feabits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootMode {
    /// Single boot from NVCM/flash.
    SingleNvcm,
    /// Boot from NVCM/flash, fall back to external flash on failure.
    DualNvcmExternal,
    /// Single boot from external flash.
    SingleExternal,
    Invalid,
}

/// Snapshot of the 16-bit feature-bits register.  Pure decode, used for
/// diagnostics after reading the register back.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Feabits(pub u16);

impl Feabits {
    fn bit(&self, n: u32) -> bool {
        self.0 & (1 << n) != 0
    }

    pub fn boot_mode(&self) -> BootMode {
        let sequence = (self.0 >> 12) & 0x03;
        let master_spi = self.bit(11);
        match (sequence, master_spi) {
            (0, false) => BootMode::SingleNvcm,
            (0, true) => BootMode::DualNvcmExternal,
            (1, true) => BootMode::SingleExternal,
            _ => BootMode::Invalid,
        }
    }

    pub fn master_spi_enabled(&self) -> bool {
        self.bit(11)
    }

    pub fn i2c_enabled(&self) -> bool {
        !self.bit(10)
    }

    pub fn slave_spi_enabled(&self) -> bool {
        !self.bit(9)
    }

    pub fn jtag_enabled(&self) -> bool {
        !self.bit(8)
    }

    pub fn done_enabled(&self) -> bool {
        self.bit(7)
    }

    pub fn initn_enabled(&self) -> bool {
        self.bit(6)
    }

    pub fn programn_disabled(&self) -> bool {
        self.bit(5)
    }

    pub fn my_assp_enabled(&self) -> bool {
        self.bit(4)
    }

    pub fn password_protect_all(&self) -> bool {
        self.bit(3)
    }

    pub fn password_protect_key(&self) -> bool {
        self.bit(2)
    }
}

impl fmt::Debug for Feabits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feabits")
            .field("raw", &format_args!("{:#06x}", self.0))
            .field("boot_mode", &self.boot_mode())
            .field("master_spi", &self.master_spi_enabled())
            .field("i2c", &self.i2c_enabled())
            .field("slave_spi", &self.slave_spi_enabled())
            .field("jtag", &self.jtag_enabled())
            .finish()
    }
}

/// One programming session over a TAP controller.  No state survives
/// between calls to `program`; a failed run requires retrying the full
/// sequence.
pub struct Isc<T> {
    jtag: TapController<T>,
    max_busy_polls: u32,
}

impl<T: Cable> Isc<T> {
    pub fn new(jtag: TapController<T>) -> Self {
        Self {
            jtag,
            max_busy_polls: DEFAULT_BUSY_POLLS,
        }
    }

    /// Lower the busy-poll iteration bound, mainly useful against
    /// simulated devices.
    pub fn set_busy_timeout(&mut self, polls: u32) {
        self.max_busy_polls = polls;
    }

    pub fn jtag(&mut self) -> &mut TapController<T> {
        &mut self.jtag
    }

    pub fn into_inner(self) -> TapController<T> {
        self.jtag
    }

    /// Read the 32-bit device ID code.
    pub fn idcode(&mut self) -> Result<u32> {
        let rx = self.jtag.command(READ_DEVICE_ID_CODE, None, 4)?;
        Ok(u32::from_le_bytes([rx[0], rx[1], rx[2], rx[3]]))
    }

    /// Open the configuration engine in the given mode.
    pub fn enable(&mut self, mode: IscMode) -> Result<()> {
        self.jtag.command(ISC_ENABLE, Some(&[mode as u8]), 0)?;
        self.jtag.settle_to_idle()?;
        self.poll_busy()
    }

    pub fn disable(&mut self) -> Result<()> {
        self.jtag.command(ISC_DISABLE, None, 0)?;
        self.jtag.settle_to_idle()?;
        self.poll_busy()
    }

    /// Open the transparent configuration interface.
    pub fn enable_config_interface(&mut self) -> Result<()> {
        self.jtag.command(ENABLE_CFG_IF, Some(&[0x08]), 0)?;
        self.jtag.settle_to_idle()?;
        self.poll_busy()
    }

    pub fn erase(&mut self, mask: EraseMask) -> Result<()> {
        info!("flash erase {:?}", mask);
        self.jtag.command(FLASH_ERASE, Some(&[mask.bits()]), 0)?;
        self.jtag.settle_to_idle()?;
        self.poll_busy()
    }

    pub fn erase_all(&mut self) -> Result<()> {
        self.erase(EraseMask::all())
    }

    /// Reposition the internal write pointer at the start of configuration
    /// flash.  Required before programming and before verify readback.
    pub fn init_address(&mut self) -> Result<()> {
        self.jtag.command(RESET_CFG_ADDR, None, 0)?;
        self.jtag.settle_to_idle()
    }

    /// Program `rows` into configuration flash in order, polling the busy
    /// flag after each row.  `progress` is called with the number of rows
    /// completed so far; on a busy timeout the rows already reported are
    /// the partial progress.
    pub fn program_flash(
        &mut self,
        rows: &[Vec<u8>],
        mut progress: impl FnMut(usize),
    ) -> Result<()> {
        for (line, row) in rows.iter().enumerate() {
            self.jtag.command(PROG_CFG_FLASH, Some(row), 0)?;
            self.jtag.settle_to_idle()?;
            self.poll_busy()?;
            progress(line + 1);
        }
        Ok(())
    }

    /// Read configuration flash back and compare it against `rows`.  With
    /// `unlock`, the ISC engine is opened first and closed afterwards.
    ///
    /// A register shift cannot be interrupted once issued, so a mismatch
    /// finishes the offending row's shift and the closing protocol steps
    /// before the error is returned.  Every bad byte of that row is
    /// logged; the error carries the first.
    pub fn verify(
        &mut self,
        rows: &[Vec<u8>],
        unlock: bool,
        mut progress: impl FnMut(usize),
    ) -> Result<()> {
        if unlock {
            self.enable(IscMode::Flash)?;
        }
        debug!("status before verify: {:?}", self.read_status()?);

        self.init_address()?;
        self.jtag.shift_ir(VERIFY_FLASH)?;

        let mut result = Ok(());
        for (line, row) in rows.iter().enumerate() {
            self.jtag.idle_clocks(2)?;

            let tx = vec![0u8; row.len()];
            let mut rx = vec![0u8; row.len()];
            self.jtag.shift_dr(&tx, Some(&mut rx), row.len() * 8)?;

            let mut first_bad = None;
            for (offset, (&found, &expected)) in rx.iter().zip(row.iter()).enumerate() {
                if found != expected {
                    warn!(
                        "verify mismatch row {} byte {}: read {:#04x}, expected {:#04x}",
                        line, offset, found, expected
                    );
                    if first_bad.is_none() {
                        first_bad = Some((offset, expected, found));
                    }
                }
            }
            if let Some((offset, expected, found)) = first_bad {
                result = Err(Error::VerifyMismatch {
                    row: line,
                    offset,
                    expected,
                    found,
                });
                break;
            }
            progress(line + 1);
        }

        if unlock {
            self.disable()?;
        }
        debug!("status after verify: {:?}", self.read_status()?);
        result
    }

    pub fn write_feature_row(&mut self, value: u64) -> Result<()> {
        self.jtag
            .command(PROG_FEATURE_ROW, Some(&value.to_le_bytes()), 0)?;
        self.jtag.settle_to_idle()?;
        self.poll_busy()
    }

    pub fn read_feature_row(&mut self) -> Result<u64> {
        let rx = self.jtag.command(READ_FEATURE_ROW, None, 8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&rx);
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn write_feabits(&mut self, value: u16) -> Result<()> {
        self.jtag
            .command(PROG_FEABITS, Some(&value.to_le_bytes()), 0)?;
        self.jtag.settle_to_idle()?;
        self.poll_busy()
    }

    pub fn read_feabits(&mut self) -> Result<Feabits> {
        let rx = self.jtag.command(READ_FEABITS, None, 2)?;
        self.jtag.settle_to_idle()?;
        Ok(Feabits(u16::from_le_bytes([rx[0], rx[1]])))
    }

    /// Mark configuration complete.
    pub fn program_done(&mut self) -> Result<()> {
        self.jtag.command(PROG_DONE, None, 0)?;
        self.jtag.settle_to_idle()?;
        self.poll_busy()
    }

    /// Reload configuration, booting the part from the programmed image.
    pub fn refresh(&mut self) -> Result<()> {
        self.jtag.command(REFRESH, None, 0)?;
        self.jtag.settle_to_idle()?;
        self.poll_busy()
    }

    pub fn read_status(&mut self) -> Result<StatusRegister> {
        let rx = self.jtag.command(READ_STATUS_REGISTER, None, 4)?;
        self.jtag.settle_to_idle()?;
        Ok(StatusRegister(u32::from_le_bytes([
            rx[0], rx[1], rx[2], rx[3],
        ])))
    }

    /// Poll the busy flag until it clears or the iteration bound is hit.
    fn poll_busy(&mut self) -> Result<()> {
        for _ in 0..self.max_busy_polls {
            let rx = self.jtag.command(CHECK_BUSY_FLAG, None, 1)?;
            self.jtag.settle_to_idle()?;
            if rx[0] & CHECK_BUSY_FLAG_BUSY == 0 {
                return Ok(());
            }
        }
        Err(Error::BusyTimeout(self.max_busy_polls))
    }

    /// Run the complete flash programming sequence for `image`.  Steps run
    /// in a fixed order; the first failure aborts the remainder and may
    /// leave the part half-programmed.
    pub fn program(&mut self, image: &impl Image) -> Result<()> {
        self.program_with_progress(image, |_| ())
    }

    /// Like `program`, reporting the number of rows written so far through
    /// `progress` after each row.  On a failure mid-write, the rows already
    /// reported are the partial progress.
    pub fn program_with_progress(
        &mut self,
        image: &impl Image,
        progress: impl FnMut(usize),
    ) -> Result<()> {
        if image.section_count() == 0 {
            return Err(Error::EmptyImage);
        }
        info!("idcode: {:#010x}", self.idcode()?);

        self.jtag
            .command(PRELOAD, Some(&[0xff; PRELOAD_BYTES]), 0)?;

        self.enable(IscMode::Sram)?;
        debug!("{:?}", self.read_status()?);
        self.erase(EraseMask::UFM)?;
        debug!("{:?}", self.read_status()?);

        self.enable(IscMode::Flash)?;
        debug!("{:?}", self.read_status()?);
        self.erase(EraseMask::CFG | EraseMask::FEATURE | EraseMask::SRAM)?;
        debug!("{:?}", self.read_status()?);

        self.init_address()?;
        let rows = image.data_for_section(0);
        info!("writing {} rows", rows.len());
        self.program_flash(rows, progress)?;
        info!("verifying {} rows", rows.len());
        self.verify(rows, false, |_| ())?;

        self.init_address()?;
        debug!("{:?}", self.read_status()?);
        self.write_feature_row(image.feature_row())?;
        debug!("feature row: {:#018x}", self.read_feature_row()?);
        self.write_feabits(image.feabits())?;
        debug!("feabits: {:?}", self.read_feabits()?);

        self.program_done()?;
        self.disable()?;
        self.refresh()?;
        debug!("{:?}", self.read_status()?);

        self.jtag.reset()?;
        self.jtag.flush()?;
        Ok(())
    }
}
