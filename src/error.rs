//! Crate-wide error type.  Transport I/O failures, busy-poll timeouts and
//! verify mismatches are distinct variants so callers can tell a dead cable
//! from a device that never finished an operation or returned bad data.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// USB transfer or device access failed.
    #[error("usb error: {0}")]
    Usb(#[from] rusb::Error),

    /// Socket I/O with the remote cable failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A bulk transfer moved fewer bytes than requested.  The step stream
    /// is now out of sync with the adapter, so the session is dead.
    #[error("short transfer: expected {expected} bytes, transferred {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    /// No matching adapter was found at construction time.
    #[error("jtag cable not found")]
    CableNotFound,

    /// The image to program carries no data sections.
    #[error("programming image contains no data sections")]
    EmptyImage,

    /// The device busy flag never cleared within the polling bound.
    #[error("device busy flag still set after {0} polls")]
    BusyTimeout(u32),

    /// Flash readback did not match the expected image.
    #[error("verify mismatch at row {row} byte {offset}: read {found:#04x}, expected {expected:#04x}")]
    VerifyMismatch {
        row: usize,
        offset: usize,
        expected: u8,
        found: u8,
    },
}

pub type Result<T> = core::result::Result<T, Error>;
