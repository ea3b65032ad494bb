//! This crate drives the in-system-configuration (ISC) protocol of
//! MachXO2-class FPGAs over JTAG.  At the lowest level, the `Cable` trait
//! abstracts a JTAG adapter: a USB bit-bang dongle driven over bulk
//! endpoints, or a remote Xilinx Virtual Cable (XVC) server reached over
//! TCP.  Both buffer TAP steps internally and flush them in as few I/O
//! round-trips as possible.
//!
//! The next level is the `TapController`, which owns a cable and keeps
//! track of the TAP state machine.  You ask for a state (e.g. Idle or
//! ShiftDR) and it gets there with the fewest TMS clocks.  It also offers
//! the instruction/data register shifts and the fixed idle dwell the
//! device protocol requires between commands.
//!
//! On top of that, `Isc` implements the device programming sequence:
//! erase, program, verify, feature row, feabits, done and refresh, each
//! synchronized with the device through busy-flag polling.  Programming
//! data comes from an `Image`, the contract implemented by an external
//! bitstream parser.
//!
//! # Example
//! ```no_run
//! use machxo_isc::cable::xvc::Xvc;
//! use machxo_isc::statemachine::TapController;
//! use machxo_isc::image::{RawImage, Section};
//! use machxo_isc::isc::Isc;
//!
//! let cable = Xvc::new("192.168.1.112", machxo_isc::cable::xvc::DEFAULT_PORT)?;
//! let jtag = TapController::new(cable)?;
//! let mut isc = Isc::new(jtag);
//!
//! let image = RawImage {
//!     sections: vec![Section { offset: 0, rows: vec![vec![0u8; 16]; 4] }],
//!     feature_row: 0,
//!     feabits: 0x0420,
//! };
//! isc.program(&image)?;
//! # Ok::<(), machxo_isc::Error>(())
//! ```

pub mod cable;
pub mod error;
pub mod image;
pub mod isc;
pub mod statemachine;

pub use error::{Error, Result};
