//! jtagscan
//!
//! JTAG pinout discovery and scan-chain interrogation over raw GPIO.
//!
//! Given a handful of GPIO lines wired to an unknown target, the scan
//! commands brute-force role assignments for TCK/TMS/TDI/TDO and confirm
//! the real one with the IEEE 1149.1 BYPASS and IDCODE features; the
//! known-pin commands then measure IR/DR widths, enumerate instructions,
//! and dump the boundary register.

#[macro_use]
pub mod bits;

pub mod gpio;
pub mod idcode;
pub mod jtag;
pub mod scan;
