//! GPIO backends. This is the lowest-level module: the probe engine only
//! ever talks to hardware through the `PinDriver` trait, and two backends
//! implement it. The `rpio` backend drives the memory-mapped Broadcom GPIO
//! block directly and supports the internal pulls; the `gpiod` backend
//! works against any `/dev/gpiochipN` character device but leaves the
//! pulls alone.

use thiserror::Error;

pub mod gpiod;
pub mod rpio;

#[derive(Error, Debug)]
pub enum Error {
    #[error("GPIO error")]
    Rpio(#[from] rppal::gpio::Error),
    #[error("GPIO character device error")]
    Cdev(#[from] gpio_cdev::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A GPIO line number as the host OS understands it.
pub type Pin = u8;

/// Sentinel pin number meaning "this role is unused in this run".
pub const IGNORE_PIN: Pin = 0xFF;

/// Logic level of a pin.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PinState {
    Low,
    High,
}

impl PinState {
    pub fn is_high(self) -> bool {
        self == PinState::High
    }
}

impl From<bool> for PinState {
    fn from(high: bool) -> PinState {
        if high { PinState::High } else { PinState::Low }
    }
}

/// Primitive pin operations the probe engine is built on.
///
/// Writes take effect before the call returns; reads report the line's
/// present level. Direction changes are idempotent, though a backend may
/// release and re-request the line to apply one. Backend failures are
/// fatal to the run: the engine propagates them up without retrying.
pub trait PinDriver {
    fn pin_write(&mut self, pin: Pin, state: PinState) -> Result<()>;
    fn pin_read(&mut self, pin: Pin) -> Result<PinState>;
    fn pin_output(&mut self, pin: Pin) -> Result<()>;
    fn pin_input(&mut self, pin: Pin) -> Result<()>;
    fn pin_pull_up(&mut self, pin: Pin) -> Result<()>;
    fn pin_pull_off(&mut self, pin: Pin) -> Result<()>;
}
