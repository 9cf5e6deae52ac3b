//! Memory-mapped Broadcom GPIO backend, for Raspberry Pi class boards.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use rppal::gpio::{Gpio, IoPin, Level, Mode, PullUpDown};

use super::{Pin, PinDriver, PinState, Result};

pub struct RpioDriver {
    gpio: Gpio,
    pins: HashMap<Pin, IoPin>,
}

impl RpioDriver {
    /// Open the GPIO block. Fails when the memory-mapped peripheral is not
    /// accessible (wrong board, missing permissions).
    pub fn new() -> Result<RpioDriver> {
        let gpio = Gpio::new()?;
        Ok(RpioDriver { gpio, pins: HashMap::new() })
    }

    fn io(&mut self, pin: Pin) -> Result<&mut IoPin> {
        let RpioDriver { gpio, pins } = self;
        match pins.entry(pin) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let io = gpio.get(pin)?.into_io(Mode::Output);
                Ok(entry.insert(io))
            }
        }
    }
}

impl PinDriver for RpioDriver {
    fn pin_write(&mut self, pin: Pin, state: PinState) -> Result<()> {
        let level = match state {
            PinState::High => Level::High,
            PinState::Low => Level::Low,
        };
        self.io(pin)?.write(level);
        Ok(())
    }

    fn pin_read(&mut self, pin: Pin) -> Result<PinState> {
        let level = self.io(pin)?.read();
        Ok(PinState::from(level == Level::High))
    }

    fn pin_output(&mut self, pin: Pin) -> Result<()> {
        self.io(pin)?.set_mode(Mode::Output);
        Ok(())
    }

    fn pin_input(&mut self, pin: Pin) -> Result<()> {
        self.io(pin)?.set_mode(Mode::Input);
        Ok(())
    }

    fn pin_pull_up(&mut self, pin: Pin) -> Result<()> {
        self.io(pin)?.set_pullupdown(PullUpDown::PullUp);
        Ok(())
    }

    fn pin_pull_off(&mut self, pin: Pin) -> Result<()> {
        self.io(pin)?.set_pullupdown(PullUpDown::Off);
        Ok(())
    }
}
