//! Character-device GPIO backend over `/dev/gpiochipN`.
//!
//! Line handles are memoized per pin and re-requested when the direction
//! changes, since the kernel interface fixes the direction at request
//! time. Everything is released when the driver drops. The character
//! device has no pull control, so the pull operations are no-ops.

use std::collections::HashMap;

use gpio_cdev::{Chip, LineHandle, LineRequestFlags};

use super::{Pin, PinDriver, PinState, Result};

const CONSUMER: &str = "jtagscan";

#[derive(Copy, Clone, Eq, PartialEq)]
enum Direction {
    Input,
    Output,
}

pub struct GpiodDriver {
    chip: Chip,
    lines: HashMap<Pin, (LineHandle, Direction)>,
}

impl GpiodDriver {
    /// Open `/dev/gpiochip<chip_num>`. Fails when the chip does not exist
    /// or cannot be opened.
    pub fn new(chip_num: u32) -> Result<GpiodDriver> {
        let chip = Chip::new(format!("/dev/gpiochip{}", chip_num))?;
        Ok(GpiodDriver { chip, lines: HashMap::new() })
    }

    fn handle(&mut self, pin: Pin, dir: Direction) -> Result<&LineHandle> {
        let stale = !matches!(self.lines.get(&pin), Some((_, d)) if *d == dir);
        if stale {
            // the old request must be released before the line can be
            // re-requested with the new direction
            self.lines.remove(&pin);
            let flags = match dir {
                Direction::Output => LineRequestFlags::OUTPUT,
                Direction::Input => LineRequestFlags::INPUT,
            };
            let handle = self.chip.get_line(u32::from(pin))?.request(flags, 1, CONSUMER)?;
            self.lines.insert(pin, (handle, dir));
        }
        Ok(&self.lines[&pin].0)
    }
}

impl PinDriver for GpiodDriver {
    fn pin_write(&mut self, pin: Pin, state: PinState) -> Result<()> {
        let value = match state {
            PinState::High => 1,
            PinState::Low => 0,
        };
        self.handle(pin, Direction::Output)?.set_value(value)?;
        Ok(())
    }

    fn pin_read(&mut self, pin: Pin) -> Result<PinState> {
        if !self.lines.contains_key(&pin) {
            self.handle(pin, Direction::Input)?;
        }
        let (handle, _) = &self.lines[&pin];
        Ok(PinState::from(handle.get_value()? != 0))
    }

    fn pin_output(&mut self, pin: Pin) -> Result<()> {
        self.handle(pin, Direction::Output)?;
        Ok(())
    }

    fn pin_input(&mut self, pin: Pin) -> Result<()> {
        self.handle(pin, Direction::Input)?;
        Ok(())
    }

    fn pin_pull_up(&mut self, _pin: Pin) -> Result<()> {
        Ok(())
    }

    fn pin_pull_off(&mut self, _pin: Pin) -> Result<()> {
        Ok(())
    }
}
