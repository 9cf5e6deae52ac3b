//! The probe engine: bit-banging primitives, TAP navigation, the IR/DR
//! shift engines, and the chain interrogation routines built on them. The
//! engine is strictly synchronous; the only suspension point is the dwell
//! after each pin write, which sets the wire clock rate.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::bits;
use crate::gpio::{Error as GpioError, Pin, PinDriver, PinState, IGNORE_PIN};
use crate::idcode::Idcode;

/// Maximum number of devices considered on a single chain.
pub const MAX_DEV_NR: usize = 32;

/// Minimum instruction register length per IEEE 1149.1.
pub const MIN_IR_LEN: u32 = 2;

/// Maximum instruction register length considered.
pub const MAX_IR_LEN: u32 = 32;

/// Maximum combined instruction register length of a full chain.
pub const MAX_IR_CHAIN_LEN: usize = MAX_DEV_NR * MAX_IR_LEN as usize;

/// Maximum data register length considered.
pub const MAX_DR_LEN: u32 = 1024;

/// Test pattern shifted through BYPASS registers during scanning. Any
/// sufficiently random bit string works.
pub const PATTERN: &str = "0110011101001101101000010111001001";

/// TMS walk forcing Test-Logic-Reset from any state, then dropping to
/// Run-Test/Idle. Five ones reach reset from anywhere in the state graph.
pub const TAP_RESET: &str = "111110";

/// TMS walk from Run-Test/Idle to Shift-DR.
pub const TAP_SHIFTDR: &str = "100";

/// TMS walk from Run-Test/Idle to Shift-IR.
pub const TAP_SHIFTIR: &str = "1100";

#[derive(Error, Debug)]
pub enum Error {
    #[error("GPIO error")]
    Gpio(#[from] GpioError),
    #[error("Bit vector error")]
    Bits(#[from] bits::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Sleep for at least `us` microseconds. Coarse resolution is fine; the
/// cycle budget is dominated by OS scheduling, not the timer.
pub fn delay(us: u64) {
    thread::sleep(Duration::from_micros(us));
}

/// Assignment of the JTAG signals to concrete GPIO lines. Any role other
/// than nTRST must name a distinct real pin while a probe runs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Roles {
    pub tck: Pin,
    pub tms: Pin,
    pub tdi: Pin,
    pub tdo: Pin,
    pub trst: Pin,
}

impl Roles {
    /// All roles unassigned.
    pub fn ignored() -> Roles {
        Roles {
            tck: IGNORE_PIN,
            tms: IGNORE_PIN,
            tdi: IGNORE_PIN,
            tdo: IGNORE_PIN,
            trst: IGNORE_PIN,
        }
    }
}

/// Pin tables and tuning knobs threaded through the engine. There is no
/// process-wide state: several engines can be built in sequence without
/// interfering with each other.
#[derive(Clone, Debug)]
pub struct Config {
    /// Human-readable label per pin, used only in output messages.
    pub pin_names: HashMap<Pin, String>,
    /// Pins the scan commands enumerate over.
    pub all_pins: Vec<Pin>,
    /// Fixed assignment for the known-pin commands.
    pub known_pins: Roles,
    /// Microseconds of dwell after each pin write on a clock edge; this is
    /// the half-period of TCK.
    pub delay_tck: u64,
    /// Microseconds a candidate nTRST line is held low.
    pub delay_reset: u64,
    /// Apply the internal pull-ups where the backend has them.
    pub pullup: bool,
    /// Measure DR lengths by re-entering Shift-IR after loading the
    /// opcode, the way the classic enumerators do, instead of Shift-DR.
    pub dr_via_ir: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            pin_names: HashMap::new(),
            all_pins: Vec::new(),
            known_pins: Roles::ignored(),
            delay_tck: 10,
            delay_reset: 10_000,
            pullup: false,
            dr_via_ir: false,
        }
    }
}

/// A JTAG probe engine over a pin driver. The engine exclusively drives
/// the pins of the active role assignment for as long as a probe runs.
pub struct Jtag<D> {
    pub(crate) drv: D,
    pub(crate) cfg: Config,
    pub(crate) roles: Roles,
}

impl<D: PinDriver> Jtag<D> {
    pub fn new(drv: D, cfg: Config) -> Jtag<D> {
        Jtag { drv, cfg, roles: Roles::ignored() }
    }

    pub fn roles(&self) -> Roles {
        self.roles
    }

    /// Replace the active role assignment.
    pub fn set_roles(&mut self, roles: Roles) {
        self.roles = roles;
    }

    /// Label for a pin in output messages: the user-supplied name, or the
    /// GPIO number when the table has none.
    pub fn pin_label(&self, pin: Pin) -> String {
        match self.cfg.pin_names.get(&pin) {
            Some(name) => name.clone(),
            None => pin.to_string(),
        }
    }

    /// Role summary for report lines, like ` TCK:pin1 TMS:pin2 TDO:pin3`.
    /// Unassigned roles are left out.
    pub fn describe_roles(&self) -> String {
        let Roles { tck, tms, tdi, tdo, trst } = self.roles;
        let mut out = String::new();
        for &(name, pin) in &[("nTRST", trst), ("TCK", tck), ("TMS", tms), ("TDO", tdo), ("TDI", tdi)] {
            if pin != IGNORE_PIN {
                out.push_str(&format!(" {}:{}", name, self.pin_label(pin)));
            }
        }
        out
    }

    /// Write a pin and dwell for the TCK half-period, making the edge
    /// observable to the target.
    pub(crate) fn pin_write_delay(&mut self, pin: Pin, state: PinState) -> Result<()> {
        self.drv.pin_write(pin, state)?;
        delay(self.cfg.delay_tck);
        Ok(())
    }

    /// Produce `cnt` complete TCK cycles, a high dwell then a low dwell.
    /// TMS and TDI must already hold the values intended for these cycles.
    pub(crate) fn pulse_tck(&mut self, cnt: usize) -> Result<()> {
        for _ in 0..cnt {
            self.pin_write_delay(self.roles.tck, PinState::High)?;
            self.pin_write_delay(self.roles.tck, PinState::Low)?;
        }
        Ok(())
    }

    /// Assert TMS and clock once, advancing the TAP by one state.
    pub(crate) fn pulse_tms(&mut self, tms: PinState) -> Result<()> {
        self.drv.pin_write(self.roles.tms, tms)?;
        self.pulse_tck(1)
    }

    /// Walk a TMS bit string, one TCK cycle per character, first character
    /// first. No TDI control and no TDO sampling happen here.
    pub fn set_tap_state(&mut self, walk: &str) -> Result<()> {
        log::trace!("TAP walk {}", walk);
        for c in walk.chars() {
            self.drv.pin_write(self.roles.tms, PinState::from(c == '1'))?;
            self.pulse_tck(1)?;
        }
        Ok(())
    }

    /// Drive every pin of the run to a failsafe default: output, high,
    /// pulls per configuration. TDO is then turned back into an input and
    /// TCK parked low so the first pulse gives a clean rising edge.
    pub fn init_pins(&mut self) -> Result<()> {
        let pins: Vec<Pin> = if self.cfg.all_pins.is_empty() {
            let Roles { tck, tms, tdi, tdo, trst } = self.roles;
            vec![tck, tms, tdi, tdo, trst]
        } else {
            self.cfg.all_pins.clone()
        };

        for pin in pins {
            if pin == IGNORE_PIN {
                continue;
            }
            self.drv.pin_output(pin)?;
            self.drv.pin_write(pin, PinState::High)?;
            if self.cfg.pullup {
                self.drv.pin_pull_up(pin)?;
            } else {
                self.drv.pin_pull_off(pin)?;
            }
        }

        if self.roles.tdo != IGNORE_PIN {
            self.drv.pin_input(self.roles.tdo)?;
        }
        if self.roles.tck != IGNORE_PIN {
            self.drv.pin_write(self.roles.tck, PinState::Low)?;
        }
        Ok(())
    }

    /// Shared shape of the two shift engines: enter the shift state, clock
    /// every bit out on TDI while sampling TDO, raise TMS together with
    /// the final bit, then walk Exit1 -> Update -> Run-Test/Idle.
    fn shift(&mut self, walk: &str, pattern: &[bool]) -> Result<Vec<bool>> {
        self.set_tap_state(walk)?;

        let mut ret = Vec::with_capacity(pattern.len());
        for (i, &bit) in pattern.iter().enumerate() {
            self.drv.pin_write(self.roles.tdi, PinState::from(bit))?;
            ret.push(self.drv.pin_read(self.roles.tdo)?.is_high());
            if i == pattern.len() - 1 {
                self.drv.pin_write(self.roles.tms, PinState::High)?;
            }
            self.pulse_tck(1)?;
        }

        // Update, new contents take effect
        self.pulse_tms(PinState::High)?;
        // back to Run-Test/Idle
        self.pulse_tms(PinState::Low)?;

        Ok(ret)
    }

    /// Shift `pattern` into the data register selected by the current
    /// instruction. The TAP must be in Run-Test/Idle and is left there.
    /// Returns the same-length capture from TDO.
    pub fn send_data(&mut self, pattern: &[bool]) -> Result<Vec<bool>> {
        self.shift(TAP_SHIFTDR, pattern)
    }

    /// Load `instruction` into the instruction register. The TAP must be
    /// in Run-Test/Idle and is left there. Returns the same-length capture
    /// from TDO.
    pub fn send_instruction(&mut self, instruction: &[bool]) -> Result<Vec<bool>> {
        self.shift(TAP_SHIFTIR, instruction)
    }

    /// Force every device on the chain into BYPASS and clock `pattern`
    /// through, extended with one filler bit per device so the whole
    /// pattern makes it past the chain. Leaves the TAP in Run-Test/Idle.
    pub fn send_recv_bypass_pattern(&mut self, dev_cnt: usize, pattern: &[bool]) -> Result<Vec<bool>> {
        self.set_tap_state(TAP_RESET)?;
        self.set_tap_state(TAP_SHIFTIR)?;

        // the all-ones opcode is BYPASS on every IEEE 1149.1 device
        self.drv.pin_write(self.roles.tdi, PinState::High)?;
        self.pulse_tck(dev_cnt * MAX_IR_LEN as usize)?;

        // Exit1-IR, Update-IR, Run-Test/Idle
        self.pulse_tms(PinState::High)?;
        self.pulse_tms(PinState::High)?;
        self.pulse_tms(PinState::Low)?;

        let mut ext = pattern.to_vec();
        ext.resize(pattern.len() + dev_cnt, false);
        self.send_data(&ext)
    }

    /// Count the devices on the chain: fill every instruction register
    /// with ones (BYPASS), fill the resulting one-bit data registers with
    /// ones, then shift in a zero and count the cycles until it shows up
    /// on TDO. Returns 0 when nothing answers. Leaves the TAP in
    /// Run-Test/Idle.
    pub fn detect_devices(&mut self) -> Result<usize> {
        self.set_tap_state(TAP_RESET)?;
        self.set_tap_state(TAP_SHIFTIR)?;

        self.drv.pin_write(self.roles.tdi, PinState::High)?;
        self.pulse_tck(MAX_IR_CHAIN_LEN - 1)?;

        // Exit1-IR, Update-IR, then straight on through Select-DR and
        // Capture-DR into Shift-DR
        self.pulse_tms(PinState::High)?;
        self.pulse_tms(PinState::High)?;
        self.pulse_tms(PinState::High)?;
        self.pulse_tms(PinState::Low)?;
        self.pulse_tms(PinState::Low)?;

        // one flip-flop per device in BYPASS: set them all
        self.pulse_tck(MAX_DEV_NR)?;

        self.drv.pin_write(self.roles.tdi, PinState::Low)?;
        let mut dev_cnt = 0;
        while dev_cnt < MAX_DEV_NR {
            if self.drv.pin_read(self.roles.tdo)? == PinState::Low {
                break;
            }
            self.pulse_tck(1)?;
            dev_cnt += 1;
        }
        if dev_cnt > MAX_DEV_NR - 1 {
            dev_cnt = 0;
        }

        // Exit1-DR, Update-DR, Run-Test/Idle
        self.pulse_tms(PinState::High)?;
        self.pulse_tms(PinState::High)?;
        self.pulse_tms(PinState::Low)?;

        log::debug!("detect_devices: counted {} devices", dev_cnt);
        Ok(dev_cnt)
    }

    /// Measure the instruction register width of a single-device chain:
    /// flush the IR to zeros, inject a one, and count the cycles until it
    /// reaches TDO. Widths outside the IEEE 1149.1 bounds come back as 0.
    /// Leaves the TAP in Run-Test/Idle.
    pub fn detect_ir_length(&mut self) -> Result<u32> {
        self.set_tap_state(TAP_RESET)?;
        self.set_tap_state(TAP_SHIFTIR)?;

        // the width is unknown, so overshoot the flush
        self.drv.pin_write(self.roles.tdi, PinState::Low)?;
        self.pulse_tck(MAX_IR_LEN as usize - 1)?;

        self.drv.pin_write(self.roles.tdi, PinState::High)?;
        let mut num = 0;
        while num < MAX_IR_LEN {
            if self.drv.pin_read(self.roles.tdo)? == PinState::High {
                break;
            }
            self.pulse_tck(1)?;
            num += 1;
        }

        if num > MAX_IR_LEN - 1 || num < MIN_IR_LEN {
            num = 0;
        }

        self.pulse_tms(PinState::High)?;
        self.pulse_tms(PinState::High)?;
        self.pulse_tms(PinState::Low)?;

        log::debug!("detect_ir_length: {} bits", num);
        Ok(num)
    }

    /// Measure the width of the data register selected by `opcode` on a
    /// single-device chain, with the same flush-and-inject approach as the
    /// IR measurement. Returns 0 when no echo arrives within `MAX_DR_LEN`
    /// cycles. Leaves the TAP in Run-Test/Idle.
    pub fn detect_dr_length(&mut self, opcode: u32) -> Result<u32> {
        let ir_len = self.detect_ir_length()?;

        let mut instruction = Vec::new();
        bits::append_word(&mut instruction, u64::from(opcode), ir_len as usize);
        self.send_instruction(&instruction)?;

        if self.cfg.dr_via_ir {
            self.set_tap_state(TAP_SHIFTIR)?;
        } else {
            self.set_tap_state(TAP_SHIFTDR)?;
        }

        self.drv.pin_write(self.roles.tdi, PinState::Low)?;
        self.pulse_tck(MAX_DR_LEN as usize - 1)?;

        self.drv.pin_write(self.roles.tdi, PinState::High)?;
        let mut num = 0;
        while num < MAX_DR_LEN {
            if self.drv.pin_read(self.roles.tdo)? == PinState::High {
                break;
            }
            self.pulse_tck(1)?;
            num += 1;
        }
        if num > MAX_DR_LEN - 1 {
            num = 0;
        }

        self.pulse_tms(PinState::High)?;
        self.pulse_tms(PinState::High)?;
        self.pulse_tms(PinState::Low)?;

        Ok(num)
    }

    /// Read up to `dev_cnt` 32-bit identification codes. A TAP reset makes
    /// the identification register, where implemented, the selected data
    /// register; each word is read LSB-first and Shift-DR is re-entered
    /// through Exit1 -> Pause -> Exit2 for the next device. Positions past
    /// the real chain read back as all ones; the caller applies the
    /// validity check. Leaves the TAP in Run-Test/Idle.
    pub fn get_idcodes(&mut self, dev_cnt: usize) -> Result<Vec<Idcode>> {
        self.set_tap_state(TAP_RESET)?;
        self.set_tap_state(TAP_SHIFTDR)?;

        let mut idcodes = Vec::with_capacity(dev_cnt);
        for _ in 0..dev_cnt {
            let mut word = Vec::with_capacity(32);
            for k in 0..32 {
                word.push(self.drv.pin_read(self.roles.tdo)?.is_high());
                if k == 31 {
                    self.drv.pin_write(self.roles.tms, PinState::High)?;
                }
                self.pulse_tck(1)?;
            }
            let (idcode, _) = bits::drain_u32(&word)?;
            idcodes.push(Idcode(idcode));

            // on to the next device without recapturing
            self.pulse_tms(PinState::Low)?;
            self.pulse_tms(PinState::High)?;
            self.pulse_tms(PinState::Low)?;
        }

        self.set_tap_state(TAP_RESET)?;
        Ok(idcodes)
    }
}
