//! A software model of an IEEE 1149.1 scan chain, presented to the probe
//! engine through the `PinDriver` trait so every command can run against
//! simulated hardware. The model tracks the full 16-state TAP controller,
//! a chain of devices with IR/DR shift registers, an optional async nTRST
//! line, and physical shorts between pins. Undriven lines float high, as
//! they would through pull-ups.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use jtagscan::gpio::{Pin, PinDriver, PinState, Result};

/// The sixteen TAP controller states.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TapState {
    TestLogicReset,
    RunTestIdle,
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

impl TapState {
    fn next(self, tms: bool) -> TapState {
        use TapState::*;
        match (self, tms) {
            (TestLogicReset, true) => TestLogicReset,
            (TestLogicReset, false) => RunTestIdle,
            (RunTestIdle, true) => SelectDr,
            (RunTestIdle, false) => RunTestIdle,
            (SelectDr, true) => SelectIr,
            (SelectDr, false) => CaptureDr,
            (CaptureDr, true) => Exit1Dr,
            (CaptureDr, false) => ShiftDr,
            (ShiftDr, true) => Exit1Dr,
            (ShiftDr, false) => ShiftDr,
            (Exit1Dr, true) => UpdateDr,
            (Exit1Dr, false) => PauseDr,
            (PauseDr, true) => Exit2Dr,
            (PauseDr, false) => PauseDr,
            (Exit2Dr, true) => UpdateDr,
            (Exit2Dr, false) => ShiftDr,
            (UpdateDr, true) => SelectDr,
            (UpdateDr, false) => RunTestIdle,
            (SelectIr, true) => TestLogicReset,
            (SelectIr, false) => CaptureIr,
            (CaptureIr, true) => Exit1Ir,
            (CaptureIr, false) => ShiftIr,
            (ShiftIr, true) => Exit1Ir,
            (ShiftIr, false) => ShiftIr,
            (Exit1Ir, true) => UpdateIr,
            (Exit1Ir, false) => PauseIr,
            (PauseIr, true) => Exit2Ir,
            (PauseIr, false) => PauseIr,
            (Exit2Ir, true) => UpdateIr,
            (Exit2Ir, false) => ShiftIr,
            (UpdateIr, true) => SelectDr,
            (UpdateIr, false) => RunTestIdle,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum DrKind {
    Bypass,
    Idcode,
    Custom(usize),
}

/// One TAP on the simulated chain.
pub struct Device {
    ir_len: usize,
    idcode: Option<u32>,
    idcode_opcode: Option<u32>,
    dr_widths: HashMap<u32, usize>,
    ir: Vec<bool>,
    dr: Vec<bool>,
    selected: DrKind,
}

impl Device {
    /// A device with no identification register; BYPASS is the default DR.
    pub fn bypass(ir_len: usize) -> Device {
        Device {
            ir_len,
            idcode: None,
            idcode_opcode: None,
            dr_widths: HashMap::new(),
            ir: vec![false; ir_len],
            dr: vec![false],
            selected: DrKind::Bypass,
        }
    }

    /// A device whose identification register is selected after reset and
    /// by `idcode_opcode`.
    pub fn with_idcode(ir_len: usize, idcode: u32, idcode_opcode: u32) -> Device {
        let mut device = Device::bypass(ir_len);
        device.idcode = Some(idcode);
        device.idcode_opcode = Some(idcode_opcode);
        device.reset();
        device
    }

    /// Give `opcode` a data register of `width` bits; unlisted opcodes
    /// decode to BYPASS, as IEEE 1149.1 requires.
    pub fn dr_width(mut self, opcode: u32, width: usize) -> Device {
        self.dr_widths.insert(opcode, width);
        self
    }

    fn reset(&mut self) {
        self.selected = if self.idcode.is_some() { DrKind::Idcode } else { DrKind::Bypass };
    }

    fn capture_dr(&mut self) {
        self.dr = match self.selected {
            DrKind::Idcode => {
                let code = self.idcode.unwrap_or(0);
                (0..32).map(|i| code >> i & 1 == 1).collect()
            }
            DrKind::Bypass => vec![false],
            DrKind::Custom(width) => vec![false; width],
        };
    }

    fn capture_ir(&mut self) {
        // the mandatory 01 capture pattern in the low bits
        self.ir = vec![false; self.ir_len];
        if !self.ir.is_empty() {
            self.ir[0] = true;
        }
    }

    fn shift_dr(&mut self, tdi: bool) -> bool {
        let out = self.dr.remove(0);
        self.dr.push(tdi);
        out
    }

    fn shift_ir(&mut self, tdi: bool) -> bool {
        let out = self.ir.remove(0);
        self.ir.push(tdi);
        out
    }

    fn update_ir(&mut self) {
        let mut opcode = 0u32;
        for (i, &bit) in self.ir.iter().enumerate() {
            if bit {
                opcode |= 1 << i;
            }
        }
        self.selected = if self.ir.iter().all(|&bit| bit) {
            DrKind::Bypass
        } else if Some(opcode) == self.idcode_opcode {
            DrKind::Idcode
        } else if let Some(&width) = self.dr_widths.get(&opcode) {
            DrKind::Custom(width)
        } else {
            DrKind::Bypass
        };
    }

    fn dr_out(&self) -> bool {
        self.dr[0]
    }

    fn ir_out(&self) -> bool {
        self.ir[0]
    }
}

/// Which GPIO lines the simulated target's port is bonded to. Device 0 of
/// the chain is nearest TDI; the last device drives TDO.
#[derive(Copy, Clone)]
pub struct Wiring {
    pub tck: Pin,
    pub tms: Pin,
    pub tdi: Pin,
    pub tdo: Pin,
    pub trst: Option<Pin>,
}

struct SimState {
    devices: Vec<Device>,
    wiring: Option<Wiring>,
    shorts: Vec<(Pin, Pin)>,
    levels: HashMap<Pin, bool>,
    state: TapState,
    input_requests: usize,
}

impl SimState {
    fn level(&self, pin: Pin) -> bool {
        *self.levels.get(&pin).unwrap_or(&true)
    }

    fn short_partner(&self, pin: Pin) -> Option<Pin> {
        for &(a, b) in &self.shorts {
            if a == pin {
                return Some(b);
            }
            if b == pin {
                return Some(a);
            }
        }
        None
    }

    fn in_reset(&self) -> bool {
        match self.wiring.and_then(|w| w.trst) {
            Some(trst) => !self.level(trst),
            None => false,
        }
    }

    fn tdo(&self) -> bool {
        if self.devices.is_empty() || self.in_reset() {
            return true;
        }
        let last = &self.devices[self.devices.len() - 1];
        match self.state {
            TapState::ShiftDr => last.dr_out(),
            TapState::ShiftIr => last.ir_out(),
            _ => true,
        }
    }

    fn reset_chain(&mut self) {
        self.state = TapState::TestLogicReset;
        for device in &mut self.devices {
            device.reset();
        }
    }

    /// State actions happen on the rising edge of TCK: capture and shift
    /// in the respective states, then the TMS-selected transition. Each
    /// device shifts with the bit its upstream neighbour drove before the
    /// edge.
    fn rising_edge(&mut self) {
        let wiring = match self.wiring {
            Some(wiring) => wiring,
            None => return,
        };
        if self.in_reset() {
            self.reset_chain();
            return;
        }
        let tms = self.level(wiring.tms);
        let tdi = self.level(wiring.tdi);

        match self.state {
            TapState::CaptureDr => {
                for device in &mut self.devices {
                    device.capture_dr();
                }
            }
            TapState::CaptureIr => {
                for device in &mut self.devices {
                    device.capture_ir();
                }
            }
            TapState::ShiftDr => {
                let mut carry = tdi;
                for device in &mut self.devices {
                    carry = device.shift_dr(carry);
                }
            }
            TapState::ShiftIr => {
                let mut carry = tdi;
                for device in &mut self.devices {
                    carry = device.shift_ir(carry);
                }
            }
            _ => {}
        }

        self.state = self.state.next(tms);
        if self.state == TapState::TestLogicReset {
            for device in &mut self.devices {
                device.reset();
            }
        }
    }

    /// Instruction updates latch on the falling edge in Update-IR.
    fn falling_edge(&mut self) {
        if self.state == TapState::UpdateIr {
            for device in &mut self.devices {
                device.update_ir();
            }
        }
    }
}

pub struct Sim {
    state: Rc<RefCell<SimState>>,
}

impl Sim {
    /// Nothing attached: every undriven line floats high.
    pub fn unwired() -> Sim {
        Sim::build(None, Vec::new(), Vec::new())
    }

    /// A JTAG target bonded to the given lines.
    pub fn with_chain(wiring: Wiring, devices: Vec<Device>) -> Sim {
        Sim::build(Some(wiring), devices, Vec::new())
    }

    /// No target, but physical shorts between pin pairs.
    pub fn with_shorts(shorts: Vec<(Pin, Pin)>) -> Sim {
        Sim::build(None, Vec::new(), shorts)
    }

    fn build(wiring: Option<Wiring>, devices: Vec<Device>, shorts: Vec<(Pin, Pin)>) -> Sim {
        Sim {
            state: Rc::new(RefCell::new(SimState {
                devices,
                wiring,
                shorts,
                levels: HashMap::new(),
                state: TapState::TestLogicReset,
                input_requests: 0,
            })),
        }
    }

    /// A driver handle for the engine; clones share this simulation.
    pub fn driver(&self) -> SimDriver {
        SimDriver { state: Rc::clone(&self.state) }
    }

    pub fn tap_state(&self) -> TapState {
        self.state.borrow().state
    }

    /// Number of input reconfigurations seen; the engine performs exactly
    /// one per `init_pins`, so this counts pin-assignment attempts.
    pub fn input_requests(&self) -> usize {
        self.state.borrow().input_requests
    }
}

pub struct SimDriver {
    state: Rc<RefCell<SimState>>,
}

impl PinDriver for SimDriver {
    fn pin_write(&mut self, pin: Pin, state: PinState) -> Result<()> {
        let mut sim = self.state.borrow_mut();
        let high = state == PinState::High;
        let prev = sim.level(pin);
        sim.levels.insert(pin, high);

        if let Some(wiring) = sim.wiring {
            if Some(pin) == wiring.trst && !high {
                sim.reset_chain();
            }
            if pin == wiring.tck {
                if high && !prev {
                    sim.rising_edge();
                } else if !high && prev {
                    sim.falling_edge();
                }
            }
        }
        Ok(())
    }

    fn pin_read(&mut self, pin: Pin) -> Result<PinState> {
        let sim = self.state.borrow();
        let level = if matches!(sim.wiring, Some(w) if w.tdo == pin) {
            sim.tdo()
        } else if sim.levels.contains_key(&pin) {
            sim.level(pin)
        } else if let Some(other) = sim.short_partner(pin) {
            sim.level(other)
        } else {
            true
        };
        Ok(PinState::from(level))
    }

    fn pin_output(&mut self, _pin: Pin) -> Result<()> {
        Ok(())
    }

    fn pin_input(&mut self, pin: Pin) -> Result<()> {
        let mut sim = self.state.borrow_mut();
        sim.input_requests += 1;
        // an input no longer drives the line; it floats through the pulls
        sim.levels.remove(&pin);
        Ok(())
    }

    fn pin_pull_up(&mut self, _pin: Pin) -> Result<()> {
        Ok(())
    }

    fn pin_pull_off(&mut self, _pin: Pin) -> Result<()> {
        Ok(())
    }
}
