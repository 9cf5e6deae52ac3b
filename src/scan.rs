//! Discovery commands: the loopback check, the brute-force pin scans, the
//! known-pin verifications, opcode discovery, and the boundary-scan dump.
//! Each command narrates its progress on stdout between banners and also
//! returns a structured summary of what it found.

use std::fmt;

use itertools::Itertools;

use crate::bits;
use crate::gpio::{Pin, PinDriver, PinState, IGNORE_PIN};
use crate::idcode::Idcode;
use crate::jtag::{delay, Jtag, Result, Roles, MAX_DEV_NR, TAP_RESET};

const BANNER: &str = "================================";

/// Number of TDO samples taken by the boundary-scan dump.
pub const BOUNDARY_SCAN_BITS: usize = 2000;

/// Outcome of one ordered (TDO, TDI) loopback pair.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoopbackFinding {
    pub tdo: Pin,
    pub tdi: Pin,
    pub kind: LoopbackKind,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoopbackKind {
    /// The pattern echoed back unchanged: the two lines are likely shorted.
    Short,
    /// The echo was active but did not match: crosstalk or a bad cable.
    Interconnection,
}

/// A role assignment confirmed by the BYPASS pattern echo.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BypassMatch {
    pub roles: Roles,
    pub devices: usize,
    pub trst_candidates: Vec<Pin>,
}

/// A role assignment confirmed by a valid identification code.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IdcodeMatch {
    pub roles: Roles,
    pub idcodes: Vec<Idcode>,
    pub trst_candidates: Vec<Pin>,
}

/// An instruction that selects a data register wider than BYPASS.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OpcodeFinding {
    pub ir_len: u32,
    pub opcode: u32,
    pub dr_len: u32,
}

impl fmt::Display for OpcodeFinding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "IR: ")?;
        for i in 0..self.ir_len {
            if self.opcode & (1 << i) == 0 {
                write!(f, "0 ")?;
            } else {
                write!(f, "1 ")?;
            }
        }
        // opcode as hex, masked to whole nibbles of the IR width
        let mask = (1u64 << (4 * ((self.ir_len + 4) / 4))) - 1;
        write!(f, "(0x{:08x}) -> DR: {}", u64::from(self.opcode) & mask, self.dr_len)
    }
}

/// Format a TDO stream 32 bits to a group and 128 bits to a line.
pub fn format_scan_stream(samples: &[bool]) -> String {
    let mut out = String::new();
    for (i, &bit) in samples.iter().enumerate() {
        out.push(if bit { '1' } else { '0' });
        if i % 32 == 31 {
            out.push(' ');
        }
        if i % 128 == 127 {
            out.push('\n');
        }
    }
    out.push('\n');
    out
}

impl<D: PinDriver> Jtag<D> {
    /// Check every ordered pair of pins for a direct echo of the test
    /// pattern, written to one pin and sampled on the other with no clock
    /// involved. A perfect echo points at a physical short; an active but
    /// different echo points at crosstalk or cabling trouble.
    pub fn check_loopback(&mut self, pattern: &[bool]) -> Result<Vec<LoopbackFinding>> {
        println!("{}", BANNER);
        println!("Starting loopback check...");
        let res = self.check_loopback_inner(pattern);
        println!("{}", BANNER);
        res
    }

    fn check_loopback_inner(&mut self, pattern: &[bool]) -> Result<Vec<LoopbackFinding>> {
        let mut findings = Vec::new();
        let pins = self.cfg.all_pins.clone();

        for &tdo in &pins {
            for &tdi in &pins {
                if tdi == tdo {
                    continue;
                }

                self.roles = Roles { tdi, tdo, ..Roles::ignored() };
                self.init_pins()?;

                let mut recv = Vec::with_capacity(pattern.len());
                for &bit in pattern {
                    self.drv.pin_write(tdi, PinState::from(bit))?;
                    recv.push(self.drv.pin_read(tdo)?.is_high());
                }

                if recv == pattern {
                    println!("possible short detected between {} and {}",
                             self.pin_label(tdo), self.pin_label(tdi));
                    findings.push(LoopbackFinding { tdo, tdi, kind: LoopbackKind::Short });
                } else if recv.iter().any(|&bit| bit != recv[0]) {
                    println!("possible interconnection (check cable) detected between {} and {}",
                             self.pin_label(tdo), self.pin_label(tdi));
                    findings.push(LoopbackFinding { tdo, tdi, kind: LoopbackKind::Interconnection });
                }
            }
        }
        Ok(findings)
    }

    /// Brute-force every ordered assignment of (TCK, TMS, TDO, TDI) over
    /// the pin table. A candidate counts as found when the chain answers
    /// the device count and echoes the test pattern through BYPASS; the
    /// remaining pins are then each tried as nTRST by holding them low and
    /// watching the device count change.
    pub fn scan_bypass(&mut self, pattern: &[bool]) -> Result<Vec<BypassMatch>> {
        println!("{}", BANNER);
        println!("Starting scan for pattern {}", bits::bits_to_string(pattern));
        let res = self.scan_bypass_inner(pattern);
        println!("{}", BANNER);
        res
    }

    fn scan_bypass_inner(&mut self, pattern: &[bool]) -> Result<Vec<BypassMatch>> {
        let mut matches = Vec::new();
        let pins = self.cfg.all_pins.clone();

        for perm in pins.iter().copied().permutations(4) {
            let (tck, tms, tdo, tdi) = (perm[0], perm[1], perm[2], perm[3]);
            self.roles = Roles { tck, tms, tdi, tdo, trst: IGNORE_PIN };
            self.init_pins()?;

            let dev_cnt = self.detect_devices()?;
            if dev_cnt == 0 || dev_cnt > MAX_DEV_NR {
                continue;
            }

            let recv = self.send_recv_bypass_pattern(dev_cnt, pattern)?;
            if &recv[dev_cnt..] == pattern {
                print!("FOUND!{}", self.describe_roles());
                print!(", possible nTRST: ");

                let mut candidates = Vec::new();
                for &trst in &pins {
                    if trst == tck || trst == tms || trst == tdo || trst == tdi {
                        continue;
                    }
                    self.roles.trst = trst;

                    self.drv.pin_write(trst, PinState::Low)?;
                    delay(self.cfg.delay_reset);

                    // a changed count means the line held the TAP in reset
                    if self.detect_devices()? != dev_cnt {
                        print!("{} ", self.pin_label(trst));
                        candidates.push(trst);
                    }

                    self.drv.pin_write(trst, PinState::High)?;
                }
                println!();

                matches.push(BypassMatch {
                    roles: Roles { tck, tms, tdi, tdo, trst: IGNORE_PIN },
                    devices: dev_cnt,
                    trst_candidates: candidates,
                });
            } else {
                print!("active,{}", self.describe_roles());
                println!(", wrong data received ({})", bits::bits_to_string(&recv[dev_cnt..]));
                println!("       try adjusting frequency, delays, pullup, check hardware connectivity");
            }
        }
        Ok(matches)
    }

    /// Verify a known pinout by echoing the test pattern through BYPASS.
    pub fn test_bypass(&mut self, pattern: &[bool]) -> Result<bool> {
        println!("{}", BANNER);
        println!("Starting BYPASS test for pattern {}", bits::bits_to_string(pattern));
        let res = self.test_bypass_inner(pattern);
        println!("{}", BANNER);
        res
    }

    fn test_bypass_inner(&mut self, pattern: &[bool]) -> Result<bool> {
        self.roles = self.cfg.known_pins;
        self.init_pins()?;

        let dev_cnt = self.detect_devices()?;
        if dev_cnt == 0 || dev_cnt >= MAX_DEV_NR - 1 {
            println!("no devices found");
            return Ok(false);
        }

        let recv = self.send_recv_bypass_pattern(dev_cnt, pattern)?;
        let recv = &recv[dev_cnt..];

        println!("sent pattern: {}", bits::bits_to_string(pattern));
        println!("recv pattern: {}", bits::bits_to_string(recv));

        if recv == pattern {
            println!("match!");
            Ok(true)
        } else {
            println!("no match");
            Ok(false)
        }
    }

    /// Brute-force every ordered assignment of (TCK, TMS, TDO) over the
    /// pin table, reading the post-reset data register and looking for a
    /// valid identification code. TDI is left unassigned: IDCODE readout
    /// never drives it.
    pub fn scan_idcode(&mut self) -> Result<Vec<IdcodeMatch>> {
        println!("{}", BANNER);
        println!("Starting scan for IDCODE...");
        let res = self.scan_idcode_inner();
        println!("{}", BANNER);
        res
    }

    fn scan_idcode_inner(&mut self) -> Result<Vec<IdcodeMatch>> {
        let mut matches = Vec::new();
        let pins = self.cfg.all_pins.clone();

        for perm in pins.iter().copied().permutations(3) {
            let (tck, tms, tdo) = (perm[0], perm[1], perm[2]);
            self.roles = Roles { tck, tms, tdo, ..Roles::ignored() };
            self.init_pins()?;

            let first = self.get_idcodes(1)?;
            if !first[0].is_valid() {
                continue;
            }

            println!("FOUND!{}", self.describe_roles());

            // the chain length is unknown, so read the maximum and let the
            // validity filter sort the readback out
            let idcodes = self.get_idcodes(MAX_DEV_NR)?;
            println!("     devices:");
            for idcode in idcodes.iter().filter(|idcode| idcode.is_valid()) {
                println!("        {}", idcode);
            }

            print!("     possible nTRST: ");
            let mut candidates = Vec::new();
            for &trst in &pins {
                if trst == tck || trst == tms || trst == tdo {
                    continue;
                }
                self.roles.trst = trst;

                let before = self.get_idcodes(1)?;
                self.drv.pin_write(trst, PinState::Low)?;
                delay(self.cfg.delay_reset);
                let after = self.get_idcodes(1)?;

                if after != before {
                    print!("{} ", self.pin_label(trst));
                    candidates.push(trst);
                }

                self.drv.pin_write(trst, PinState::High)?;
            }
            println!();

            matches.push(IdcodeMatch {
                roles: Roles { tck, tms, tdo, ..Roles::ignored() },
                idcodes: idcodes.into_iter().filter(|idcode| idcode.is_valid()).collect(),
                trst_candidates: candidates,
            });
        }
        Ok(matches)
    }

    /// Read identification codes over a known pinout and print the valid
    /// ones.
    pub fn test_idcode(&mut self) -> Result<Vec<Idcode>> {
        println!("{}", BANNER);
        println!("Attempting to retrieve IDCODE...");
        let res = self.test_idcode_inner();
        println!("{}", BANNER);
        res
    }

    fn test_idcode_inner(&mut self) -> Result<Vec<Idcode>> {
        self.roles = self.cfg.known_pins;
        self.init_pins()?;

        let idcodes = self.get_idcodes(MAX_DEV_NR)?;
        let valid: Vec<Idcode> = idcodes.into_iter().filter(|idcode| idcode.is_valid()).collect();

        println!("devices:");
        for idcode in &valid {
            println!("{}", idcode);
        }
        Ok(valid)
    }

    /// Measure the data register selected by every instruction of a
    /// single-device chain and report the ones wider than BYPASS. The
    /// all-ones opcode is BYPASS by definition and is skipped.
    pub fn discover_opcode(&mut self) -> Result<Vec<OpcodeFinding>> {
        println!("{}", BANNER);
        println!("Starting opcode discovery...");
        let res = self.discover_opcode_inner();
        println!("{}", BANNER);
        res
    }

    fn discover_opcode_inner(&mut self) -> Result<Vec<OpcodeFinding>> {
        self.roles = self.cfg.known_pins;
        self.init_pins()?;

        let dev_cnt = self.detect_devices()?;
        if dev_cnt == 0 {
            println!("no devices in chain");
            return Ok(Vec::new());
        } else if dev_cnt > 1 {
            println!("more than one device in chain");
            return Ok(Vec::new());
        }

        let ir_len = self.detect_ir_length()?;
        if ir_len == 0 {
            println!("IR length: N/A");
            return Ok(Vec::new());
        }
        println!("IR length: {}", ir_len);

        let opcode_max = (1u64 << ir_len) - 1;
        println!("Possible instructions: {}", opcode_max);

        let mut findings = Vec::new();
        for opcode in 0..opcode_max {
            let dr_len = self.detect_dr_length(opcode as u32)?;
            // a 1-bit DR is BYPASS or equivalent and uninteresting
            if dr_len > 1 {
                let finding = OpcodeFinding { ir_len, opcode: opcode as u32, dr_len };
                println!("{}", finding);
                findings.push(finding);
            }
        }

        self.set_tap_state(TAP_RESET)?;
        Ok(findings)
    }

    /// Load a SAMPLE-style instruction and stream the selected register
    /// out for a fixed number of clocks, with no further TMS activity.
    pub fn boundary_scan(&mut self) -> Result<Vec<bool>> {
        println!("{}", BANNER);
        println!("Starting boundary scan...");
        let res = self.boundary_scan_inner();
        println!("{}", BANNER);
        res
    }

    fn boundary_scan_inner(&mut self) -> Result<Vec<bool>> {
        self.roles = self.cfg.known_pins;
        self.init_pins()?;

        let dev_cnt = self.detect_devices()?;
        if dev_cnt == 0 {
            println!("no devices in chain");
            return Ok(Vec::new());
        } else if dev_cnt > 1 {
            println!("more than one device in chain, not supported");
            return Ok(Vec::new());
        }

        let ir_len = self.detect_ir_length()?;

        // 101 right-padded with zeros to the IR width: a common, though
        // target-specific, SAMPLE opcode
        let mut instruction = Vec::new();
        bits::append_word(&mut instruction, 0b101, 3);
        if ir_len as usize > instruction.len() {
            instruction.resize(ir_len as usize, false);
        }
        self.send_instruction(&instruction)?;

        let mut samples = Vec::with_capacity(BOUNDARY_SCAN_BITS);
        for _ in 0..BOUNDARY_SCAN_BITS {
            samples.push(self.drv.pin_read(self.roles.tdo)?.is_high());
            self.pulse_tck(1)?;
        }
        print!("{}", format_scan_stream(&samples));

        self.set_tap_state(TAP_RESET)?;
        Ok(samples)
    }
}
