use std::collections::HashMap;

use anyhow::anyhow;
use clap::{crate_description, crate_version, value_t};
use clap::{App, AppSettings, Arg, SubCommand};
use serde::Deserialize;

use jtagscan::bits;
use jtagscan::gpio::{Pin, PinDriver, IGNORE_PIN};
use jtagscan::gpio::gpiod::GpiodDriver;
use jtagscan::gpio::rpio::RpioDriver;
use jtagscan::jtag::{Config, Jtag, Roles, PATTERN};

/// The `--known-pins` JSON document. A missing `trst` key means the
/// target's reset line is not wired up.
#[derive(Deserialize, Debug)]
struct KnownPins {
    tdi: Pin,
    tdo: Pin,
    tck: Pin,
    tms: Pin,
    #[serde(default = "ignore_pin")]
    trst: Pin,
}

fn ignore_pin() -> Pin {
    IGNORE_PIN
}

fn main() -> anyhow::Result<()> {
    let matches = App::new("jtagscan")
        .version(crate_version!())
        .about(crate_description!())
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .global_setting(AppSettings::ColoredHelp)
        .global_setting(AppSettings::DeriveDisplayOrder)
        .global_setting(AppSettings::GlobalVersion)
        .global_setting(AppSettings::VersionlessSubcommands)
        .arg(Arg::with_name("driver")
             .help("GPIO backend to drive the pins with")
             .long("driver")
             .short("d")
             .takes_value(true)
             .possible_values(&["rpio", "gpiod"])
             .default_value("rpio")
             .global(true))
        .arg(Arg::with_name("gpiochip")
             .help("Chip number N of /dev/gpiochipN, used by the gpiod driver")
             .long("gpiochip")
             .takes_value(true)
             .default_value("0")
             .global(true))
        .arg(Arg::with_name("pins")
             .help("Candidate pins as a JSON object of label to GPIO number, \
                    e.g. '{\"pin1\": 18, \"pin2\": 23}'")
             .long("pins")
             .short("p")
             .takes_value(true)
             .global(true))
        .arg(Arg::with_name("known-pins")
             .help("Known assignment as a JSON object with keys tdi, tdo, tck, tms, trst")
             .long("known-pins")
             .short("k")
             .takes_value(true)
             .global(true))
        .arg(Arg::with_name("delay-tck")
             .help("Dwell after each TCK edge, in microseconds")
             .long("delay-tck")
             .takes_value(true)
             .default_value("10")
             .global(true))
        .arg(Arg::with_name("delay-reset")
             .help("Width of the reset pulse on candidate nTRST pins, in microseconds")
             .long("delay-reset")
             .takes_value(true)
             .default_value("10000")
             .global(true))
        .arg(Arg::with_name("pullup")
             .help("Enable the internal pull-ups where the backend supports them")
             .long("pullup")
             .global(true))
        .arg(Arg::with_name("dr-via-ir")
             .help("Measure DR lengths through Shift-IR like the classic enumerators")
             .long("dr-via-ir")
             .global(true))
        .subcommand(SubCommand::with_name("check_loopback")
            .about("Look for shorts between the candidate pins"))
        .subcommand(SubCommand::with_name("scan_bypass")
            .about("Brute-force TCK/TMS/TDO/TDI using the BYPASS pattern echo"))
        .subcommand(SubCommand::with_name("test_bypass")
            .about("Verify known pins with a BYPASS pattern echo"))
        .subcommand(SubCommand::with_name("scan_idcode")
            .about("Brute-force TCK/TMS/TDO using the IDCODE register"))
        .subcommand(SubCommand::with_name("test_idcode")
            .about("Read IDCODEs over known pins"))
        .subcommand(SubCommand::with_name("boundary_scan")
            .about("Dump the boundary register over known pins"))
        .subcommand(SubCommand::with_name("discover_opcode")
            .about("Measure the data register behind every IR opcode"))
        .get_matches();

    pretty_env_logger::init();

    let command = matches.subcommand_name().unwrap();

    let mut cfg = Config::default();
    cfg.delay_tck = value_t!(matches, "delay-tck", u64).unwrap_or_else(|e| e.exit());
    cfg.delay_reset = value_t!(matches, "delay-reset", u64).unwrap_or_else(|e| e.exit());
    cfg.pullup = matches.is_present("pullup");
    cfg.dr_via_ir = matches.is_present("dr-via-ir");

    match command {
        "check_loopback" | "scan_bypass" | "scan_idcode" => {
            let json = matches.value_of("pins")
                .ok_or_else(|| anyhow!("--pins is required for {}", command))?;
            let table: HashMap<String, Pin> = serde_json::from_str(json)?;
            for (name, pin) in table {
                cfg.all_pins.push(pin);
                cfg.pin_names.insert(pin, name);
            }
            cfg.all_pins.sort_unstable();
            println!("defined pins: {:?}", cfg.pin_names);
        }
        _ => {
            let json = matches.value_of("known-pins")
                .ok_or_else(|| anyhow!("--known-pins is required for {}", command))?;
            let known: KnownPins = serde_json::from_str(json)?;
            cfg.known_pins = Roles {
                tck: known.tck,
                tms: known.tms,
                tdi: known.tdi,
                tdo: known.tdo,
                trst: known.trst,
            };
        }
    }

    match matches.value_of("driver").unwrap() {
        "gpiod" => {
            let chip = value_t!(matches, "gpiochip", u32).unwrap_or_else(|e| e.exit());
            run(GpiodDriver::new(chip)?, cfg, command)
        }
        _ => run(RpioDriver::new()?, cfg, command),
    }
}

fn run<D: PinDriver>(driver: D, cfg: Config, command: &str) -> anyhow::Result<()> {
    let pattern = bits::bits_from_str(PATTERN)?;
    let mut jtag = Jtag::new(driver, cfg);

    match command {
        "check_loopback" => { jtag.check_loopback(&pattern)?; }
        "scan_bypass" => { jtag.scan_bypass(&pattern)?; }
        "test_bypass" => { jtag.test_bypass(&pattern)?; }
        "scan_idcode" => { jtag.scan_idcode()?; }
        "test_idcode" => { jtag.test_idcode()?; }
        "boundary_scan" => { jtag.boundary_scan()?; }
        "discover_opcode" => { jtag.discover_opcode()?; }
        _ => panic!("Unhandled command."),
    }

    Ok(())
}
